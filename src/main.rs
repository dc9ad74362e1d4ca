fn main() -> anyhow::Result<()> {
    coastal_sentinel::cli_main::main()
}
