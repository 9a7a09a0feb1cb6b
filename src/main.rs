fn main() -> anyhow::Result<()> {
    postminder::cli::run()
}
