#[tokio::main]
async fn main() -> anyhow::Result<()> {
    biniserve::cli::run_cli().await
}
