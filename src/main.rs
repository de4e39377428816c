use flashloop_cli::cli::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
