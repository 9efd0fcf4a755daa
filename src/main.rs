use anyhow::Result;
use clap::Parser;
use content_sync::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("[ERROR] {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
