mod http_store;
mod worker;

use anyhow::Result;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("worker=debug,reqwest=info")
        .init();

    if let Err(e) = worker::run().await {
        error!("worker terminado por error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
