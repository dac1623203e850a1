use anyhow::Result;
use tracing::info;

mod app;
mod logging;

use app::App;

#[tokio::main]
async fn main() -> Result<()> {
    let log = logging::init();

    info!("Starting service-discovery daemon...");

    let app = App::bootstrap(log).await?;
    app.run().await
}
