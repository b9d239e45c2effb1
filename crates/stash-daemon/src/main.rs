use anyhow::Result;

use stash_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("stash-daemon")?;
    stash_daemon::server::run().await
}
