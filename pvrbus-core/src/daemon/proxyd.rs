//! Forwarding proxy daemon

use tokio_util::sync::CancellationToken;

use crate::bus::BusProxy;
use crate::config::BusConfig;
use crate::error::Result;

/// Bind the publish and subscribe ports on all interfaces and forward
/// until `shutdown` fires
pub async fn run(config: &BusConfig, shutdown: CancellationToken) -> Result<()> {
    let proxy = BusProxy::bind(
        ("0.0.0.0", config.pub_port),
        ("0.0.0.0", config.sub_port),
        config.high_water_mark,
    )
    .await?;
    proxy.run(shutdown).await?;
    Ok(())
}
