use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

use windcms_infra::{IaacConfig, IdentityCore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    windcms_observability::init();

    let path = std::env::var_os("WINDCMS_CONFIG").map(PathBuf::from);
    let config = IaacConfig::load(path.as_deref()).context("load configuration")?;
    let core = IdentityCore::connect(&config).await.context("connect backends")?;

    let app = windcms_api::app::build_app(core);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("bind {}", config.server.bind))?;
    tracing::info!(addr = %listener.local_addr()?, relation = ?config.user_tenant_relation, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
