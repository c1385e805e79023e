//! 边缘网关进程：加载配置、装配内核、提供管理接口，收到停机信号后有序停机。

mod handlers;
mod kernel;
mod middleware;
mod routes;
mod utils;

use gw_config::AppConfig;
use gw_telemetry::init_tracing;
use kernel::{Kernel, Stores, shutdown_signal};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<Kernel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level, config.log_json);

    let stores = Stores::open_sqlite(&config).await?;
    let kernel = Arc::new(Kernel::new(&config, stores)?);
    kernel.start().await?;

    let app = routes::create_router(
        AppState {
            kernel: kernel.clone(),
        },
        config.http_write_timeout,
    );
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(target: "gw.api", addr = %config.listen_addr, "http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    kernel.shutdown().await;
    Ok(())
}
