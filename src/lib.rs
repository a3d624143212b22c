pub mod bridge;
pub mod bulk;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod launcher;
mod local_store;
pub mod menu;
pub mod queries;
pub mod records;
mod remote_store;
pub mod resolver;
pub mod routes;
pub mod server;
pub mod settings;
pub mod shell;

use std::future::Future;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bridge::{Notification, SyncBridge};
use crate::gateway::QueryGateway;
use crate::launcher::ProcessLauncher;
use crate::resolver::ConnectionResolver;
use crate::routes::ApiState;
use crate::server::ApiServer;
use crate::settings::ConfigStore;
use crate::shell::{DesktopShell, LogWindowHost, WindowHost, WindowKind};

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,posm_map_reader_lib=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

pub fn run() -> AppResult<()> {
    init_tracing();
    let config = AppConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(start(config, LogWindowHost, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }))
}

/// Boots every component in order and serves until `shutdown` resolves.
pub async fn start<H, F>(app: AppConfig, host: H, shutdown: F) -> AppResult<()>
where
    H: WindowHost,
    F: Future<Output = ()>,
{
    let config_path = app.config_document_path();
    let store = Arc::new(ConfigStore::open(&config_path).inspect_err(|err| {
        error!(path = %config_path.display(), error = %err, "cannot start without a configuration document");
    })?);

    let resolver = ConnectionResolver::new(&app);
    let primary = Arc::new(resolver.resolve(&store.snapshot()).inspect_err(|err| {
        error!(error = %err, "configuration does not describe a usable connection");
    })?);
    let gateway = QueryGateway::default();

    let state = ApiState::new(
        Arc::clone(&store),
        &app,
        gateway.clone(),
        Arc::new(ProcessLauncher),
    )?;
    let server = ApiServer::start(
        routes::router(state, app.body_limit_bytes),
        app.api_port,
        app.api_port_attempts,
    )
    .await?;
    info!(addr = %server.local_addr(), "api server ready");

    let (bridge, inbox) = SyncBridge::new();
    let mut shell = DesktopShell::new(
        store,
        bridge.clone(),
        inbox,
        host,
        resolver.clone(),
        gateway.clone(),
    );
    shell.open_window(WindowKind::Main)?;

    if let Err(AppError::ConnectionUnreachable { backend, .. }) =
        resolver.verify(&gateway, primary).await
    {
        bridge.notify(Notification::connection_failed(backend));
    }

    let outcome = shell.run(shutdown).await;
    server.shutdown().await?;
    outcome
}
