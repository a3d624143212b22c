use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::errors::{AppError, AppResult};

/// Binds on loopback, moving to the next port while the current one is taken.
pub async fn bind_with_retry(preferred: u16, attempts: u16) -> AppResult<TcpListener> {
    let last = preferred.saturating_add(attempts.max(1) - 1);
    let mut port = preferred;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                if port >= last {
                    error!(target: "api_server", first = preferred, last, "no free port left to try");
                    return Err(AppError::PortBindExhausted {
                        first: preferred,
                        last,
                    });
                }
                warn!(target: "api_server", port, next = port + 1, "port in use; trying the next one");
                port += 1;
            }
            Err(source) => {
                error!(target: "api_server", port, error = %source, "api listener bind failed");
                return Err(AppError::Bind { port, source });
            }
        }
    }
}

/// A running API listener. Dropping it without `shutdown` leaves the task running.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl ApiServer {
    pub async fn start(app: Router, preferred: u16, attempts: u16) -> AppResult<Self> {
        let listener = bind_with_retry(preferred, attempts).await?;
        let addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
        });
        info!(target: "api_server", %addr, "server running");
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) -> AppResult<()> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(result) => {
                result?;
                info!(target: "api_server", addr = %self.addr, "server stopped");
                Ok(())
            }
            Err(err) => Err(AppError::Io(io::Error::new(io::ErrorKind::Other, err))),
        }
    }
}
