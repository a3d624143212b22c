use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// Success means the process was spawned; its exit status is never awaited.
#[async_trait]
pub trait ViewerLauncher: Send + Sync {
    async fn launch(&self, executable: &str, template: &str, asset_id: &str) -> AppResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn arguments<'a>(template: &'a str, asset_id: &'a str) -> [&'a str; 5] {
        ["/S", "/T", template, "/AID", asset_id]
    }
}

#[async_trait]
impl ViewerLauncher for ProcessLauncher {
    async fn launch(&self, executable: &str, template: &str, asset_id: &str) -> AppResult<()> {
        let executable = executable.trim();
        if executable.is_empty() {
            return Err(AppError::ConfigurationInvalid(
                "posmExecutablePath is required to launch the viewer".into(),
            ));
        }
        match Command::new(executable)
            .args(Self::arguments(template, asset_id))
            .spawn()
        {
            Ok(child) => {
                info!(
                    target: "api_server",
                    executable,
                    template,
                    asset_id,
                    pid = ?child.id(),
                    "inspection viewer launched"
                );
                Ok(())
            }
            Err(err) => {
                warn!(target: "api_server", executable, error = %err, "inspection viewer failed to start");
                Err(AppError::ExternalLaunch(err))
            }
        }
    }
}
