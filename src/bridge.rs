use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::records::LayerDescriptor;
use crate::resolver::{BackendKind, RemoteCredentials};
use crate::settings::Configuration;

pub const SQL_CONNECTION_FAILED: &str = "sql-connection-failed";
pub const ACCESS_CONNECTION_FAILED: &str = "access-connection-failed";
pub const LAYER_SELECTED: &str = "layer-selected";
pub const SHOW_INSPECTIONS: &str = "show-inspections";
pub const CONFIG_DATA: &str = "config-data";

pub const UPDATE_MENU_LAYERS: &str = "update-menu-layers";
pub const UPDATE_CUSTOM_TEMPLATE: &str = "update-custom-template";
pub const UPDATE_CONFIG: &str = "update-config";
pub const TEST_SQL_CONNECTION: &str = "test-sql-connection";

const NOTIFICATION_BUFFER: usize = 64;

/// Privileged side to window side. Best effort: lost when nobody listens.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ConnectionFailed {
        backend: BackendKind,
        message: String,
    },
    LayerSelected(String),
    ShowInspections,
    ConfigData(Configuration),
}

impl Notification {
    pub fn connection_failed(backend: BackendKind) -> Self {
        let message = match backend {
            BackendKind::Remote => "Connection to the SQL Server failed.",
            BackendKind::LocalFile => "Connection to the Access database failed.",
        };
        Notification::ConnectionFailed {
            backend,
            message: message.to_string(),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Notification::ConnectionFailed {
                backend: BackendKind::Remote,
                ..
            } => SQL_CONNECTION_FAILED,
            Notification::ConnectionFailed {
                backend: BackendKind::LocalFile,
                ..
            } => ACCESS_CONNECTION_FAILED,
            Notification::LayerSelected(_) => LAYER_SELECTED,
            Notification::ShowInspections => SHOW_INSPECTIONS,
            Notification::ConfigData(_) => CONFIG_DATA,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Notification::ConnectionFailed { message, .. } => Value::String(message.clone()),
            Notification::LayerSelected(title) => Value::String(title.clone()),
            Notification::ShowInspections => Value::Null,
            Notification::ConfigData(config) => {
                serde_json::to_value(config).unwrap_or(Value::Null)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialTestOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CredentialTestOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum BridgeCommand {
    UpdateMenuLayers(Vec<LayerDescriptor>),
    UpdateCustomTemplate(String),
    UpdateConfig(Configuration),
    TestCredentials {
        credentials: RemoteCredentials,
        reply: oneshot::Sender<CredentialTestOutcome>,
    },
}

impl BridgeCommand {
    pub fn channel(&self) -> &'static str {
        match self {
            BridgeCommand::UpdateMenuLayers(_) => UPDATE_MENU_LAYERS,
            BridgeCommand::UpdateCustomTemplate(_) => UPDATE_CUSTOM_TEMPLATE,
            BridgeCommand::UpdateConfig(_) => UPDATE_CONFIG,
            BridgeCommand::TestCredentials { .. } => TEST_SQL_CONNECTION,
        }
    }
}

pub struct CommandInbox {
    receiver: mpsc::UnboundedReceiver<BridgeCommand>,
}

impl CommandInbox {
    pub async fn recv(&mut self) -> Option<BridgeCommand> {
        self.receiver.recv().await
    }
}

#[derive(Clone)]
pub struct SyncBridge {
    notifications: broadcast::Sender<Notification>,
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl SyncBridge {
    pub fn new() -> (Self, CommandInbox) {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (commands, receiver) = mpsc::unbounded_channel();
        (
            Self {
                notifications,
                commands,
            },
            CommandInbox { receiver },
        )
    }

    pub fn notify(&self, notification: Notification) -> usize {
        let channel = notification.channel();
        match self.notifications.send(notification) {
            Ok(receivers) => {
                debug!(target: "desktop_shell", channel, receivers, "notification sent");
                receivers
            }
            Err(_) => {
                debug!(target: "desktop_shell", channel, "notification dropped; no window attached");
                0
            }
        }
    }

    pub fn attach_window(&self) -> WindowPort {
        WindowPort {
            notifications: self.notifications.subscribe(),
            commands: self.commands.clone(),
        }
    }
}

pub struct WindowPort {
    notifications: broadcast::Receiver<Notification>,
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl WindowPort {
    pub fn push_layers(&self, layers: Vec<LayerDescriptor>) -> AppResult<()> {
        self.send(BridgeCommand::UpdateMenuLayers(layers))
    }

    pub fn update_custom_template(&self, template: impl Into<String>) -> AppResult<()> {
        self.send(BridgeCommand::UpdateCustomTemplate(template.into()))
    }

    pub fn update_config(&self, config: Configuration) -> AppResult<()> {
        self.send(BridgeCommand::UpdateConfig(config))
    }

    pub async fn test_credentials(
        &self,
        credentials: RemoteCredentials,
    ) -> AppResult<CredentialTestOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.send(BridgeCommand::TestCredentials { credentials, reply })?;
        outcome
            .await
            .map_err(|_| AppError::Bridge(format!("{TEST_SQL_CONNECTION} reply dropped")))
    }

    pub fn send_raw(&self, channel: &str, payload: Value) -> AppResult<()> {
        let command = match channel {
            UPDATE_MENU_LAYERS => BridgeCommand::UpdateMenuLayers(serde_json::from_value(payload)?),
            UPDATE_CUSTOM_TEMPLATE => {
                BridgeCommand::UpdateCustomTemplate(serde_json::from_value(payload)?)
            }
            UPDATE_CONFIG => BridgeCommand::UpdateConfig(serde_json::from_value(payload)?),
            other => {
                return Err(AppError::Bridge(format!(
                    "`{other}` is not a fire-and-forget channel"
                )))
            }
        };
        self.send(command)
    }

    pub async fn next_notification(&mut self) -> AppResult<Notification> {
        loop {
            match self.notifications.recv().await {
                Ok(notification) => return Ok(notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "desktop_shell", skipped, "window fell behind; notifications lost");
                }
                Err(RecvError::Closed) => {
                    return Err(AppError::Bridge("notification channel".into()));
                }
            }
        }
    }

    fn send(&self, command: BridgeCommand) -> AppResult<()> {
        let channel = command.channel();
        self.commands
            .send(command)
            .map_err(|_| AppError::Bridge(channel.to_string()))
    }
}

pub fn envelope(notification: &Notification) -> Value {
    json!({ "channel": notification.channel(), "payload": notification.payload() })
}

pub fn log_envelope(notification: &Notification) -> Value {
    let payload = match notification {
        Notification::ConfigData(config) => config.redacted(),
        other => other.payload(),
    };
    json!({ "channel": notification.channel(), "payload": payload })
}
