use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{
    log_envelope, BridgeCommand, CommandInbox, CredentialTestOutcome, Notification, SyncBridge,
    WindowPort,
};
use crate::errors::AppResult;
use crate::gateway::QueryGateway;
use crate::menu::{ApplicationMenu, MenuAction, MenuModel};
use crate::records::LayerDescriptor;
use crate::resolver::{ConnectionResolver, RemoteCredentials};
use crate::settings::{ConfigStore, Configuration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Main,
    Configuration,
    Dashboards,
    QuickSearch,
    GisUpdate,
    CustomTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub kind: WindowKind,
    pub title: &'static str,
    pub width: u32,
    pub height: u32,
    pub modal: bool,
    pub resizable: bool,
    pub menu_bar: bool,
    pub page: &'static str,
}

impl WindowKind {
    pub fn spec(self) -> WindowSpec {
        let (title, width, height, modal, page) = match self {
            WindowKind::Main => ("POSM Online Map Reader", 1000, 800, false, "index.html"),
            WindowKind::Configuration => ("Edit Configuration", 650, 850, true, "config.html"),
            WindowKind::Dashboards => ("Dashboards", 1500, 800, false, "dash.html"),
            WindowKind::QuickSearch => ("POSM Quick Search", 1400, 1200, false, "searchInsp.html"),
            WindowKind::GisUpdate => ("POSM GIS Update", 700, 1200, false, "mapping.html"),
            WindowKind::CustomTemplate => (
                "Custom Inspection Template",
                750,
                150,
                true,
                "customTemplate.html",
            ),
        };
        WindowSpec {
            kind: self,
            title,
            width,
            height,
            modal,
            resizable: !modal,
            menu_bar: self == WindowKind::Main,
            page,
        }
    }
}

#[derive(Clone)]
pub struct MenuClicks {
    sender: mpsc::UnboundedSender<MenuAction>,
}

impl MenuClicks {
    /// Returns false for ids that carry no action, such as headers.
    pub fn click(&self, id: &str) -> bool {
        match MenuAction::from_id(id) {
            Some(action) => self.sender.send(action).is_ok(),
            None => false,
        }
    }
}

pub trait WindowHost {
    fn open(&mut self, spec: &WindowSpec, port: WindowPort) -> AppResult<()>;
    fn install_menu(&mut self, menu: &MenuModel, clicks: MenuClicks) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct LogWindowHost;

impl WindowHost for LogWindowHost {
    fn open(&mut self, spec: &WindowSpec, mut port: WindowPort) -> AppResult<()> {
        info!(
            target: "desktop_shell",
            title = spec.title,
            page = spec.page,
            width = spec.width,
            height = spec.height,
            modal = spec.modal,
            "window opened"
        );
        let title = spec.title;
        tokio::spawn(async move {
            while let Ok(notification) = port.next_notification().await {
                info!(target: "desktop_shell", window = title, message = %log_envelope(&notification), "window notified");
            }
        });
        Ok(())
    }

    fn install_menu(&mut self, menu: &MenuModel, _clicks: MenuClicks) -> AppResult<()> {
        let labels = menu
            .menus
            .iter()
            .map(|submenu| submenu.label.as_str())
            .collect::<Vec<_>>();
        debug!(target: "desktop_shell", menus = ?labels, "application menu installed");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlow {
    Continue,
    Quit,
}

enum ShellEvent {
    Shutdown,
    Command(Option<BridgeCommand>),
    Click(Option<MenuAction>),
}

pub struct DesktopShell<H: WindowHost> {
    config: Arc<ConfigStore>,
    bridge: SyncBridge,
    inbox: CommandInbox,
    menu: ApplicationMenu,
    host: H,
    resolver: ConnectionResolver,
    gateway: QueryGateway,
    clicks: MenuClicks,
    click_events: mpsc::UnboundedReceiver<MenuAction>,
}

impl<H: WindowHost> DesktopShell<H> {
    pub fn new(
        config: Arc<ConfigStore>,
        bridge: SyncBridge,
        inbox: CommandInbox,
        host: H,
        resolver: ConnectionResolver,
        gateway: QueryGateway,
    ) -> Self {
        let menu = ApplicationMenu::new(&config.snapshot());
        let (sender, click_events) = mpsc::unbounded_channel();
        Self {
            config,
            bridge,
            inbox,
            menu,
            host,
            resolver,
            gateway,
            clicks: MenuClicks { sender },
            click_events,
        }
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.bridge
    }

    pub fn menu(&self) -> &ApplicationMenu {
        &self.menu
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn menu_clicks(&self) -> MenuClicks {
        self.clicks.clone()
    }

    pub fn open_window(&mut self, kind: WindowKind) -> AppResult<()> {
        let spec = kind.spec();
        self.host.open(&spec, self.bridge.attach_window())?;
        match kind {
            WindowKind::Main => self.install_menu()?,
            WindowKind::Configuration => {
                let snapshot = self.config.snapshot();
                self.bridge
                    .notify(Notification::ConfigData(Configuration::clone(&snapshot)));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn activate(&mut self, action: MenuAction) -> AppResult<ShellFlow> {
        debug!(target: "desktop_shell", action = %action.id(), "menu action");
        match action {
            MenuAction::EditConfiguration => self.open_window(WindowKind::Configuration)?,
            MenuAction::OpenDashboards => self.open_window(WindowKind::Dashboards)?,
            MenuAction::OpenQuickSearch => self.open_window(WindowKind::QuickSearch)?,
            MenuAction::OpenGisUpdate => self.open_window(WindowKind::GisUpdate)?,
            MenuAction::CustomTemplate => self.open_window(WindowKind::CustomTemplate)?,
            MenuAction::SetTemplate(template) => self.set_template(template)?,
            MenuAction::SelectLayer(title) => {
                let layer = title.clone();
                self.config.update(move |doc| doc.selected_layer = layer)?;
                info!(target: "desktop_shell", layer = %title, "layer selected");
                self.bridge.notify(Notification::LayerSelected(title));
                self.refresh_menu()?;
            }
            MenuAction::ShowInspections => {
                self.bridge.notify(Notification::ShowInspections);
            }
            MenuAction::Quit => return Ok(ShellFlow::Quit),
        }
        Ok(ShellFlow::Continue)
    }

    pub fn handle(&mut self, command: BridgeCommand) -> AppResult<()> {
        debug!(target: "desktop_shell", channel = command.channel(), "window command");
        match command {
            BridgeCommand::UpdateMenuLayers(layers) => self.replace_layers(layers),
            BridgeCommand::UpdateCustomTemplate(template) => self.set_template(template),
            BridgeCommand::UpdateConfig(document) => {
                self.config.replace(document)?;
                self.refresh_menu()
            }
            BridgeCommand::TestCredentials { credentials, reply } => {
                let resolver = self.resolver.clone();
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    let outcome = test_credentials(&resolver, &gateway, &credentials).await;
                    if reply.send(outcome).is_err() {
                        debug!(target: "desktop_shell", "credential test caller went away");
                    }
                });
                Ok(())
            }
        }
    }

    pub async fn run<F>(mut self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => ShellEvent::Shutdown,
                command = self.inbox.recv() => ShellEvent::Command(command),
                action = self.click_events.recv() => ShellEvent::Click(action),
            };
            match event {
                ShellEvent::Shutdown | ShellEvent::Command(None) | ShellEvent::Click(None) => break,
                ShellEvent::Command(Some(command)) => {
                    let channel = command.channel();
                    if let Err(err) = self.handle(command) {
                        warn!(target: "desktop_shell", channel, error = %err, "window command failed");
                    }
                }
                ShellEvent::Click(Some(action)) => match self.activate(action) {
                    Ok(ShellFlow::Quit) => break,
                    Ok(ShellFlow::Continue) => {}
                    Err(err) => warn!(target: "desktop_shell", error = %err, "menu action failed"),
                },
            }
        }
        info!(target: "desktop_shell", "desktop shell stopped");
        Ok(())
    }

    fn replace_layers(&mut self, layers: Vec<LayerDescriptor>) -> AppResult<()> {
        let count = layers.len();
        let changed = self.menu.replace_layers(layers, &self.config.snapshot());
        debug!(target: "desktop_shell", count, changed, "layer list replaced");
        self.install_menu()
    }

    fn set_template(&mut self, template: String) -> AppResult<()> {
        info!(target: "desktop_shell", template = %template, "inspection template changed");
        self.config.update(move |doc| doc.inspection_type = template)?;
        self.refresh_menu()
    }

    fn refresh_menu(&mut self) -> AppResult<()> {
        self.menu.refresh(&self.config.snapshot());
        self.install_menu()
    }

    fn install_menu(&mut self) -> AppResult<()> {
        self.host.install_menu(self.menu.model(), self.clicks.clone())
    }
}

pub async fn test_credentials(
    resolver: &ConnectionResolver,
    gateway: &QueryGateway,
    credentials: &RemoteCredentials,
) -> CredentialTestOutcome {
    let descriptor = match resolver.resolve_remote(credentials) {
        Ok(descriptor) => Arc::new(descriptor),
        Err(err) => return CredentialTestOutcome::failed(err),
    };
    match gateway.ping(descriptor).await {
        Ok(()) => CredentialTestOutcome::passed(),
        Err(err) => {
            warn!(target: "desktop_shell", error = %err, "credential test failed");
            CredentialTestOutcome::failed(err)
        }
    }
}
