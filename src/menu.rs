use crate::records::LayerDescriptor;
use crate::settings::Configuration;

pub const INSPECTION_TEMPLATES: [&str; 5] = [
    "NASSCO PACP",
    "NASSCO LACP",
    "NASSCO MACP Level 1",
    "NASSCO MACP Level 2",
    "POSM",
];

const LAYER_PREFIX: &str = "layer:";
const TEMPLATE_PREFIX: &str = "template:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    EditConfiguration,
    OpenDashboards,
    OpenQuickSearch,
    OpenGisUpdate,
    SetTemplate(String),
    CustomTemplate,
    Quit,
    SelectLayer(String),
    ShowInspections,
}

impl MenuAction {
    pub fn id(&self) -> String {
        match self {
            MenuAction::EditConfiguration => "edit-configuration".into(),
            MenuAction::OpenDashboards => "open-dashboards".into(),
            MenuAction::OpenQuickSearch => "open-quick-search".into(),
            MenuAction::OpenGisUpdate => "open-gis-update".into(),
            MenuAction::SetTemplate(name) => format!("{TEMPLATE_PREFIX}{name}"),
            MenuAction::CustomTemplate => "template-custom".into(),
            MenuAction::Quit => "quit".into(),
            MenuAction::SelectLayer(title) => format!("{LAYER_PREFIX}{title}"),
            MenuAction::ShowInspections => "show-inspections".into(),
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        if let Some(title) = id.strip_prefix(LAYER_PREFIX) {
            return Some(MenuAction::SelectLayer(title.to_string()));
        }
        if let Some(name) = id.strip_prefix(TEMPLATE_PREFIX) {
            return Some(MenuAction::SetTemplate(name.to_string()));
        }
        Some(match id {
            "edit-configuration" => MenuAction::EditConfiguration,
            "open-dashboards" => MenuAction::OpenDashboards,
            "open-quick-search" => MenuAction::OpenQuickSearch,
            "open-gis-update" => MenuAction::OpenGisUpdate,
            "template-custom" => MenuAction::CustomTemplate,
            "quit" => MenuAction::Quit,
            "show-inspections" => MenuAction::ShowInspections,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRole {
    Reload,
    ForceReload,
    ToggleDevTools,
    ResetZoom,
    ZoomIn,
    ZoomOut,
    ToggleFullscreen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    Item {
        id: String,
        label: String,
        enabled: bool,
    },
    Radio {
        id: String,
        label: String,
        checked: bool,
    },
    Separator,
    Submenu(Submenu),
    Role {
        role: StandardRole,
        accelerator: Option<&'static str>,
    },
}

impl MenuEntry {
    fn item(action: MenuAction, label: &str) -> Self {
        MenuEntry::Item {
            id: action.id(),
            label: label.to_string(),
            enabled: true,
        }
    }

    fn radio(action: MenuAction, label: &str, checked: bool) -> Self {
        MenuEntry::Radio {
            id: action.id(),
            label: label.to_string(),
            checked,
        }
    }

    fn role(role: StandardRole) -> Self {
        MenuEntry::Role {
            role,
            accelerator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submenu {
    pub label: String,
    pub entries: Vec<MenuEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuModel {
    pub menus: Vec<Submenu>,
}

impl MenuModel {
    pub fn build(config: &Configuration, layers: &[LayerDescriptor]) -> Self {
        Self {
            menus: vec![
                options_menu(config),
                map_menu(config, layers),
                view_menu(),
            ],
        }
    }

    pub fn checked_layer(&self) -> Option<&str> {
        self.radios().find_map(|(id, checked)| {
            id.strip_prefix(LAYER_PREFIX).filter(|_| checked)
        })
    }

    pub fn checked_template(&self) -> Option<MenuAction> {
        self.radios()
            .filter(|(_, checked)| *checked)
            .filter_map(|(id, _)| MenuAction::from_id(id))
            .find(|action| {
                matches!(action, MenuAction::SetTemplate(_) | MenuAction::CustomTemplate)
            })
    }

    fn radios(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        fn walk<'a>(entries: &'a [MenuEntry], out: &mut Vec<(&'a str, bool)>) {
            for entry in entries {
                match entry {
                    MenuEntry::Radio { id, checked, .. } => out.push((id.as_str(), *checked)),
                    MenuEntry::Submenu(submenu) => walk(&submenu.entries, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        for menu in &self.menus {
            walk(&menu.entries, &mut out);
        }
        out.into_iter()
    }
}

fn options_menu(config: &Configuration) -> Submenu {
    let active = config.inspection_type.as_str();
    let mut templates = INSPECTION_TEMPLATES
        .iter()
        .map(|name| {
            MenuEntry::radio(MenuAction::SetTemplate(name.to_string()), name, active == *name)
        })
        .collect::<Vec<_>>();
    templates.push(MenuEntry::radio(
        MenuAction::CustomTemplate,
        "Custom",
        !active.is_empty() && !INSPECTION_TEMPLATES.contains(&active),
    ));

    Submenu {
        label: "POSM Options".into(),
        entries: vec![
            MenuEntry::item(MenuAction::EditConfiguration, "Edit Configuration"),
            MenuEntry::item(MenuAction::OpenDashboards, "Open Dashboards"),
            MenuEntry::item(MenuAction::OpenQuickSearch, "Open POSM Quick Search"),
            MenuEntry::item(MenuAction::OpenGisUpdate, "Open POSM GIS Update"),
            MenuEntry::Separator,
            MenuEntry::Submenu(Submenu {
                label: "Template for Inspections".into(),
                entries: templates,
            }),
            MenuEntry::item(MenuAction::Quit, "Quit"),
        ],
    }
}

fn map_menu(config: &Configuration, layers: &[LayerDescriptor]) -> Submenu {
    let selected = config.selected_layer();
    let mut entries = Vec::with_capacity(layers.len() + 2);
    entries.push(MenuEntry::Item {
        id: "layer-header".into(),
        label: "Select the layer inspected".into(),
        enabled: false,
    });
    entries.extend(layers.iter().map(|layer| {
        MenuEntry::radio(
            MenuAction::SelectLayer(layer.title.clone()),
            &layer.title,
            selected == Some(layer.title.as_str()),
        )
    }));
    entries.push(MenuEntry::item(
        MenuAction::ShowInspections,
        "Show Inspections on the map",
    ));
    Submenu {
        label: "Map Options".into(),
        entries,
    }
}

fn view_menu() -> Submenu {
    Submenu {
        label: "View".into(),
        entries: vec![
            MenuEntry::role(StandardRole::Reload),
            MenuEntry::role(StandardRole::ForceReload),
            MenuEntry::Role {
                role: StandardRole::ToggleDevTools,
                accelerator: Some("Ctrl+Shift+I"),
            },
            MenuEntry::Separator,
            MenuEntry::role(StandardRole::ResetZoom),
            MenuEntry::role(StandardRole::ZoomIn),
            MenuEntry::role(StandardRole::ZoomOut),
            MenuEntry::role(StandardRole::ToggleFullscreen),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Stale,
    Current,
}

pub struct ApplicationMenu {
    layers: Vec<LayerDescriptor>,
    state: MenuState,
    model: MenuModel,
}

impl ApplicationMenu {
    pub fn new(config: &Configuration) -> Self {
        Self {
            layers: Vec::new(),
            state: MenuState::Stale,
            model: MenuModel::build(config, &[]),
        }
    }

    pub fn replace_layers(&mut self, layers: Vec<LayerDescriptor>, config: &Configuration) -> bool {
        let changed = self.layers != layers;
        self.layers = layers;
        self.state = if self.layers.is_empty() {
            MenuState::Stale
        } else {
            MenuState::Current
        };
        self.refresh(config);
        changed
    }

    pub fn refresh(&mut self, config: &Configuration) {
        self.model = MenuModel::build(config, &self.layers);
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn model(&self) -> &MenuModel {
        &self.model
    }

    pub fn selected_layer(&self) -> Option<&str> {
        self.model.checked_layer()
    }
}
