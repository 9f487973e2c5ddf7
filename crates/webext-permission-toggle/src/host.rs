//! Host collaborator seams consumed by the permission toggle.
//!
//! The browser runtime owns menu rendering, tab tracking and permission
//! storage. Each concern is a trait here so the toggle logic can run against a
//! real extension binding or the in-memory host used by tests and the harness.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::ExtensionManifest;

pub type TabId = u64;

/// Error signaled by a host primitive (the runtime's "last error").
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MenuError {
    #[error("menu item '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

pub type MenuResult<T> = Result<T, MenuError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MenuItemType {
    Normal,
    Checkbox,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MenuContext {
    PageAction,
    BrowserAction,
}

/// Full description of a menu entry passed to `MenuRegistry::create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemSpec {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: MenuItemType,
    pub checked: bool,
    pub enabled: bool,
    pub contexts: Vec<MenuContext>,
    pub document_url_patterns: Vec<String>,
}

/// Partial update applied to an existing menu entry; `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[async_trait]
pub trait MenuRegistry: Send + Sync {
    async fn create(&self, spec: MenuItemSpec) -> MenuResult<()>;
    async fn update(&self, id: &str, update: MenuItemUpdate) -> MenuResult<()>;
    async fn remove(&self, id: &str) -> MenuResult<()>;
}

/// Replaces any entry with the same id. Remove failures are logged and the
/// create is always attempted; only the create result is returned.
pub async fn upsert_menu_item(registry: &dyn MenuRegistry, spec: MenuItemSpec) -> MenuResult<()> {
    match registry.remove(&spec.id).await {
        Ok(()) => {}
        Err(MenuError::NotFound(id)) => {
            tracing::debug!(menu_item_id = %id, "no previous menu item to replace");
        }
        Err(error) => {
            tracing::warn!(menu_item_id = %spec.id, %error, "failed to remove previous menu item");
        }
    }
    registry.create(spec).await
}

/// Supplies the already-parsed static manifest.
pub trait ManifestSource: Send + Sync {
    fn manifest(&self) -> ExtensionManifest;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOperation {
    Contains,
    Request,
    Remove,
}

impl PermissionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Request => "request",
            Self::Remove => "remove",
        }
    }
}

/// Payload handed to the host permission primitives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsRequest {
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PermissionsRequest {
    pub fn for_origin(pattern: impl Into<String>) -> Self {
        Self {
            origins: vec![pattern.into()],
            permissions: Vec::new(),
        }
    }
}

/// What a host permission primitive reports back: a value plus the
/// out-of-band error flag the runtime sets when the call did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCallOutcome {
    pub value: bool,
    pub last_error: Option<HostError>,
}

impl HostCallOutcome {
    pub fn ok(value: bool) -> Self {
        Self {
            value,
            last_error: None,
        }
    }

    pub fn failed(error: HostError) -> Self {
        Self {
            value: false,
            last_error: Some(error),
        }
    }
}

/// Raw host permission store; normalized by `PermissionQueryAdapter`.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn invoke(
        &self,
        operation: PermissionOperation,
        request: &PermissionsRequest,
    ) -> HostCallOutcome;
}

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Evaluates `location.origin` in the tab's page context.
    async fn read_origin(&self, tab_id: TabId) -> Result<Option<String>, HostError>;
    /// Shows a synchronous confirmation dialog in the page and returns the answer.
    async fn confirm(&self, tab_id: TabId, message: &str) -> Result<bool, HostError>;
    async fn reload(&self, tab_id: TabId) -> Result<(), HostError>;
}

#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// Blocking notification shown to the user.
    async fn alert(&self, message: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuClickEvent {
    pub was_checked: bool,
    pub menu_item_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostEventKind {
    MenuClicked,
    TabActivated,
    TabUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    MenuClicked {
        event: MenuClickEvent,
        tab: Option<Tab>,
    },
    TabActivated {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        status: Option<TabStatus>,
    },
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            Self::MenuClicked { .. } => HostEventKind::MenuClicked,
            Self::TabActivated { .. } => HostEventKind::TabActivated,
            Self::TabUpdated { .. } => HostEventKind::TabUpdated,
        }
    }
}

#[async_trait]
pub trait HostEventListener: Send + Sync {
    async fn handle_event(&self, event: HostEvent);
}

pub trait HostEventRegistry: Send + Sync {
    fn add_listener(&self, kind: HostEventKind, listener: Arc<dyn HostEventListener>);
}

/// Handles to every host collaborator the toggle talks to.
#[derive(Clone)]
pub struct HostBindings {
    pub manifest: Arc<dyn ManifestSource>,
    pub permissions: Arc<dyn PermissionStore>,
    pub tabs: Arc<dyn TabHost>,
    pub menus: Arc<dyn MenuRegistry>,
    pub notifier: Arc<dyn UserNotifier>,
    pub events: Arc<dyn HostEventRegistry>,
}

impl HostBindings {
    /// Builds bindings from a single object implementing every host seam.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: ManifestSource
            + PermissionStore
            + TabHost
            + MenuRegistry
            + UserNotifier
            + HostEventRegistry
            + 'static,
    {
        Self {
            manifest: host.clone(),
            permissions: host.clone(),
            tabs: host.clone(),
            menus: host.clone(),
            notifier: host.clone(),
            events: host,
        }
    }
}

impl std::fmt::Debug for HostBindings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("HostBindings").finish_non_exhaustive()
    }
}
