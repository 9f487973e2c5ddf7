//! Read path: derive the toggle's `{enabled, checked}` state for a tab and
//! push it to the host menu renderer.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::host::{HostBindings, ManifestSource, MenuItemUpdate, MenuRegistry, TabHost, TabId};
use crate::manifest::ManifestPermissionSet;
use crate::options::{SyncPolicy, TOGGLE_MENU_ITEM_ID};
use crate::permission_adapter::{origin_pattern, PermissionQueryAdapter};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleControlState {
    pub enabled: bool,
    pub checked: bool,
}

impl ToggleControlState {
    /// Origin unknown: nothing to toggle.
    pub const DISABLED: Self = Self {
        enabled: false,
        checked: false,
    };
    /// Granted by the manifest: shown as on, never revocable here.
    pub const LOCKED_ON: Self = Self {
        enabled: false,
        checked: true,
    };

    pub fn toggleable(checked: bool) -> Self {
        Self {
            enabled: true,
            checked,
        }
    }

    pub fn as_menu_update(self) -> MenuItemUpdate {
        MenuItemUpdate {
            checked: Some(self.checked),
            enabled: Some(self.enabled),
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTabContext {
    pub tab_id: TabId,
    pub origin: String,
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub tab_id: TabId,
    pub state: ToggleControlState,
    /// False when the state was dropped as stale or the renderer rejected it.
    pub rendered: bool,
}

/// Tab most recently reported as activated by the host.
#[derive(Debug, Clone, Default)]
pub struct ActiveTabTracker {
    current: Arc<Mutex<Option<TabId>>>,
}

impl ActiveTabTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tab_id: TabId) {
        *self.lock() = Some(tab_id);
    }

    pub fn current(&self) -> Option<TabId> {
        *self.lock()
    }

    pub fn is_current(&self, tab_id: TabId) -> bool {
        self.current() == Some(tab_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TabId>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Only plain web origins can be toggled; `null`, `file://`, extension and
/// browser-internal pages all count as unknown.
pub fn is_web_origin(origin: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        origin
            .strip_prefix(scheme)
            .is_some_and(|host| !host.is_empty() && !host.contains('/'))
    })
}

#[derive(Clone)]
pub struct MenuStateSynchronizer {
    manifest: Arc<dyn ManifestSource>,
    tabs: Arc<dyn TabHost>,
    menus: Arc<dyn MenuRegistry>,
    permissions: PermissionQueryAdapter,
    active_tab: ActiveTabTracker,
    sync_policy: SyncPolicy,
}

impl MenuStateSynchronizer {
    pub fn new(host: &HostBindings, active_tab: ActiveTabTracker, sync_policy: SyncPolicy) -> Self {
        Self {
            manifest: host.manifest.clone(),
            tabs: host.tabs.clone(),
            menus: host.menus.clone(),
            permissions: PermissionQueryAdapter::new(host.permissions.clone()),
            active_tab,
            sync_policy,
        }
    }

    /// Recomputes the control state for `tab_id` and overwrites the rendered
    /// entry. Never fails: every problem degrades to a disabled control.
    #[tracing::instrument(name = "webext_permission_toggle.sync", skip(self))]
    pub async fn sync(&self, tab_id: TabId) -> SyncReport {
        let state = self.compute_state(tab_id).await;
        if self.is_stale(tab_id) {
            tracing::debug!(
                active_tab_id = ?self.active_tab.current(),
                "dropping sync result for inactive tab"
            );
            return SyncReport {
                tab_id,
                state,
                rendered: false,
            };
        }
        let rendered = self.render(state).await;
        SyncReport {
            tab_id,
            state,
            rendered,
        }
    }

    pub async fn compute_state(&self, tab_id: TabId) -> ToggleControlState {
        let Some(context) = self.resolve_active_tab(tab_id).await else {
            return ToggleControlState::DISABLED;
        };

        let manifest_permissions = ManifestPermissionSet::classify(&self.manifest.manifest());
        if manifest_permissions.covers_origin(&context.origin) {
            return ToggleControlState::LOCKED_ON;
        }

        match self
            .permissions
            .contains(&origin_pattern(&context.origin))
            .await
        {
            Ok(checked) => ToggleControlState::toggleable(checked),
            Err(error) => {
                tracing::warn!(origin = %context.origin, %error, "permission lookup failed");
                ToggleControlState::DISABLED
            }
        }
    }

    pub async fn resolve_active_tab(&self, tab_id: TabId) -> Option<ActiveTabContext> {
        match self.tabs.read_origin(tab_id).await {
            Ok(Some(origin)) if is_web_origin(&origin) => Some(ActiveTabContext { tab_id, origin }),
            Ok(Some(origin)) => {
                tracing::debug!(%origin, "tab origin is not a web origin");
                None
            }
            Ok(None) => None,
            Err(error) => {
                tracing::debug!(%error, "could not read tab origin");
                None
            }
        }
    }

    /// Full overwrite of the rendered control.
    pub async fn render(&self, state: ToggleControlState) -> bool {
        self.push_update(state.as_menu_update()).await
    }

    /// Shows the control unchecked without touching `enabled`.
    pub async fn force_unchecked(&self) -> bool {
        self.push_update(MenuItemUpdate {
            checked: Some(false),
            ..MenuItemUpdate::default()
        })
        .await
    }

    async fn push_update(&self, update: MenuItemUpdate) -> bool {
        match self.menus.update(TOGGLE_MENU_ITEM_ID, update).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "failed to update toggle menu item");
                false
            }
        }
    }

    fn is_stale(&self, tab_id: TabId) -> bool {
        match self.sync_policy {
            SyncPolicy::LastWriteWins => false,
            SyncPolicy::DiscardInactiveTabs => self
                .active_tab
                .current()
                .is_some_and(|active| active != tab_id),
        }
    }
}

impl std::fmt::Debug for MenuStateSynchronizer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MenuStateSynchronizer")
            .field("sync_policy", &self.sync_policy)
            .finish_non_exhaustive()
    }
}
