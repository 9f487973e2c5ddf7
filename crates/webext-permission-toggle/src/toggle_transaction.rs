//! Write path: grant or revoke the clicked tab's origin and keep the control honest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::host::{
    HostBindings, HostError, ManifestSource, MenuClickEvent, Tab, TabHost, TabId, UserNotifier,
};
use crate::manifest::ManifestPermissionSet;
use crate::menu_sync::MenuStateSynchronizer;
use crate::options::{ToggleOptions, TOGGLE_MENU_ITEM_ID};
use crate::permission_adapter::{origin_pattern, PermissionApiError, PermissionQueryAdapter};

#[derive(Debug, Error)]
pub enum ToggleTransactionError {
    #[error(transparent)]
    Permission(#[from] PermissionApiError),
    #[error("invalid tab url '{url}': {reason}")]
    InvalidTabUrl { url: String, reason: String },
    #[error("tab url '{0}' has no web origin")]
    OpaqueOrigin(String),
    #[error("reload prompt failed: {0}")]
    ReloadPrompt(#[source] HostError),
}

impl ToggleTransactionError {
    /// Text shown to the user; host permission errors are passed through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Permission(error) => error.message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// Click was for another menu item or had no tab.
    Ignored,
    Granted { reloaded: bool },
    /// User dismissed the permission prompt.
    Declined,
    Revoked,
    /// The store reported nothing to remove.
    NotRevoked,
    /// Origin is granted by the manifest; the store was left alone.
    DefaultGranted,
    Failed,
}

/// Serialized web origin of `url`, e.g. `https://example.com:8443`.
pub fn tab_origin(url: &str) -> Result<String, ToggleTransactionError> {
    let parsed = Url::parse(url).map_err(|error| ToggleTransactionError::InvalidTabUrl {
        url: url.to_string(),
        reason: error.to_string(),
    })?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return Err(ToggleTransactionError::OpaqueOrigin(url.to_string()));
    }
    Ok(origin.ascii_serialization())
}

#[derive(Clone)]
pub struct ToggleTransactionHandler {
    manifest: Arc<dyn ManifestSource>,
    tabs: Arc<dyn TabHost>,
    notifier: Arc<dyn UserNotifier>,
    permissions: PermissionQueryAdapter,
    synchronizer: MenuStateSynchronizer,
    options: Arc<ToggleOptions>,
}

impl ToggleTransactionHandler {
    pub fn new(
        host: &HostBindings,
        synchronizer: MenuStateSynchronizer,
        options: Arc<ToggleOptions>,
    ) -> Self {
        Self {
            manifest: host.manifest.clone(),
            tabs: host.tabs.clone(),
            notifier: host.notifier.clone(),
            permissions: PermissionQueryAdapter::new(host.permissions.clone()),
            synchronizer,
            options,
        }
    }

    /// Handles a click on the toggle. Failures are reported to the user and
    /// followed by a resync; they never escape this call.
    #[tracing::instrument(
        name = "webext_permission_toggle.click",
        skip(self, event, tab),
        fields(
            menu_item_id = %event.menu_item_id,
            was_checked = event.was_checked,
            tab_id = ?tab.map(|tab| tab.id)
        )
    )]
    pub async fn handle_click(&self, event: &MenuClickEvent, tab: Option<&Tab>) -> ToggleOutcome {
        if event.menu_item_id != TOGGLE_MENU_ITEM_ID {
            return ToggleOutcome::Ignored;
        }
        let Some(tab) = tab else {
            return ToggleOutcome::Ignored;
        };

        match self.run_transaction(event.was_checked, tab).await {
            Ok(outcome) => {
                tracing::debug!(?outcome, "toggle transaction finished");
                outcome
            }
            Err(error) => {
                tracing::error!(%error, "toggle transaction failed");
                self.notifier
                    .alert(&format!("Error: {}", error.user_message()))
                    .await;
                self.synchronizer.sync(tab.id).await;
                ToggleOutcome::Failed
            }
        }
    }

    async fn run_transaction(
        &self,
        was_checked: bool,
        tab: &Tab,
    ) -> Result<ToggleOutcome, ToggleTransactionError> {
        let origin = tab_origin(&tab.url)?;
        let pattern = origin_pattern(&origin);

        if was_checked {
            return self.revoke(tab.id, &origin, &pattern).await;
        }

        let granted = self.permissions.request(&pattern).await?;
        self.synchronizer.sync(tab.id).await;
        if !granted {
            return Ok(ToggleOutcome::Declined);
        }
        let reloaded = self.offer_reload(tab.id).await?;
        Ok(ToggleOutcome::Granted { reloaded })
    }

    async fn revoke(
        &self,
        tab_id: TabId,
        origin: &str,
        pattern: &str,
    ) -> Result<ToggleOutcome, ToggleTransactionError> {
        let manifest_permissions = ManifestPermissionSet::classify(&self.manifest.manifest());
        if manifest_permissions.covers_origin(origin) {
            tracing::warn!(origin, "refusing to revoke an origin granted by the manifest");
            self.synchronizer.sync(tab_id).await;
            return Ok(ToggleOutcome::DefaultGranted);
        }

        if self.permissions.remove(pattern).await? {
            self.synchronizer.force_unchecked().await;
            return Ok(ToggleOutcome::Revoked);
        }
        self.synchronizer.sync(tab_id).await;
        Ok(ToggleOutcome::NotRevoked)
    }

    async fn offer_reload(&self, tab_id: TabId) -> Result<bool, ToggleTransactionError> {
        let Some(message) = self.options.reload_on_success.as_deref() else {
            return Ok(false);
        };
        let accepted = self
            .tabs
            .confirm(tab_id, message)
            .await
            .map_err(ToggleTransactionError::ReloadPrompt)?;
        if !accepted {
            return Ok(false);
        }
        self.tabs
            .reload(tab_id)
            .await
            .map_err(ToggleTransactionError::ReloadPrompt)?;
        Ok(true)
    }
}

impl std::fmt::Debug for ToggleTransactionHandler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ToggleTransactionHandler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
