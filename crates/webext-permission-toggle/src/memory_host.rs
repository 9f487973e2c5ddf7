//! Deterministic in-memory host used by tests, contract replay and the harness.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::host::{
    HostCallOutcome, HostError, HostEvent, HostEventKind, HostEventListener, HostEventRegistry,
    ManifestSource, MenuError, MenuItemSpec, MenuItemUpdate, MenuRegistry, MenuResult,
    PermissionOperation, PermissionStore, PermissionsRequest, Tab, TabHost, TabId, UserNotifier,
};
use crate::manifest::{ExtensionManifest, ManifestPermissionSet};
use crate::menu_sync::ToggleControlState;
use crate::options::TOGGLE_MENU_ITEM_ID;

const REQUIRED_PERMISSION_REMOVAL_ERROR: &str = "You cannot remove required permissions.";

#[derive(Debug, Clone)]
struct MemoryTab {
    url: String,
    read_error: Option<HostError>,
}

#[derive(Debug)]
struct HostState {
    manifest: ExtensionManifest,
    granted_origins: BTreeSet<String>,
    prompt_answer: bool,
    confirm_answer: bool,
    permission_failures: HashMap<PermissionOperation, HostError>,
    permission_calls: Vec<(PermissionOperation, PermissionsRequest)>,
    tabs: BTreeMap<TabId, MemoryTab>,
    origin_reads: usize,
    confirmations: Vec<(TabId, String)>,
    reloads: Vec<TabId>,
    menu_items: BTreeMap<String, MenuItemSpec>,
    menu_updates: Vec<(String, MenuItemUpdate)>,
    menu_remove_failure: Option<HostError>,
    alerts: Vec<String>,
}

impl HostState {
    fn new(manifest: ExtensionManifest) -> Self {
        Self {
            manifest,
            granted_origins: BTreeSet::new(),
            prompt_answer: true,
            confirm_answer: true,
            permission_failures: HashMap::new(),
            permission_calls: Vec::new(),
            tabs: BTreeMap::new(),
            origin_reads: 0,
            confirmations: Vec::new(),
            reloads: Vec::new(),
            menu_items: BTreeMap::new(),
            menu_updates: Vec::new(),
            menu_remove_failure: None,
            alerts: Vec::new(),
        }
    }

    fn is_required_origin(&self, pattern: &str) -> bool {
        ManifestPermissionSet::classify(&self.manifest)
            .origins
            .iter()
            .any(|origin| origin == pattern)
    }
}

/// Browser stand-in: manifest, permission store, tabs, menus, alerts and
/// event listeners all live in one mutex-guarded state.
pub struct InMemoryHost {
    state: Mutex<HostState>,
    listeners: Mutex<Vec<(HostEventKind, Arc<dyn HostEventListener>)>>,
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::with_manifest(ExtensionManifest::default())
    }

    pub fn with_manifest(manifest: ExtensionManifest) -> Self {
        Self {
            state: Mutex::new(HostState::new(manifest)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn grant_origin(&self, pattern: impl Into<String>) {
        self.state().granted_origins.insert(pattern.into());
    }

    pub fn has_origin(&self, pattern: &str) -> bool {
        self.state().granted_origins.contains(pattern)
    }

    pub fn granted_origins(&self) -> Vec<String> {
        self.state().granted_origins.iter().cloned().collect()
    }

    /// Answer given by the user to the next permission prompts.
    pub fn set_prompt_answer(&self, accept: bool) {
        self.state().prompt_answer = accept;
    }

    /// Answer given to in-page reload confirmations.
    pub fn set_confirm_answer(&self, accept: bool) {
        self.state().confirm_answer = accept;
    }

    pub fn fail_permission_operation(&self, operation: PermissionOperation, error: HostError) {
        self.state().permission_failures.insert(operation, error);
    }

    pub fn clear_permission_failures(&self) {
        self.state().permission_failures.clear();
    }

    pub fn permission_calls(&self) -> Vec<(PermissionOperation, PermissionsRequest)> {
        self.state().permission_calls.clone()
    }

    pub fn permission_operations(&self) -> Vec<PermissionOperation> {
        self.state()
            .permission_calls
            .iter()
            .map(|(operation, _)| *operation)
            .collect()
    }

    pub fn permission_call_count(&self, operation: PermissionOperation) -> usize {
        self.state()
            .permission_calls
            .iter()
            .filter(|(called, _)| *called == operation)
            .count()
    }

    pub fn open_tab(&self, tab_id: TabId, url: impl Into<String>) {
        self.state().tabs.insert(
            tab_id,
            MemoryTab {
                url: url.into(),
                read_error: None,
            },
        );
    }

    pub fn close_tab(&self, tab_id: TabId) {
        self.state().tabs.remove(&tab_id);
    }

    /// Makes origin reads for `tab_id` fail, e.g. for pages the extension may not script.
    pub fn fail_origin_read(&self, tab_id: TabId, error: HostError) {
        if let Some(tab) = self.state().tabs.get_mut(&tab_id) {
            tab.read_error = Some(error);
        }
    }

    pub fn tab(&self, tab_id: TabId) -> Option<Tab> {
        self.state().tabs.get(&tab_id).map(|tab| Tab {
            id: tab_id,
            url: tab.url.clone(),
        })
    }

    pub fn origin_read_count(&self) -> usize {
        self.state().origin_reads
    }

    pub fn confirmations(&self) -> Vec<(TabId, String)> {
        self.state().confirmations.clone()
    }

    pub fn reloads(&self) -> Vec<TabId> {
        self.state().reloads.clone()
    }

    pub fn menu_item(&self, id: &str) -> Option<MenuItemSpec> {
        self.state().menu_items.get(id).cloned()
    }

    pub fn menu_item_count(&self) -> usize {
        self.state().menu_items.len()
    }

    pub fn menu_updates(&self) -> Vec<(String, MenuItemUpdate)> {
        self.state().menu_updates.clone()
    }

    pub fn fail_menu_remove(&self, error: HostError) {
        self.state().menu_remove_failure = Some(error);
    }

    /// State of the toggle entry as currently rendered.
    pub fn rendered_state(&self) -> Option<ToggleControlState> {
        self.menu_item(TOGGLE_MENU_ITEM_ID)
            .map(|item| ToggleControlState {
                enabled: item.enabled,
                checked: item.checked,
            })
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state().alerts.clone()
    }

    pub fn listener_count(&self, kind: HostEventKind) -> usize {
        self.listeners()
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .count()
    }

    /// Delivers `event` to every listener registered for its kind, in
    /// registration order.
    pub async fn emit(&self, event: HostEvent) {
        let kind = event.kind();
        let listeners = self
            .listeners()
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener.handle_event(event.clone()).await;
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(HostEventKind, Arc<dyn HostEventListener>)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for InMemoryHost {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("InMemoryHost")
            .field("state", &*self.state())
            .field("listener_count", &self.listeners().len())
            .finish()
    }
}

impl ManifestSource for InMemoryHost {
    fn manifest(&self) -> ExtensionManifest {
        self.state().manifest.clone()
    }
}

#[async_trait]
impl PermissionStore for InMemoryHost {
    async fn invoke(
        &self,
        operation: PermissionOperation,
        request: &PermissionsRequest,
    ) -> HostCallOutcome {
        let mut state = self.state();
        state.permission_calls.push((operation, request.clone()));
        if let Some(error) = state.permission_failures.get(&operation) {
            return HostCallOutcome::failed(error.clone());
        }

        match operation {
            PermissionOperation::Contains => HostCallOutcome::ok(
                request.origins.iter().all(|pattern| {
                    state.granted_origins.contains(pattern) || state.is_required_origin(pattern)
                }),
            ),
            PermissionOperation::Request => {
                let already_granted = request
                    .origins
                    .iter()
                    .all(|pattern| state.granted_origins.contains(pattern));
                if already_granted {
                    return HostCallOutcome::ok(true);
                }
                if !state.prompt_answer {
                    return HostCallOutcome::ok(false);
                }
                state
                    .granted_origins
                    .extend(request.origins.iter().cloned());
                HostCallOutcome::ok(true)
            }
            PermissionOperation::Remove => {
                if request
                    .origins
                    .iter()
                    .any(|pattern| state.is_required_origin(pattern))
                {
                    return HostCallOutcome::failed(HostError::new(
                        REQUIRED_PERMISSION_REMOVAL_ERROR,
                    ));
                }
                let mut removed = false;
                for pattern in &request.origins {
                    removed |= state.granted_origins.remove(pattern);
                }
                HostCallOutcome::ok(removed)
            }
        }
    }
}

#[async_trait]
impl TabHost for InMemoryHost {
    async fn read_origin(&self, tab_id: TabId) -> Result<Option<String>, HostError> {
        let mut state = self.state();
        state.origin_reads = state.origin_reads.saturating_add(1);
        let tab = state
            .tabs
            .get(&tab_id)
            .ok_or_else(|| HostError::new(format!("No tab with id: {tab_id}.")))?;
        if let Some(error) = &tab.read_error {
            return Err(error.clone());
        }
        Ok(Url::parse(&tab.url)
            .ok()
            .map(|url| url.origin().ascii_serialization()))
    }

    async fn confirm(&self, tab_id: TabId, message: &str) -> Result<bool, HostError> {
        let mut state = self.state();
        if !state.tabs.contains_key(&tab_id) {
            return Err(HostError::new(format!("No tab with id: {tab_id}.")));
        }
        state.confirmations.push((tab_id, message.to_string()));
        Ok(state.confirm_answer)
    }

    async fn reload(&self, tab_id: TabId) -> Result<(), HostError> {
        let mut state = self.state();
        if !state.tabs.contains_key(&tab_id) {
            return Err(HostError::new(format!("No tab with id: {tab_id}.")));
        }
        state.reloads.push(tab_id);
        Ok(())
    }
}

#[async_trait]
impl MenuRegistry for InMemoryHost {
    async fn create(&self, spec: MenuItemSpec) -> MenuResult<()> {
        let mut state = self.state();
        if state.menu_items.contains_key(&spec.id) {
            return Err(MenuError::Host(HostError::new(format!(
                "Cannot create item with duplicate id {}",
                spec.id
            ))));
        }
        state.menu_items.insert(spec.id.clone(), spec);
        Ok(())
    }

    async fn update(&self, id: &str, update: MenuItemUpdate) -> MenuResult<()> {
        let mut state = self.state();
        let item = state
            .menu_items
            .get_mut(id)
            .ok_or_else(|| MenuError::NotFound(id.to_string()))?;
        if let Some(checked) = update.checked {
            item.checked = checked;
        }
        if let Some(enabled) = update.enabled {
            item.enabled = enabled;
        }
        if let Some(title) = &update.title {
            item.title = title.clone();
        }
        state.menu_updates.push((id.to_string(), update));
        Ok(())
    }

    async fn remove(&self, id: &str) -> MenuResult<()> {
        let mut state = self.state();
        if let Some(error) = &state.menu_remove_failure {
            return Err(MenuError::Host(error.clone()));
        }
        state
            .menu_items
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MenuError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl UserNotifier for InMemoryHost {
    async fn alert(&self, message: &str) {
        self.state().alerts.push(message.to_string());
    }
}

impl HostEventRegistry for InMemoryHost {
    fn add_listener(&self, kind: HostEventKind, listener: Arc<dyn HostEventListener>) {
        self.listeners().push((kind, listener));
    }
}
