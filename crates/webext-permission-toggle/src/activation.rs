//! One-time setup and host event wiring for the permission toggle.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::host::{
    upsert_menu_item, HostBindings, HostEvent, HostEventKind, HostEventListener, TabStatus,
};
use crate::menu_sync::{ActiveTabTracker, MenuStateSynchronizer};
use crate::options::{
    toggle_menu_item_spec, ToggleConfigError, ToggleOptions, ToggleOptionsOverrides,
};
use crate::toggle_transaction::ToggleTransactionHandler;

const LISTENED_EVENT_KINDS: [HostEventKind; 3] = [
    HostEventKind::MenuClicked,
    HostEventKind::TabActivated,
    HostEventKind::TabUpdated,
];

/// The live toggle: resolved options plus the read and write paths.
#[derive(Debug)]
pub struct ToggleRuntime {
    options: Arc<ToggleOptions>,
    active_tab: ActiveTabTracker,
    synchronizer: MenuStateSynchronizer,
    transactions: ToggleTransactionHandler,
}

impl ToggleRuntime {
    fn new(host: &HostBindings, options: ToggleOptions, active_tab: ActiveTabTracker) -> Self {
        let options = Arc::new(options);
        let synchronizer =
            MenuStateSynchronizer::new(host, active_tab.clone(), options.sync_policy);
        let transactions =
            ToggleTransactionHandler::new(host, synchronizer.clone(), options.clone());
        Self {
            options,
            active_tab,
            synchronizer,
            transactions,
        }
    }

    pub fn options(&self) -> &ToggleOptions {
        &self.options
    }

    pub fn synchronizer(&self) -> &MenuStateSynchronizer {
        &self.synchronizer
    }

    pub fn transactions(&self) -> &ToggleTransactionHandler {
        &self.transactions
    }

    pub async fn dispatch(&self, event: HostEvent) {
        match event {
            HostEvent::TabActivated { tab_id } => {
                self.active_tab.set(tab_id);
                self.synchronizer.sync(tab_id).await;
            }
            HostEvent::TabUpdated { tab_id, status } => {
                // Loading states are skipped: the origin is about to change again.
                if self.active_tab.is_current(tab_id) && status == Some(TabStatus::Complete) {
                    self.synchronizer.sync(tab_id).await;
                }
            }
            HostEvent::MenuClicked { event, tab } => {
                self.transactions.handle_click(&event, tab.as_ref()).await;
            }
        }
    }
}

#[async_trait]
impl HostEventListener for ToggleRuntime {
    async fn handle_event(&self, event: HostEvent) {
        self.dispatch(event).await;
    }
}

/// Owns the single toggle instance for an extension process.
#[derive(Debug)]
pub struct ActivationController {
    host: HostBindings,
    active_tab: ActiveTabTracker,
    runtime: OnceLock<Arc<ToggleRuntime>>,
}

impl ActivationController {
    pub fn new(host: HostBindings) -> Self {
        Self {
            host,
            active_tab: ActiveTabTracker::new(),
            runtime: OnceLock::new(),
        }
    }

    pub fn runtime(&self) -> Option<&Arc<ToggleRuntime>> {
        self.runtime.get()
    }

    pub fn active_tab(&self) -> &ActiveTabTracker {
        &self.active_tab
    }

    /// Resolves options, registers the event listeners and (re)creates the
    /// menu entry. A second call fails before touching the host.
    #[tracing::instrument(name = "webext_permission_toggle.initialize", skip_all)]
    pub async fn initialize(
        &self,
        overrides: ToggleOptionsOverrides,
    ) -> Result<Arc<ToggleRuntime>, ToggleConfigError> {
        if self.runtime.get().is_some() {
            return Err(ToggleConfigError::AlreadyInitialized);
        }
        let manifest = self.host.manifest.manifest();
        let options = ToggleOptions::resolve(&manifest.name, overrides);
        let runtime = Arc::new(ToggleRuntime::new(
            &self.host,
            options,
            self.active_tab.clone(),
        ));
        if self.runtime.set(runtime.clone()).is_err() {
            return Err(ToggleConfigError::AlreadyInitialized);
        }

        for kind in LISTENED_EVENT_KINDS {
            self.host.events.add_listener(kind, runtime.clone());
        }

        let spec = toggle_menu_item_spec(&runtime.options.title);
        if let Err(error) = upsert_menu_item(self.host.menus.as_ref(), spec).await {
            tracing::warn!(%error, "failed to create toggle menu item");
        }
        tracing::info!(title = %runtime.options.title, "permission toggle initialized");
        Ok(runtime)
    }
}

/// Feeds host events into a runtime, one task per event, the way the browser
/// event loop dispatches listeners without ordering between them.
#[derive(Debug, Clone)]
pub struct ToggleEventPump {
    runtime: Arc<ToggleRuntime>,
}

impl ToggleEventPump {
    pub fn new(runtime: Arc<ToggleRuntime>) -> Self {
        Self { runtime }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<HostEvent>, mpsc::Receiver<HostEvent>) {
        mpsc::channel(capacity.max(1))
    }

    /// Runs until every sender is dropped and all dispatched tasks finished.
    /// Returns the number of events dispatched.
    pub async fn run(self, mut receiver: mpsc::Receiver<HostEvent>) -> usize {
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;
        while let Some(event) = receiver.recv().await {
            let runtime = self.runtime.clone();
            tasks.spawn(async move { runtime.dispatch(event).await });
            dispatched = dispatched.saturating_add(1);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "toggle event task did not complete");
            }
        }
        dispatched
    }
}
