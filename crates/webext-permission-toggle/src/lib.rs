//! Per-domain optional host permission toggle for browser extensions.
//!
//! Keeps a single checkbox menu entry in sync with the extension's access to
//! the active tab's origin (granted by the manifest, granted at runtime, or
//! not granted) and runs the grant/revoke transaction when it is clicked.

pub mod activation;
pub mod host;
pub mod manifest;
pub mod memory_host;
pub mod menu_sync;
pub mod options;
pub mod permission_adapter;
pub mod toggle_contract;
pub mod toggle_transaction;

pub use activation::{ActivationController, ToggleEventPump, ToggleRuntime};
pub use host::{
    HostBindings, HostCallOutcome, HostError, HostEvent, HostEventKind, HostEventListener,
    HostEventRegistry, ManifestSource, MenuClickEvent, MenuError, MenuRegistry, PermissionOperation,
    PermissionStore, PermissionsRequest, Tab, TabHost, TabId, TabStatus, UserNotifier,
};
pub use manifest::{ExtensionManifest, ManifestPermissionSet};
pub use memory_host::InMemoryHost;
pub use menu_sync::{ActiveTabContext, MenuStateSynchronizer, SyncReport, ToggleControlState};
pub use options::{
    ReloadPromptSetting, SyncPolicy, ToggleConfigError, ToggleOptions, ToggleOptionsOverrides,
    TOGGLE_MENU_ITEM_ID,
};
pub use permission_adapter::{PermissionApiError, PermissionQueryAdapter};
pub use toggle_transaction::{ToggleOutcome, ToggleTransactionError, ToggleTransactionHandler};
