use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use webext_permission_toggle::toggle_contract::{
    load_toggle_contract_fixture, run_toggle_contract_replay,
};
use webext_permission_toggle::{
    ActivationController, ExtensionManifest, HostBindings, HostCallOutcome, HostError, HostEvent,
    InMemoryHost, MenuClickEvent, PermissionOperation, PermissionStore, PermissionsRequest,
    SyncPolicy, ToggleConfigError, ToggleControlState, ToggleEventPump, ToggleOptionsOverrides,
    ToggleOutcome, ToggleRuntime, TOGGLE_MENU_ITEM_ID,
};

struct ToggleWorld {
    host: Arc<InMemoryHost>,
    controller: ActivationController,
}

impl ToggleWorld {
    fn new(manifest: ExtensionManifest) -> Self {
        let host = Arc::new(InMemoryHost::with_manifest(manifest));
        let controller = ActivationController::new(HostBindings::from_host(host.clone()));
        Self { host, controller }
    }

    async fn start(&self, overrides: ToggleOptionsOverrides) -> Arc<ToggleRuntime> {
        self.controller
            .initialize(overrides)
            .await
            .expect("toggle should initialize")
    }

    async fn click(&self, tab_id: u64, was_checked: bool) {
        self.host
            .emit(HostEvent::MenuClicked {
                event: MenuClickEvent {
                    was_checked,
                    menu_item_id: TOGGLE_MENU_ITEM_ID.to_string(),
                },
                tab: self.host.tab(tab_id),
            })
            .await;
    }
}

fn overrides(value: serde_json::Value) -> ToggleOptionsOverrides {
    ToggleOptionsOverrides::from_value(value).expect("overrides should parse")
}

/// Permission store that answers like a browser whose API reports through
/// last-error for every call.
struct BrokenPermissionStore {
    calls: Mutex<Vec<PermissionOperation>>,
}

#[async_trait]
impl PermissionStore for BrokenPermissionStore {
    async fn invoke(
        &self,
        operation: PermissionOperation,
        _request: &PermissionsRequest,
    ) -> HostCallOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(operation);
        HostCallOutcome::failed(HostError::new("Extension context invalidated."))
    }
}

#[tokio::test]
async fn integration_activation_offers_unchecked_toggle_for_unlisted_origin() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo").with_permissions(["storage"]));
    world.start(ToggleOptionsOverrides::default()).await;
    world.host.open_tab(1, "https://foo.test/page");

    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;

    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(false))
    );
    let calls = world.host.permission_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, PermissionOperation::Contains);
    assert_eq!(calls[0].1.origins, vec!["https://foo.test/*".to_string()]);
}

#[tokio::test]
async fn integration_grant_with_custom_reload_prompt_reloads_tab() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    world
        .start(overrides(json!({"reloadOnSuccess": "Reload to run Demo here?"})))
        .await;
    world.host.open_tab(1, "https://foo.test/articles/7");
    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;

    world.click(1, false).await;

    assert!(world.host.has_origin("https://foo.test/*"));
    assert_eq!(
        world.host.confirmations(),
        vec![(1, "Reload to run Demo here?".to_string())]
    );
    assert_eq!(world.host.reloads(), vec![1]);
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(true))
    );
}

#[tokio::test]
async fn integration_grant_without_reload_prompt_skips_confirmation() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    let runtime = world
        .start(overrides(json!({"reloadOnSuccess": false})))
        .await;
    assert_eq!(runtime.options().reload_on_success, None);
    world.host.open_tab(1, "https://foo.test/");
    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;

    let outcome = runtime
        .transactions()
        .handle_click(
            &MenuClickEvent {
                was_checked: false,
                menu_item_id: TOGGLE_MENU_ITEM_ID.to_string(),
            },
            world.host.tab(1).as_ref(),
        )
        .await;

    assert_eq!(outcome, ToggleOutcome::Granted { reloaded: false });
    assert!(world.host.confirmations().is_empty());
    assert!(world.host.reloads().is_empty());
}

#[tokio::test]
async fn integration_revoke_removes_only_the_clicked_origin() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    world.host.grant_origin("https://foo.test/*");
    world.host.grant_origin("https://bar.test/*");
    world.start(ToggleOptionsOverrides::default()).await;
    world.host.open_tab(1, "https://foo.test/");
    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(true))
    );

    world.click(1, true).await;

    assert_eq!(world.host.granted_origins(), vec!["https://bar.test/*"]);
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(false))
    );
    assert!(world.host.alerts().is_empty());
}

#[tokio::test]
async fn integration_request_failure_alerts_and_resyncs() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    world.start(ToggleOptionsOverrides::default()).await;
    world.host.fail_permission_operation(
        PermissionOperation::Request,
        HostError::new("Permissions request rejected"),
    );
    world.host.open_tab(1, "https://foo.test/");
    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;

    world.click(1, false).await;

    assert_eq!(
        world.host.alerts(),
        vec!["Error: Permissions request rejected".to_string()]
    );
    assert!(world.host.granted_origins().is_empty());
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(false))
    );
    assert_eq!(
        world.host.permission_operations(),
        vec![
            PermissionOperation::Contains,
            PermissionOperation::Request,
            PermissionOperation::Contains
        ]
    );
}

#[tokio::test]
async fn integration_manifest_origin_is_locked_on_and_never_removed() {
    let manifest = ExtensionManifest::new("Demo").with_content_script_matches(["https://example.com/*"]);
    let world = ToggleWorld::new(manifest);
    world.start(ToggleOptionsOverrides::default()).await;
    world.host.open_tab(3, "https://example.com/settings");
    world.host.emit(HostEvent::TabActivated { tab_id: 3 }).await;
    assert_eq!(world.host.rendered_state(), Some(ToggleControlState::LOCKED_ON));

    world.click(3, true).await;

    assert_eq!(world.host.permission_call_count(PermissionOperation::Remove), 0);
    assert!(world.host.alerts().is_empty());
    assert_eq!(world.host.rendered_state(), Some(ToggleControlState::LOCKED_ON));
}

#[tokio::test]
async fn integration_unreadable_tab_disables_toggle() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    world.start(ToggleOptionsOverrides::default()).await;
    world.host.open_tab(1, "https://foo.test/");
    world.host.open_tab(2, "https://chrome.google.com/webstore");
    world.host.fail_origin_read(
        2,
        HostError::new("The extensions gallery cannot be scripted."),
    );

    world.host.emit(HostEvent::TabActivated { tab_id: 1 }).await;
    world.host.emit(HostEvent::TabActivated { tab_id: 2 }).await;

    assert_eq!(world.host.rendered_state(), Some(ToggleControlState::DISABLED));
    assert_eq!(world.host.permission_call_count(PermissionOperation::Contains), 1);
}

#[tokio::test]
async fn integration_store_reporting_last_error_degrades_to_disabled() {
    let host = Arc::new(InMemoryHost::with_manifest(ExtensionManifest::new("Demo")));
    let store = Arc::new(BrokenPermissionStore {
        calls: Mutex::new(Vec::new()),
    });
    let mut bindings = HostBindings::from_host(host.clone());
    bindings.permissions = store.clone();
    let controller = ActivationController::new(bindings);
    controller
        .initialize(ToggleOptionsOverrides::default())
        .await
        .expect("initialize");
    host.open_tab(1, "https://foo.test/");

    host.emit(HostEvent::TabActivated { tab_id: 1 }).await;
    assert_eq!(host.rendered_state(), Some(ToggleControlState::DISABLED));

    host.emit(HostEvent::MenuClicked {
        event: MenuClickEvent {
            was_checked: false,
            menu_item_id: TOGGLE_MENU_ITEM_ID.to_string(),
        },
        tab: host.tab(1),
    })
    .await;
    assert_eq!(
        host.alerts(),
        vec!["Error: Extension context invalidated.".to_string()]
    );
    assert_eq!(
        store
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone(),
        vec![
            PermissionOperation::Contains,
            PermissionOperation::Request,
            PermissionOperation::Contains
        ]
    );
}

#[tokio::test]
async fn regression_double_initialize_is_rejected() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    world.start(ToggleOptionsOverrides::default()).await;

    let error = world
        .controller
        .initialize(ToggleOptionsOverrides::default())
        .await
        .expect_err("second initialize must fail");

    assert!(matches!(error, ToggleConfigError::AlreadyInitialized));
    assert_eq!(world.host.menu_item_count(), 1);
}

#[tokio::test]
async fn integration_discard_policy_keeps_latest_tab_state() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    let runtime = world
        .start(overrides(json!({"syncPolicy": "discard_inactive_tabs"})))
        .await;
    assert_eq!(runtime.options().sync_policy, SyncPolicy::DiscardInactiveTabs);
    world.host.grant_origin("https://foo.test/*");
    world.host.open_tab(1, "https://foo.test/");
    world.host.open_tab(2, "https://bar.test/");

    world.host.emit(HostEvent::TabActivated { tab_id: 2 }).await;
    let stale = runtime.synchronizer().sync(1).await;

    assert!(!stale.rendered);
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(false))
    );
}

#[tokio::test]
async fn integration_event_pump_drives_full_grant_flow() {
    let world = ToggleWorld::new(ExtensionManifest::new("Demo"));
    let runtime = world
        .start(overrides(json!({"reloadOnSuccess": false})))
        .await;
    world.host.open_tab(1, "https://foo.test/");

    let (sender, receiver) = ToggleEventPump::channel(4);
    let pump = tokio::spawn(ToggleEventPump::new(runtime).run(receiver));
    sender
        .send(HostEvent::TabActivated { tab_id: 1 })
        .await
        .expect("send activation");
    drop(sender);
    assert_eq!(pump.await.expect("pump task"), 1);

    let (sender, receiver) = ToggleEventPump::channel(4);
    let runtime = world.controller.runtime().cloned().expect("runtime");
    let pump = tokio::spawn(ToggleEventPump::new(runtime).run(receiver));
    sender
        .send(HostEvent::MenuClicked {
            event: MenuClickEvent {
                was_checked: false,
                menu_item_id: TOGGLE_MENU_ITEM_ID.to_string(),
            },
            tab: world.host.tab(1),
        })
        .await
        .expect("send click");
    drop(sender);
    assert_eq!(pump.await.expect("pump task"), 1);

    assert!(world.host.has_origin("https://foo.test/*"));
    assert_eq!(
        world.host.rendered_state(),
        Some(ToggleControlState::toggleable(true))
    );
}

#[tokio::test]
async fn integration_contract_fixture_loads_from_disk() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let path = workspace.path().join("contract.json");
    let fixture = json!({
        "schema_version": 1,
        "name": "disk-contract",
        "cases": [{
            "case_id": "grant-from-disk",
            "manifest": {"name": "Demo"},
            "options": {"reloadOnSuccess": false},
            "tabs": [{"id": 5, "url": "http://plain.test:8080/"}],
            "steps": [
                {"kind": "activate", "tab_id": 5},
                {"kind": "click", "tab_id": 5, "was_checked": false}
            ],
            "expected": {
                "menu": {"enabled": true, "checked": true},
                "granted_origins": ["http://plain.test:8080/*"]
            }
        }]
    });
    std::fs::write(
        &path,
        serde_json::to_string_pretty(&fixture).expect("render fixture"),
    )
    .expect("write fixture");

    let loaded = load_toggle_contract_fixture(&path).expect("load fixture");
    let summary = run_toggle_contract_replay(&loaded).await.expect("replay");

    assert_eq!(summary.fixture, "disk-contract");
    assert_eq!(summary.passed_cases, 1);
    assert_eq!(summary.replayed_steps, 2);
}
