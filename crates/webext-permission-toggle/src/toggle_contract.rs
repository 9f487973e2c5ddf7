//! Fixture-driven contract replay for the permission toggle.
//!
//! A fixture describes a manifest, the permission store and open tabs, an
//! ordered list of host events, and what the user should end up seeing. Each
//! case is replayed against a fresh `InMemoryHost`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::activation::ActivationController;
use crate::host::{
    HostBindings, HostError, HostEvent, MenuClickEvent, PermissionOperation, TabId, TabStatus,
};
use crate::manifest::ExtensionManifest;
use crate::memory_host::InMemoryHost;
use crate::menu_sync::ToggleControlState;
use crate::options::{ToggleOptionsOverrides, TOGGLE_MENU_ITEM_ID};

pub const TOGGLE_CONTRACT_SCHEMA_VERSION: u32 = 1;

fn toggle_contract_schema_version() -> u32 {
    TOGGLE_CONTRACT_SCHEMA_VERSION
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleContractTab {
    pub id: TabId,
    pub url: String,
    /// When set, reading the tab origin fails with this host message.
    #[serde(default)]
    pub read_error: Option<String>,
}

/// Host error messages returned by the permission store, per operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleContractPermissionFailures {
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub remove: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToggleContractStep {
    Activate {
        tab_id: TabId,
    },
    Update {
        tab_id: TabId,
        #[serde(default)]
        status: Option<TabStatus>,
    },
    Click {
        #[serde(default)]
        tab_id: Option<TabId>,
        was_checked: bool,
        #[serde(default)]
        menu_item_id: Option<String>,
    },
    /// Grant made outside the toggle, e.g. from the extension's options page.
    StoreGrant {
        pattern: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleContractExpectation {
    #[serde(default)]
    pub menu: Option<ToggleControlState>,
    #[serde(default)]
    pub granted_origins: Option<Vec<String>>,
    #[serde(default)]
    pub alerts: Vec<String>,
    #[serde(default)]
    pub reloads: Vec<TabId>,
    #[serde(default)]
    pub permission_operations: Option<Vec<PermissionOperation>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleContractCase {
    #[serde(default = "toggle_contract_schema_version")]
    pub schema_version: u32,
    pub case_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub manifest: ExtensionManifest,
    #[serde(default)]
    pub options: ToggleOptionsOverrides,
    #[serde(default)]
    pub granted_origins: Vec<String>,
    #[serde(default)]
    pub tabs: Vec<ToggleContractTab>,
    #[serde(default = "default_true")]
    pub prompt_answer: bool,
    #[serde(default = "default_true")]
    pub confirm_answer: bool,
    #[serde(default)]
    pub permission_failures: ToggleContractPermissionFailures,
    pub steps: Vec<ToggleContractStep>,
    pub expected: ToggleContractExpectation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleContractFixture {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cases: Vec<ToggleContractCase>,
}

/// What the user-visible host looked like after a case finished.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToggleContractObservation {
    pub menu: Option<ToggleControlState>,
    pub granted_origins: Vec<String>,
    pub alerts: Vec<String>,
    pub reloads: Vec<TabId>,
    pub permission_operations: Vec<PermissionOperation>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ToggleContractReplaySummary {
    pub fixture: String,
    pub discovered_cases: usize,
    pub passed_cases: usize,
    pub replayed_steps: usize,
}

pub fn parse_toggle_contract_fixture(raw: &str) -> Result<ToggleContractFixture> {
    let fixture = serde_json::from_str::<ToggleContractFixture>(raw)
        .context("failed to parse permission toggle contract fixture")?;
    validate_toggle_contract_fixture(&fixture)?;
    Ok(fixture)
}

pub fn load_toggle_contract_fixture(path: &Path) -> Result<ToggleContractFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    parse_toggle_contract_fixture(&raw)
        .with_context(|| format!("invalid fixture {}", path.display()))
}

pub fn validate_toggle_contract_fixture(fixture: &ToggleContractFixture) -> Result<()> {
    if fixture.schema_version != TOGGLE_CONTRACT_SCHEMA_VERSION {
        bail!(
            "unsupported permission toggle contract schema version {} (expected {})",
            fixture.schema_version,
            TOGGLE_CONTRACT_SCHEMA_VERSION
        );
    }
    if fixture.name.trim().is_empty() {
        bail!("fixture name cannot be empty");
    }
    if fixture.cases.is_empty() {
        bail!("fixture must include at least one case");
    }

    let mut case_ids = HashSet::new();
    for (index, case) in fixture.cases.iter().enumerate() {
        validate_toggle_contract_case(case, index)?;
        let case_id = case.case_id.trim().to_string();
        if !case_ids.insert(case_id.clone()) {
            bail!("fixture contains duplicate case_id '{}'", case_id);
        }
    }
    Ok(())
}

fn validate_toggle_contract_case(case: &ToggleContractCase, index: usize) -> Result<()> {
    if case.schema_version != TOGGLE_CONTRACT_SCHEMA_VERSION {
        bail!(
            "fixture case index {} has unsupported schema_version {} (expected {})",
            index,
            case.schema_version,
            TOGGLE_CONTRACT_SCHEMA_VERSION
        );
    }
    if case.case_id.trim().is_empty() {
        bail!("fixture case index {} has empty case_id", index);
    }
    if case.steps.is_empty() {
        bail!("fixture case '{}' has no steps", case.case_id);
    }

    let mut tab_ids = HashSet::new();
    for tab in &case.tabs {
        if !tab_ids.insert(tab.id) {
            bail!("fixture case '{}' declares tab {} twice", case.case_id, tab.id);
        }
    }
    for step in &case.steps {
        let referenced = match step {
            ToggleContractStep::Activate { tab_id } | ToggleContractStep::Update { tab_id, .. } => {
                Some(*tab_id)
            }
            ToggleContractStep::Click { tab_id, .. } => *tab_id,
            ToggleContractStep::StoreGrant { pattern } => {
                if pattern.trim().is_empty() {
                    bail!("fixture case '{}' has a store_grant without pattern", case.case_id);
                }
                None
            }
        };
        if let Some(tab_id) = referenced {
            if !tab_ids.contains(&tab_id) {
                bail!(
                    "fixture case '{}' references undeclared tab {}",
                    case.case_id,
                    tab_id
                );
            }
        }
    }
    Ok(())
}

fn build_case_host(case: &ToggleContractCase) -> Arc<InMemoryHost> {
    let host = Arc::new(InMemoryHost::with_manifest(case.manifest.clone()));
    for pattern in &case.granted_origins {
        host.grant_origin(pattern.clone());
    }
    for tab in &case.tabs {
        host.open_tab(tab.id, tab.url.clone());
        if let Some(message) = &tab.read_error {
            host.fail_origin_read(tab.id, HostError::new(message.clone()));
        }
    }
    host.set_prompt_answer(case.prompt_answer);
    host.set_confirm_answer(case.confirm_answer);

    let failures = [
        (PermissionOperation::Contains, &case.permission_failures.contains),
        (PermissionOperation::Request, &case.permission_failures.request),
        (PermissionOperation::Remove, &case.permission_failures.remove),
    ];
    for (operation, message) in failures {
        if let Some(message) = message {
            host.fail_permission_operation(operation, HostError::new(message.clone()));
        }
    }
    host
}

fn step_event(host: &InMemoryHost, step: &ToggleContractStep) -> Option<HostEvent> {
    match step {
        ToggleContractStep::Activate { tab_id } => Some(HostEvent::TabActivated { tab_id: *tab_id }),
        ToggleContractStep::Update { tab_id, status } => Some(HostEvent::TabUpdated {
            tab_id: *tab_id,
            status: *status,
        }),
        ToggleContractStep::Click {
            tab_id,
            was_checked,
            menu_item_id,
        } => Some(HostEvent::MenuClicked {
            event: MenuClickEvent {
                was_checked: *was_checked,
                menu_item_id: menu_item_id
                    .clone()
                    .unwrap_or_else(|| TOGGLE_MENU_ITEM_ID.to_string()),
            },
            tab: tab_id.and_then(|tab_id| host.tab(tab_id)),
        }),
        ToggleContractStep::StoreGrant { pattern } => {
            host.grant_origin(pattern.clone());
            None
        }
    }
}

/// Replays one case on a fresh host and reports what the host ended up showing.
pub async fn replay_toggle_contract_case(
    case: &ToggleContractCase,
) -> Result<ToggleContractObservation> {
    let host = build_case_host(case);
    let controller = ActivationController::new(HostBindings::from_host(host.clone()));
    controller
        .initialize(case.options.clone())
        .await
        .with_context(|| format!("case '{}' failed to initialize", case.case_id))?;

    for step in &case.steps {
        if let Some(event) = step_event(&host, step) {
            host.emit(event).await;
        }
    }

    Ok(ToggleContractObservation {
        menu: host.rendered_state(),
        granted_origins: host.granted_origins(),
        alerts: host.alerts(),
        reloads: host.reloads(),
        permission_operations: host.permission_operations(),
    })
}

pub fn assert_toggle_observation_matches_expectation(
    case: &ToggleContractCase,
    observed: &ToggleContractObservation,
) -> Result<()> {
    let expected = &case.expected;
    if let Some(menu) = expected.menu {
        if observed.menu != Some(menu) {
            bail!(
                "case '{}' expected menu {:?} but host shows {:?}",
                case.case_id,
                menu,
                observed.menu
            );
        }
    }
    if let Some(granted_origins) = &expected.granted_origins {
        let mut expected_origins = granted_origins.clone();
        expected_origins.sort();
        if observed.granted_origins != expected_origins {
            bail!(
                "case '{}' expected granted origins {:?} but store holds {:?}",
                case.case_id,
                expected_origins,
                observed.granted_origins
            );
        }
    }
    if observed.alerts != expected.alerts {
        bail!(
            "case '{}' expected alerts {:?} but user saw {:?}",
            case.case_id,
            expected.alerts,
            observed.alerts
        );
    }
    if observed.reloads != expected.reloads {
        bail!(
            "case '{}' expected reloads {:?} but host reloaded {:?}",
            case.case_id,
            expected.reloads,
            observed.reloads
        );
    }
    if let Some(operations) = &expected.permission_operations {
        if &observed.permission_operations != operations {
            bail!(
                "case '{}' expected permission operations {:?} but store saw {:?}",
                case.case_id,
                operations,
                observed.permission_operations
            );
        }
    }
    Ok(())
}

pub async fn run_toggle_contract_replay(
    fixture: &ToggleContractFixture,
) -> Result<ToggleContractReplaySummary> {
    validate_toggle_contract_fixture(fixture)?;
    let mut summary = ToggleContractReplaySummary {
        fixture: fixture.name.clone(),
        discovered_cases: fixture.cases.len(),
        ..ToggleContractReplaySummary::default()
    };

    for case in &fixture.cases {
        let observed = replay_toggle_contract_case(case).await?;
        assert_toggle_observation_matches_expectation(case, &observed)?;
        tracing::debug!(case_id = %case.case_id, "contract case passed");
        summary.passed_cases = summary.passed_cases.saturating_add(1);
        summary.replayed_steps = summary.replayed_steps.saturating_add(case.steps.len());
    }
    Ok(summary)
}
