//! Toggle configuration: caller overrides merged over manifest-derived defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::host::{MenuContext, MenuItemSpec, MenuItemType};

pub const TOGGLE_MENU_ITEM_ID: &str = "webext-domain-permission-toggle:add-permission";
pub const TOGGLE_MENU_CONTEXTS: [MenuContext; 2] =
    [MenuContext::PageAction, MenuContext::BrowserAction];
pub const TOGGLE_DOCUMENT_URL_PATTERNS: [&str; 2] = ["http://*/*", "https://*/*"];

#[derive(Debug, Error)]
pub enum ToggleConfigError {
    #[error("webext-domain-permission-toggle can only be initialized once")]
    AlreadyInitialized,
    #[error("invalid toggle options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

/// How sync results for tabs that lost focus mid-flight are treated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Every completed sync is rendered; the last one to finish wins.
    #[default]
    LastWriteWins,
    /// Results for a tab that is no longer the tracked active tab are dropped.
    DiscardInactiveTabs,
}

/// `reloadOnSuccess` accepts prompt text or a boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ReloadPromptSetting {
    Enabled(bool),
    Message(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOptionsOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_on_success: Option<ReloadPromptSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
    /// Host-specific fields, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToggleOptionsOverrides {
    pub fn from_json_str(raw: &str) -> Result<Self, ToggleConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ToggleConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Resolved options; built once per controller and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleOptions {
    pub title: String,
    /// Confirmation text shown after a successful grant; `None` disables the prompt.
    pub reload_on_success: Option<String>,
    pub sync_policy: SyncPolicy,
    pub extra: Map<String, Value>,
}

impl ToggleOptions {
    pub fn defaults_for(extension_name: &str) -> Self {
        Self {
            title: format!("Enable {extension_name} on this domain"),
            reload_on_success: Some(format!(
                "Do you want to reload this page to apply {extension_name}?"
            )),
            sync_policy: SyncPolicy::default(),
            extra: Map::new(),
        }
    }

    pub fn resolve(extension_name: &str, overrides: ToggleOptionsOverrides) -> Self {
        let mut options = Self::defaults_for(extension_name);
        if let Some(title) = overrides.title {
            options.title = title;
        }
        match overrides.reload_on_success {
            Some(ReloadPromptSetting::Enabled(false)) => options.reload_on_success = None,
            Some(ReloadPromptSetting::Enabled(true)) | None => {}
            Some(ReloadPromptSetting::Message(message)) if message.is_empty() => {
                options.reload_on_success = None;
            }
            Some(ReloadPromptSetting::Message(message)) => {
                options.reload_on_success = Some(message);
            }
        }
        if let Some(sync_policy) = overrides.sync_policy {
            options.sync_policy = sync_policy;
        }
        options.extra = overrides.extra;
        options
    }
}

/// The checkbox entry created at initialization, unchecked until the first sync.
pub fn toggle_menu_item_spec(title: &str) -> MenuItemSpec {
    MenuItemSpec {
        id: TOGGLE_MENU_ITEM_ID.to_string(),
        title: title.to_string(),
        item_type: MenuItemType::Checkbox,
        checked: false,
        enabled: true,
        contexts: TOGGLE_MENU_CONTEXTS.to_vec(),
        document_url_patterns: TOGGLE_DOCUMENT_URL_PATTERNS
            .iter()
            .map(|pattern| (*pattern).to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        toggle_menu_item_spec, SyncPolicy, ToggleOptions, ToggleOptionsOverrides,
        TOGGLE_MENU_ITEM_ID,
    };
    use crate::host::MenuItemType;

    #[test]
    fn unit_defaults_derive_from_extension_name() {
        let options = ToggleOptions::resolve("Refined Demo", ToggleOptionsOverrides::default());
        assert_eq!(options.title, "Enable Refined Demo on this domain");
        assert_eq!(
            options.reload_on_success.as_deref(),
            Some("Do you want to reload this page to apply Refined Demo?")
        );
        assert_eq!(options.sync_policy, SyncPolicy::LastWriteWins);
        assert!(options.extra.is_empty());
    }

    #[test]
    fn functional_overrides_replace_defaults_and_keep_passthrough_fields() {
        let overrides = ToggleOptionsOverrides::from_value(json!({
            "title": "Run here",
            "reloadOnSuccess": "Reload now?",
            "syncPolicy": "discard_inactive_tabs",
            "icons": {"16": "icon.png"}
        }))
        .expect("overrides should parse");
        let options = ToggleOptions::resolve("Demo", overrides);
        assert_eq!(options.title, "Run here");
        assert_eq!(options.reload_on_success.as_deref(), Some("Reload now?"));
        assert_eq!(options.sync_policy, SyncPolicy::DiscardInactiveTabs);
        assert_eq!(options.extra.get("icons"), Some(&json!({"16": "icon.png"})));
    }

    #[test]
    fn functional_reload_prompt_false_or_empty_disables_prompt() {
        for raw in [r#"{"reloadOnSuccess": false}"#, r#"{"reloadOnSuccess": ""}"#] {
            let overrides = ToggleOptionsOverrides::from_json_str(raw).expect("parse");
            let options = ToggleOptions::resolve("Demo", overrides);
            assert_eq!(options.reload_on_success, None, "input: {raw}");
        }
    }

    #[test]
    fn regression_reload_prompt_true_keeps_default_text() {
        let overrides =
            ToggleOptionsOverrides::from_json_str(r#"{"reloadOnSuccess": true}"#).expect("parse");
        let options = ToggleOptions::resolve("Demo", overrides);
        assert_eq!(
            options.reload_on_success.as_deref(),
            Some("Do you want to reload this page to apply Demo?")
        );
    }

    #[test]
    fn regression_invalid_overrides_are_rejected() {
        let error = ToggleOptionsOverrides::from_json_str(r#"{"title": 42}"#)
            .expect_err("numeric title should fail");
        assert!(error.to_string().starts_with("invalid toggle options"));
    }

    #[test]
    fn unit_toggle_menu_item_spec_is_an_unchecked_checkbox_for_web_pages() {
        let spec = toggle_menu_item_spec("Enable Demo on this domain");
        assert_eq!(spec.id, TOGGLE_MENU_ITEM_ID);
        assert_eq!(spec.item_type, MenuItemType::Checkbox);
        assert!(!spec.checked);
        assert!(spec.enabled);
        assert_eq!(spec.document_url_patterns, vec!["http://*/*", "https://*/*"]);
    }
}
