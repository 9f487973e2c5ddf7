//! Static manifest permission classification.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ORIGIN_SCHEME_SEPARATOR: &str = "://";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentScript {
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The slice of an extension manifest the toggle reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtensionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub content_scripts: Vec<ContentScript>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExtensionManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content_script_matches<I, S>(mut self, matches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_scripts.push(ContentScript {
            matches: matches.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        });
        self
    }
}

pub fn parse_extension_manifest(raw: &str) -> Result<ExtensionManifest> {
    serde_json::from_str::<ExtensionManifest>(raw).context("failed to parse extension manifest")
}

/// Permissions the extension holds by virtue of its manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestPermissionSet {
    pub origins: Vec<String>,
    pub permissions: Vec<String>,
}

impl ManifestPermissionSet {
    /// Merges declared permissions with every content-script match pattern,
    /// drops duplicates (first occurrence wins) and splits origin patterns from
    /// named permissions.
    pub fn classify(manifest: &ExtensionManifest) -> Self {
        let mut seen = HashSet::new();
        let mut classified = Self::default();
        let declared = manifest.permissions.iter().chain(
            manifest
                .content_scripts
                .iter()
                .flat_map(|script| script.matches.iter()),
        );
        for entry in declared {
            if !seen.insert(entry.as_str()) {
                continue;
            }
            if entry.contains(ORIGIN_SCHEME_SEPARATOR) {
                classified.origins.push(entry.clone());
            } else {
                classified.permissions.push(entry.clone());
            }
        }
        classified
    }

    /// True when some manifest origin pattern starts with `origin` followed by
    /// a path, i.e. the extension already has access to it without a runtime
    /// grant. The separator keeps `http://localhost` from matching
    /// `http://localhost:8080/*`.
    pub fn covers_origin(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        let prefix = format!("{origin}/");
        self.origins
            .iter()
            .any(|pattern| pattern.starts_with(&prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty() && self.permissions.is_empty()
    }
}
