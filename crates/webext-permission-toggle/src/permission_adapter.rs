//! Uniform async contract over the host permission primitives.

use std::sync::Arc;

use thiserror::Error;

use crate::host::{PermissionOperation, PermissionStore, PermissionsRequest};

pub type PermissionResult<T> = Result<T, PermissionApiError>;

/// Raised when the host signals an error for a permission call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("permission {} failed for '{pattern}': {message}", .operation.as_str())]
pub struct PermissionApiError {
    pub operation: PermissionOperation,
    pub pattern: String,
    /// Message reported by the host, shown to the user verbatim.
    pub message: String,
}

/// Builds the `scheme://host/*` pattern covering every path of an origin.
pub fn origin_pattern(origin: &str) -> String {
    format!("{origin}/*")
}

#[derive(Clone)]
pub struct PermissionQueryAdapter {
    store: Arc<dyn PermissionStore>,
}

impl PermissionQueryAdapter {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    pub async fn contains(&self, pattern: &str) -> PermissionResult<bool> {
        self.call(PermissionOperation::Contains, pattern).await
    }

    /// Prompts the user for consent; a declined prompt is `Ok(false)`.
    pub async fn request(&self, pattern: &str) -> PermissionResult<bool> {
        self.call(PermissionOperation::Request, pattern).await
    }

    pub async fn remove(&self, pattern: &str) -> PermissionResult<bool> {
        self.call(PermissionOperation::Remove, pattern).await
    }

    async fn call(&self, operation: PermissionOperation, pattern: &str) -> PermissionResult<bool> {
        let request = PermissionsRequest::for_origin(pattern);
        let outcome = self.store.invoke(operation, &request).await;
        if let Some(error) = outcome.last_error {
            tracing::debug!(
                operation = operation.as_str(),
                pattern,
                message = %error.message,
                "host permission call signaled an error"
            );
            return Err(PermissionApiError {
                operation,
                pattern: pattern.to_string(),
                message: error.message,
            });
        }
        Ok(outcome.value)
    }
}

impl std::fmt::Debug for PermissionQueryAdapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PermissionQueryAdapter")
            .finish_non_exhaustive()
    }
}
