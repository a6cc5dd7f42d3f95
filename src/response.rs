//! JSON envelope shared by every endpoint and by callback payloads.

use serde::Serialize;
use serde_json::Value;

/// Uniform response wrapper: `{ success, data, error, metadata }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Operation payload; present on success and on failures that still carry data.
    pub data: Option<T>,
    /// Human-readable failure description.
    pub error: Option<String>,
    /// Optional hints (polling notes and similar).
    pub metadata: Option<Value>,
}

impl<T> ApiResponse<T> {
    /// Wrap a successful payload.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    /// Wrap a failure that still returns the affected resource.
    pub fn failure_with_data(error: impl Into<String>, data: T) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attach metadata to the envelope.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl ApiResponse<()> {
    /// Failure envelope without data.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_serializes_null_data() {
        let value = serde_json::to_value(ApiResponse::failure("boom")).expect("json");
        assert_eq!(
            value,
            json!({ "success": false, "data": null, "error": "boom", "metadata": null })
        );
    }

    #[test]
    fn success_keeps_metadata() {
        let value = serde_json::to_value(
            ApiResponse::success(json!({ "id": 1 })).with_metadata(json!({ "note": "poll" })),
        )
        .expect("json");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["id"], 1);
        assert_eq!(value["metadata"]["note"], "poll");
    }
}
