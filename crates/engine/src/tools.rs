// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool registry, catalog gating, and execution.
//!
//! The registry is what an instance *could* run; the per-step catalog is
//! what the model *may* call. The gate between them is hard: a call whose
//! name is missing from the catalog is rejected without touching any
//! handler, no matter what the registry holds.

use async_trait::async_trait;
use hive_core::{
    truncate_error_message, ToolCall, ToolCallId, ToolCatalogItem, ToolError, ToolResult,
    ToolSource, TurnId,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Failure returned by a tool handler. Converted into `ToolResult::error`,
/// never propagated.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolHandlerError {
    pub message: String,
    pub code: Option<String>,
    pub suggestion: Option<String>,
}

impl ToolHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            suggestion: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Identity handed to a tool handler for one invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_name: String,
    pub instance_key: String,
    pub turn_id: TurnId,
    pub trace_id: String,
    pub tool_call_id: ToolCallId,
}

/// One registered tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolHandlerError>;
}

struct ToolRegistration {
    item: ToolCatalogItem,
    handler: Arc<dyn ToolHandler>,
}

/// Per-instance name → handler table.
///
/// Insertion order is preserved so the default catalog built from the
/// registry is deterministic. Re-registering a name replaces the entry.
#[derive(Default)]
pub struct ToolRegistry {
    inner: Mutex<IndexMap<String, ToolRegistration>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, item: ToolCatalogItem, handler: Arc<dyn ToolHandler>) {
        let mut inner = self.inner.lock();
        inner.insert(item.name.clone(), ToolRegistration { item, handler });
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.lock().shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.inner.lock().get(name).map(|r| Arc::clone(&r.handler))
    }

    /// Catalog items for everything registered, in registration order.
    pub fn catalog(&self) -> Vec<ToolCatalogItem> {
        self.inner.lock().values().map(|r| r.item.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// One execution request against the current step catalog.
pub struct ToolExecutionRequest<'a> {
    pub call: &'a ToolCall,
    pub catalog: &'a [ToolCatalogItem],
    pub context: &'a ToolContext,
    pub error_message_limit: usize,
}

/// Catalog-gated tool dispatcher. Infallible: every call yields a
/// `ToolResult`.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, request: ToolExecutionRequest<'_>) -> ToolResult {
        let call = request.call;
        let catalog_item = request.catalog.iter().find(|item| item.name == call.name);

        let Some(catalog_item) = catalog_item else {
            return not_in_catalog_result(call);
        };

        if let Some(parameters) = &catalog_item.parameters {
            let issues = validation::validate_args(&call.args, parameters, "args");
            if !issues.is_empty() {
                let message = truncate_error_message(
                    &validation::format_issues(&call.name, &issues),
                    request.error_message_limit,
                );
                return ToolResult::error(
                    call,
                    ToolError {
                        name: "ToolInputValidationError".to_string(),
                        message,
                        code: Some("E_TOOL_INVALID_ARGS".to_string()),
                        suggestion: Some(validation::schema_hint(parameters)),
                    },
                );
            }
        }

        let Some(handler) = self.registry.handler(&call.name) else {
            return ToolResult::error(
                call,
                ToolError {
                    name: "ToolNotFoundError".to_string(),
                    message: format!("Tool '{}' is not registered.", call.name),
                    code: Some("E_TOOL_NOT_FOUND".to_string()),
                    suggestion: Some(
                        "Check the tool registrations for this agent instance.".to_string(),
                    ),
                },
            );
        };

        match handler.call(request.context, &call.args).await {
            Ok(output) => ToolResult::ok(call, output),
            Err(error) => {
                tracing::debug!(
                    tool = %call.name,
                    tool_call_id = %call.id,
                    error = %error.message,
                    "tool handler failed"
                );
                ToolResult::error(
                    call,
                    ToolError {
                        name: "ToolExecutionError".to_string(),
                        message: truncate_error_message(
                            &error.message,
                            request.error_message_limit,
                        ),
                        code: error.code,
                        suggestion: error.suggestion,
                    },
                )
            }
        }
    }
}

/// The hard catalog-gate rejection.
pub(crate) fn not_in_catalog_result(call: &ToolCall) -> ToolResult {
    ToolResult::error(
        call,
        ToolError {
            name: "ToolNotInCatalogError".to_string(),
            message: format!(
                "Tool '{}' is not available in the current tool catalog.",
                call.name
            ),
            code: Some("E_TOOL_NOT_IN_CATALOG".to_string()),
            suggestion: Some(
                "Add the tool to the agent's tool list or register it from a step.tools handler."
                    .to_string(),
            ),
        },
    )
}

/// Extension tools get their origin stamped into the catalog item.
pub(crate) fn stamp_extension_source(mut item: ToolCatalogItem, extension_name: &str) -> ToolCatalogItem {
    if item.source.is_none() {
        item.source = Some(ToolSource::Extension {
            extension_name: extension_name.to_string(),
        });
    }
    item
}

mod validation {
    //! Argument validation against a catalog item's JSON-schema parameters.
    //!
    //! Covers the subset tool schemas actually use: `type` (single or
    //! list), `required`, nested `properties`, `items`, `enum`, and
    //! `additionalProperties: false`.

    use serde_json::Value;

    pub struct Issue {
        pub path: String,
        pub message: String,
    }

    pub fn validate_args(args: &Value, schema: &Value, root: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        validate_value(args, schema, root, &mut issues);
        issues
    }

    fn validate_value(value: &Value, schema: &Value, path: &str, issues: &mut Vec<Issue>) {
        let Some(schema) = schema.as_object() else {
            return;
        };

        let expected = expected_types(schema.get("type"));
        if !expected.is_empty() && !expected.iter().any(|t| matches_type(value, t)) {
            issues.push(Issue {
                path: path.to_string(),
                message: format!(
                    "expected {} but got {}",
                    expected.join("|"),
                    type_name(value)
                ),
            });
            return;
        }

        if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
            if !allowed.is_empty() && !allowed.contains(value) {
                issues.push(Issue {
                    path: path.to_string(),
                    message: format!(
                        "value must be one of [{}]",
                        allowed
                            .iter()
                            .map(Value::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                });
                return;
            }
        }

        if let Some(object) = value.as_object() {
            let properties = schema.get("properties").and_then(Value::as_object);

            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for key in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(key) {
                        issues.push(Issue {
                            path: format!("{}.{}", path, key),
                            message: "required property is missing".to_string(),
                        });
                    }
                }
            }

            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                for key in object.keys() {
                    let known = properties.map(|p| p.contains_key(key)).unwrap_or(false);
                    if !known {
                        issues.push(Issue {
                            path: format!("{}.{}", path, key),
                            message: "unexpected property".to_string(),
                        });
                    }
                }
            }

            if let Some(properties) = properties {
                for (key, child_schema) in properties {
                    if let Some(child) = object.get(key) {
                        validate_value(child, child_schema, &format!("{}.{}", path, key), issues);
                    }
                }
            }
        }

        if let (Some(array), Some(items)) = (value.as_array(), schema.get("items")) {
            for (index, entry) in array.iter().enumerate() {
                validate_value(entry, items, &format!("{}[{}]", path, index), issues);
            }
        }
    }

    fn expected_types(spec: Option<&Value>) -> Vec<String> {
        match spec {
            Some(Value::String(t)) => vec![t.clone()],
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn matches_type(value: &Value, expected: &str) -> bool {
        match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        }
    }

    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    const MAX_REPORTED_ISSUES: usize = 5;

    pub fn format_issues(tool_name: &str, issues: &[Issue]) -> String {
        let visible: Vec<String> = issues
            .iter()
            .take(MAX_REPORTED_ISSUES)
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect();
        let suffix = if issues.len() > MAX_REPORTED_ISSUES {
            format!("; +{} more issues", issues.len() - MAX_REPORTED_ISSUES)
        } else {
            String::new()
        };
        format!(
            "Invalid arguments for tool '{}': {}{}",
            tool_name,
            visible.join("; "),
            suffix
        )
    }

    pub fn schema_hint(schema: &Value) -> String {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let allowed = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|p| p.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        format!(
            "Re-check the input schema. required=[{}], allowed=[{}]",
            required, allowed
        )
    }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
