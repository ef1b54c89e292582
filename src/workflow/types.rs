/// Core workflow type definitions
///
/// Workflows, nodes, edges, triggers and scripts as persisted entities.
/// Node parameters are declared with a type and may carry reference
/// templates (`${type:id.path}`) that stay unresolved until dispatch time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Draft,
    Active,
    Deactivated,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "DRAFT",
            WorkflowStatus::Active => "ACTIVE",
            WorkflowStatus::Deactivated => "DEACTIVATED",
            WorkflowStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(WorkflowStatus::Draft),
            "ACTIVE" => Some(WorkflowStatus::Active),
            "DEACTIVATED" => Some(WorkflowStatus::Deactivated),
            "ARCHIVED" => Some(WorkflowStatus::Archived),
            _ => None,
        }
    }
}

/// A workflow definition; its graph lives in the nodes/edges tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier (WFL-…)
    pub id: String,
    pub workspace_id: String,
    /// Unique within the workspace
    pub name: String,
    pub status: WorkflowStatus,
    /// Execution priority, >= 1; higher claims first
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Declared type of a node parameter; drives resolver coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    Email,
    Url,
    Password,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Email => "email",
            ParamType::Url => "url",
            ParamType::Password => "password",
        }
    }
}

/// One declared node parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParam {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Literal value or reference template, copied verbatim into snapshots
    pub value: Value,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier (NOD-…)
    pub id: String,
    pub workflow_id: String,
    pub workspace_id: String,
    /// Unique within the workflow
    pub name: String,
    /// Global script reference; exactly one of the two refs is set
    pub script_ref: Option<String>,
    /// Workspace-scoped custom script reference
    pub custom_script_ref: Option<String>,
    pub input_params: HashMap<String, InputParam>,
    /// Worker-side retry budget for transient in-script errors
    pub max_retries: i64,
    /// Worker-side per-attempt timeout
    pub timeout_seconds: i64,
}

/// Directed connection between two nodes of the same workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier (EDG-…)
    pub id: String,
    pub workflow_id: String,
    pub from_node: String,
    pub to_node: String,
}

/// How a trigger converts an external event into an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Manual,
    Scheduled,
    Webhook,
    Event,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Manual => "MANUAL",
            TriggerType::Scheduled => "SCHEDULED",
            TriggerType::Webhook => "WEBHOOK",
            TriggerType::Event => "EVENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MANUAL" => Some(TriggerType::Manual),
            "SCHEDULED" => Some(TriggerType::Scheduled),
            "WEBHOOK" => Some(TriggerType::Webhook),
            "EVENT" => Some(TriggerType::Event),
            _ => None,
        }
    }
}

/// Declared shape of one payload/schema field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    #[serde(rename = "type")]
    pub field_type: ParamType,
    #[serde(default)]
    pub required: bool,
}

/// A workflow-owned trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger identifier (TRG-…)
    pub id: String,
    pub workflow_id: String,
    /// Unique within the workflow; the mandatory one is named DEFAULT
    pub name: String,
    pub trigger_type: TriggerType,
    /// Type-specific configuration (cron schedule, event topic, …)
    pub config: Value,
    /// Declared payload fields enforced on every start request
    pub input_mapping: HashMap<String, SchemaField>,
    /// Strict triggers reject payload fields outside the mapping
    pub strict: bool,
    pub is_enabled: bool,
    /// The non-deletable DEFAULT webhook trigger created with the workflow
    pub is_default: bool,
}

/// Review state of a workspace-submitted custom script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    RevisionNeeded,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::RevisionNeeded => "REVISION_NEEDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            "REVISION_NEEDED" => Some(ApprovalStatus::RevisionNeeded),
            _ => None,
        }
    }
}

/// Test pipeline state of a custom script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Untested,
    Testing,
    Passed,
    Failed,
    Partial,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Untested => "UNTESTED",
            TestStatus::Testing => "TESTING",
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Partial => "PARTIAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNTESTED" => Some(TestStatus::Untested),
            "TESTING" => Some(TestStatus::Testing),
            "PASSED" => Some(TestStatus::Passed),
            "FAILED" => Some(TestStatus::Failed),
            "PARTIAL" => Some(TestStatus::Partial),
            _ => None,
        }
    }
}

/// A script artifact referenced by nodes; content is immutable after create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Script identifier (SCR-… or CUS-…)
    pub id: String,
    /// Set only for workspace-scoped custom scripts
    pub workspace_id: Option<String>,
    pub name: String,
    pub content: String,
    /// On-disk artifact, value-copied into execution snapshots
    pub file_path: String,
    /// Runtime selector flowing into the dispatch record
    pub process_type: String,
    pub required_packages: Vec<String>,
    pub input_schema: HashMap<String, SchemaField>,
    pub output_schema: Value,
    /// PENDING until reviewed; only APPROVED scripts dispatch
    pub approval_status: Option<ApprovalStatus>,
    pub test_status: Option<TestStatus>,
}

/// Whether a JSON value is assignable to a declared parameter type
///
/// References are checked at resolution time instead; strings that look like
/// numbers count for integer/float because coercion parses them.
pub fn value_assignable(param_type: ParamType, value: &Value) -> bool {
    match param_type {
        ParamType::String | ParamType::Email | ParamType::Url | ParamType::Password => {
            value.is_string() || value.is_number() || value.is_boolean()
        }
        ParamType::Integer => match value {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.parse::<i64>().is_ok(),
            _ => false,
        },
        ParamType::Float => match value {
            Value::Number(_) => true,
            Value::String(s) => s.parse::<f64>().is_ok(),
            _ => false,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => true,
            Value::String(s) => s == "true" || s == "false",
            _ => false,
        },
        ParamType::Array => match value {
            Value::Array(_) => true,
            Value::String(s) => serde_json::from_str::<Value>(s).is_ok_and(|v| v.is_array()),
            _ => false,
        },
        ParamType::Object => match value {
            Value::Object(_) => true,
            Value::String(s) => serde_json::from_str::<Value>(s).is_ok_and(|v| v.is_object()),
            _ => false,
        },
    }
}

/// Detect the reference shape without parsing it fully
pub fn looks_like_reference(value: &Value) -> bool {
    match value.as_str() {
        Some(s) => s.starts_with("${") && s.ends_with('}') && s[2..s.len() - 1].contains(':'),
        None => false,
    }
}

/// Validate declared node parameters against the referenced script's schema
///
/// Every parameter name must be declared, every `required: true` schema
/// entry must be supplied with a non-null value, and literal values must be
/// assignable to their declared type. Reference-bearing values defer their
/// type check to resolution time.
pub fn validate_params_against_schema(
    params: &HashMap<String, InputParam>,
    schema: &HashMap<String, SchemaField>,
) -> Result<()> {
    for name in params.keys() {
        if !schema.contains_key(name) {
            return Err(Error::InvalidInput(format!(
                "parameter '{}' is not declared by the script's input schema",
                name
            )));
        }
    }
    for (name, field) in schema {
        match params.get(name) {
            Some(param) => {
                if param.param_type != field.field_type {
                    return Err(Error::InvalidInput(format!(
                        "parameter '{}' declares type {} but the schema requires {}",
                        name,
                        param.param_type.as_str(),
                        field.field_type.as_str()
                    )));
                }
                let effective = if param.value.is_null() {
                    param.default.as_ref().unwrap_or(&param.value)
                } else {
                    &param.value
                };
                if field.required && effective.is_null() {
                    return Err(Error::InvalidInput(format!(
                        "required parameter '{}' has no value",
                        name
                    )));
                }
                if !effective.is_null()
                    && !looks_like_reference(effective)
                    && !value_assignable(field.field_type, effective)
                {
                    return Err(Error::InvalidInput(format!(
                        "parameter '{}' value is not assignable to {}",
                        name,
                        field.field_type.as_str()
                    )));
                }
            }
            None if field.required => {
                return Err(Error::InvalidInput(format!(
                    "required parameter '{}' is missing",
                    name
                )));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(entries: &[(&str, ParamType, bool)]) -> HashMap<String, SchemaField> {
        entries
            .iter()
            .map(|(name, t, required)| {
                (name.to_string(), SchemaField { field_type: *t, required: *required })
            })
            .collect()
    }

    fn param(t: ParamType, value: Value, required: bool) -> InputParam {
        InputParam { param_type: t, value, required, default: None, description: None }
    }

    #[test]
    fn status_round_trip() {
        for s in [
            WorkflowStatus::Draft,
            WorkflowStatus::Active,
            WorkflowStatus::Deactivated,
            WorkflowStatus::Archived,
        ] {
            assert_eq!(WorkflowStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn reference_detection_needs_colon_inside() {
        assert!(looks_like_reference(&json!("${trigger:seed}")));
        assert!(looks_like_reference(&json!("${node:A.ok}")));
        assert!(!looks_like_reference(&json!("${not a reference}")));
        assert!(!looks_like_reference(&json!("plain string")));
        assert!(!looks_like_reference(&json!(42)));
    }

    #[test]
    fn assignability_follows_canonical_rules() {
        assert!(value_assignable(ParamType::Integer, &json!(7)));
        assert!(value_assignable(ParamType::Integer, &json!("7")));
        assert!(!value_assignable(ParamType::Integer, &json!(7.5)));
        assert!(value_assignable(ParamType::Float, &json!(7)));
        assert!(value_assignable(ParamType::Boolean, &json!("true")));
        assert!(!value_assignable(ParamType::Boolean, &json!("yes")));
        assert!(value_assignable(ParamType::Array, &json!("[1,2]")));
        assert!(!value_assignable(ParamType::Object, &json!("[1,2]")));
    }

    #[test]
    fn schema_validation_catches_undeclared_and_missing() {
        let schema = schema(&[("x", ParamType::Integer, true), ("label", ParamType::String, false)]);

        let mut params = HashMap::new();
        params.insert("x".to_string(), param(ParamType::Integer, json!(3), true));
        validate_params_against_schema(&params, &schema).unwrap();

        params.insert("extra".to_string(), param(ParamType::String, json!("y"), false));
        assert!(validate_params_against_schema(&params, &schema).is_err());
        params.remove("extra");

        params.remove("x");
        assert!(validate_params_against_schema(&params, &schema).is_err());
    }

    #[test]
    fn references_defer_their_type_check() {
        let schema = schema(&[("x", ParamType::Integer, true)]);
        let mut params = HashMap::new();
        params.insert(
            "x".to_string(),
            param(ParamType::Integer, json!("${trigger:seed}"), true),
        );
        validate_params_against_schema(&params, &schema).unwrap();
    }

    #[test]
    fn default_satisfies_required() {
        let schema = schema(&[("x", ParamType::Integer, true)]);
        let mut params = HashMap::new();
        params.insert(
            "x".to_string(),
            InputParam {
                param_type: ParamType::Integer,
                value: Value::Null,
                required: true,
                default: Some(json!(1)),
                description: None,
            },
        );
        validate_params_against_schema(&params, &schema).unwrap();
    }
}
