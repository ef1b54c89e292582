/// Trigger validation and execution admission
///
/// Every start request passes through here: the trigger must exist and be
/// enabled, its workflow must be ACTIVE (the run gate), the caller-supplied
/// payload must satisfy the trigger's input mapping, plan feature flags and
/// execution quotas must allow the run. Only then is an Execution allocated
/// and handed to the planner.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::execution::planner::ExecutionPlanner;
use crate::execution::storage::ExecutionStorage;
use crate::execution::types::Execution;
use crate::security::RequestContext;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{value_assignable, Trigger, TriggerType, WorkflowStatus};
use crate::workspace::quota::QuotaAccountant;
use crate::workspace::types::Feature;

/// Validates start requests and admits executions
#[derive(Clone)]
pub struct TriggerValidator {
    workflows: WorkflowStorage,
    executions: ExecutionStorage,
    planner: ExecutionPlanner,
    quota: QuotaAccountant,
}

impl TriggerValidator {
    pub fn new(
        workflows: WorkflowStorage,
        executions: ExecutionStorage,
        planner: ExecutionPlanner,
        quota: QuotaAccountant,
    ) -> Self {
        Self { workflows, executions, planner, quota }
    }

    /// Start an execution through a specific trigger
    pub async fn start(
        &self,
        ctx: &RequestContext,
        trigger_id: &str,
        payload: Value,
    ) -> Result<Execution> {
        let trigger = self.workflows.get_trigger(trigger_id).await?;
        self.start_with_trigger(ctx, &trigger, payload).await
    }

    /// Start an execution through the workflow's DEFAULT trigger
    pub async fn start_default(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        payload: Value,
    ) -> Result<Execution> {
        let trigger = self.workflows.default_trigger(workflow_id).await?;
        self.start_with_trigger(ctx, &trigger, payload).await
    }

    async fn start_with_trigger(
        &self,
        ctx: &RequestContext,
        trigger: &Trigger,
        payload: Value,
    ) -> Result<Execution> {
        if !trigger.is_enabled {
            return Err(Error::TriggerDisabled(trigger.id.clone()));
        }
        // Run gate: workflow ACTIVE and trigger enabled
        let workflow = self.workflows.get_workflow(&trigger.workflow_id).await?;
        if workflow.status != WorkflowStatus::Active {
            return Err(Error::TriggerDisabled(format!(
                "workflow {} is {}, not ACTIVE",
                workflow.id,
                workflow.status.as_str()
            )));
        }

        // Plan feature flags gate the trigger kind
        let gated_feature = match trigger.trigger_type {
            TriggerType::Webhook => Some(Feature::Webhooks),
            TriggerType::Scheduled => Some(Feature::Scheduling),
            TriggerType::Manual | TriggerType::Event => None,
        };
        if let Some(feature) = gated_feature {
            if !self.quota.feature_enabled(&workflow.workspace_id, feature).await? {
                return Err(Error::Forbidden(format!(
                    "the workspace plan does not include {}",
                    feature.as_str()
                )));
            }
        }

        validate_payload(trigger, &payload)?;

        // Backpressure: admission refuses once the plan caps are reached
        self.quota.ensure_not_suspended(&workflow.workspace_id).await?;
        self.quota.check_concurrent_executions(&workflow.workspace_id).await?;
        self.quota.check_monthly_executions(&workflow.workspace_id).await?;

        let execution = self
            .executions
            .create_execution(&workflow.workspace_id, &workflow.id, Some(&trigger.id), payload)
            .await?;
        tracing::info!(
            "🚀 Trigger {} admitted execution {} for workflow {} (trace {})",
            trigger.id,
            execution.id,
            workflow.id,
            ctx.trace_id
        );

        self.planner.plan(&execution).await?;
        self.executions.get_execution(&execution.id).await
    }
}

/// Enforce the trigger's input mapping against a caller payload
fn validate_payload(trigger: &Trigger, payload: &Value) -> Result<()> {
    let fields = match payload {
        Value::Object(map) => map,
        Value::Null => {
            // Missing payload only passes when nothing is required
            if trigger.input_mapping.values().any(|f| f.required) {
                return Err(Error::Validation("payload is required by the trigger".to_string()));
            }
            return Ok(());
        }
        _ => return Err(Error::Validation("trigger payload must be a JSON object".to_string())),
    };

    for (name, field) in &trigger.input_mapping {
        match fields.get(name) {
            Some(value) => {
                if !value_assignable(field.field_type, value) {
                    return Err(Error::Validation(format!(
                        "payload field '{}' is not assignable to {}",
                        name,
                        field.field_type.as_str()
                    )));
                }
            }
            None if field.required => {
                return Err(Error::Validation(format!(
                    "payload field '{}' is required",
                    name
                )));
            }
            None => {}
        }
    }
    if trigger.strict {
        for name in fields.keys() {
            if !trigger.input_mapping.contains_key(name) {
                return Err(Error::Validation(format!(
                    "payload field '{}' is not declared by the trigger",
                    name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{ParamType, SchemaField};
    use serde_json::json;
    use std::collections::HashMap;

    fn trigger(mapping: &[(&str, ParamType, bool)], strict: bool) -> Trigger {
        Trigger {
            id: "TRG-0011223344556677".to_string(),
            workflow_id: "WFL-0011223344556677".to_string(),
            name: "DEFAULT".to_string(),
            trigger_type: TriggerType::Webhook,
            config: json!({}),
            input_mapping: mapping
                .iter()
                .map(|(name, t, required)| {
                    (name.to_string(), SchemaField { field_type: *t, required: *required })
                })
                .collect::<HashMap<_, _>>(),
            strict,
            is_enabled: true,
            is_default: true,
        }
    }

    #[test]
    fn required_fields_are_enforced() {
        let t = trigger(&[("seed", ParamType::Integer, true)], false);
        validate_payload(&t, &json!({"seed": 7})).unwrap();
        assert!(matches!(validate_payload(&t, &json!({})), Err(Error::Validation(_))));
        assert!(matches!(validate_payload(&t, &Value::Null), Err(Error::Validation(_))));
    }

    #[test]
    fn field_types_are_enforced() {
        let t = trigger(&[("seed", ParamType::Integer, true)], false);
        assert!(matches!(
            validate_payload(&t, &json!({"seed": "not a number"})),
            Err(Error::Validation(_))
        ));
        validate_payload(&t, &json!({"seed": "12"})).unwrap();
    }

    #[test]
    fn strict_triggers_reject_unknown_fields() {
        let lax = trigger(&[("seed", ParamType::Integer, true)], false);
        validate_payload(&lax, &json!({"seed": 1, "extra": true})).unwrap();

        let strict = trigger(&[("seed", ParamType::Integer, true)], true);
        assert!(matches!(
            validate_payload(&strict, &json!({"seed": 1, "extra": true})),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn empty_mapping_accepts_anything_when_lax() {
        let t = trigger(&[], false);
        validate_payload(&t, &json!({"whatever": [1, 2, 3]})).unwrap();
        validate_payload(&t, &Value::Null).unwrap();
    }
}
