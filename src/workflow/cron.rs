/// Background scheduler for SCHEDULED triggers
///
/// Registers one tokio-cron-scheduler job per enabled SCHEDULED trigger of
/// an ACTIVE workflow. Jobs are hot-reloaded per workflow: a state
/// transition re-registers or removes that workflow's jobs without touching
/// the rest. A fired job goes through the trigger validator like any other
/// start request, so the run gate and quotas keep applying.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::error::Result;
use crate::security::RequestContext;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::trigger::TriggerValidator;
use crate::workflow::types::{Trigger, TriggerType};

/// Hot-reload cron service for scheduled triggers
pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// trigger id -> registered job uuid, for precise removal
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    workflows: WorkflowStorage,
    validator: Arc<TriggerValidator>,
}

impl CronSchedulerService {
    pub async fn new(workflows: WorkflowStorage, validator: Arc<TriggerValidator>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| crate::error::Error::Internal(anyhow::anyhow!("cron scheduler init failed: {}", e)))?;
        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            workflows,
            validator,
        })
    }

    /// Register all currently-enabled scheduled triggers and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler service");
        let triggers = self.workflows.enabled_scheduled_triggers().await?;
        let count = triggers.len();
        for trigger in triggers {
            if let Err(e) = self.add_or_update_trigger(&trigger).await {
                tracing::error!("❌ Failed to register scheduled trigger {}: {}", trigger.id, e);
            }
        }
        {
            let scheduler = self.scheduler.read().await;
            scheduler
                .start()
                .await
                .map_err(|e| crate::error::Error::Internal(anyhow::anyhow!("cron scheduler start failed: {}", e)))?;
        }
        tracing::info!("✅ Cron scheduler started with {} scheduled triggers", count);
        Ok(())
    }

    /// Re-register a workflow's scheduled triggers after a state transition
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let triggers = self.workflows.triggers_of_workflow(workflow_id).await?;
        let workflow = self.workflows.get_workflow(workflow_id).await?;
        for trigger in triggers {
            if trigger.trigger_type != TriggerType::Scheduled {
                continue;
            }
            let runnable = trigger.is_enabled
                && workflow.status == crate::workflow::types::WorkflowStatus::Active;
            if runnable {
                self.add_or_update_trigger(&trigger).await?;
            } else {
                self.remove_trigger(&trigger.id).await;
            }
        }
        Ok(())
    }

    /// Remove one trigger's job, if registered
    pub async fn remove_trigger(&self, trigger_id: &str) {
        let mut job_uuid_map = self.job_uuid_map.write().await;
        if let Some(job_uuid) = job_uuid_map.remove(trigger_id) {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove cron job for trigger {}: {}", trigger_id, e);
            } else {
                tracing::debug!("🛑 Removed cron job for trigger {}", trigger_id);
            }
        }
    }

    async fn add_or_update_trigger(&self, trigger: &Trigger) -> Result<()> {
        let Some(schedule) = trigger.config.get("schedule").and_then(|s| s.as_str()) else {
            tracing::warn!("⚠️ Scheduled trigger {} has no 'schedule' in its config", trigger.id);
            return Ok(());
        };
        let schedule = schedule.to_string();

        // Replace any previous registration first
        self.remove_trigger(&trigger.id).await;

        let trigger_id = trigger.id.clone();
        let payload = trigger.config.get("payload").cloned().unwrap_or(serde_json::json!({}));
        let validator = Arc::clone(&self.validator);

        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let trigger_id = trigger_id.clone();
            let payload = payload.clone();
            let validator = Arc::clone(&validator);
            Box::pin(async move {
                tracing::debug!("🔔 Scheduled trigger fired: {}", trigger_id);
                let ctx = RequestContext::internal();
                match validator.start(&ctx, &trigger_id, payload).await {
                    Ok(execution) => {
                        tracing::info!(
                            "🚀 Scheduled trigger {} started execution {}",
                            trigger_id,
                            execution.id
                        );
                    }
                    Err(e) => {
                        // Disabled trigger or quota refusal: the schedule
                        // stays registered and simply skips this firing
                        tracing::warn!("⏭️ Scheduled trigger {} skipped: {}", trigger_id, e);
                    }
                }
            })
        })
        .map_err(|e| crate::error::Error::Internal(anyhow::anyhow!("bad cron schedule '{}': {}", schedule, e)))?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler
                .add(job)
                .await
                .map_err(|e| crate::error::Error::Internal(anyhow::anyhow!("cron job registration failed: {}", e)))?
        };
        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.insert(trigger.id.clone(), job_uuid);
        }
        tracing::info!("⏰ Registered scheduled trigger {} ({})", trigger.id, schedule);
        Ok(())
    }
}
