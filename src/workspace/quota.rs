/// Quota/limit accounting per workspace plan
///
/// Counter-backed resources (workflows, custom scripts, storage bytes) are
/// charged with a single conditional UPDATE so concurrent creators can never
/// push a counter past its plan limit; the loser observes zero affected rows
/// and re-reads the counter to report `{resource, current, limit}`.
/// Execution quotas (concurrent, monthly) are computed from the executions
/// table at admission time.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::workspace::plans::PlanCatalog;
use crate::workspace::storage::now_rfc3339;
use crate::workspace::types::{Feature, PlanLimits, PlanTier};

/// Plan-limit enforcement for workspace-scoped creates and execution admission
#[derive(Clone)]
pub struct QuotaAccountant {
    pool: SqlitePool,
    plans: Arc<PlanCatalog>,
}

impl QuotaAccountant {
    pub fn new(pool: SqlitePool, plans: Arc<PlanCatalog>) -> Self {
        Self { pool, plans }
    }

    /// Limits in force for a workspace (reads the plan column)
    pub async fn limits_for(&self, workspace_id: &str) -> Result<PlanLimits> {
        let row = sqlx::query("SELECT plan FROM workspaces WHERE id = ? AND deleted_at IS NULL")
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workspace", id: workspace_id.to_string() })?;
        let plan_str: String = row.get("plan");
        let tier = PlanTier::parse(&plan_str)
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt plan tier '{}'", plan_str)))?;
        Ok(self.plans.limits(tier))
    }

    /// Whether the workspace's plan grants a feature
    pub async fn feature_enabled(&self, workspace_id: &str, feature: Feature) -> Result<bool> {
        Ok(self.limits_for(workspace_id).await?.feature(feature))
    }

    /// Suspended workspaces are refused at execution admission
    pub async fn ensure_not_suspended(&self, workspace_id: &str) -> Result<()> {
        let row = sqlx::query("SELECT is_suspended FROM workspaces WHERE id = ? AND deleted_at IS NULL")
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workspace", id: workspace_id.to_string() })?;
        if row.get::<i64, _>("is_suspended") != 0 {
            return Err(Error::Forbidden("workspace is suspended".to_string()));
        }
        Ok(())
    }

    /// Charge one workflow against the workspace counter
    pub async fn charge_workflow(&self, workspace_id: &str) -> Result<()> {
        let limits = self.limits_for(workspace_id).await?;
        self.charge_counter(workspace_id, "current_workflow_count", 1, limits.max_workflows, "workflows")
            .await
    }

    pub async fn release_workflow(&self, workspace_id: &str) -> Result<()> {
        self.release_counter(workspace_id, "current_workflow_count", 1).await
    }

    /// Charge one custom script against the workspace counter
    pub async fn charge_custom_script(&self, workspace_id: &str) -> Result<()> {
        let limits = self.limits_for(workspace_id).await?;
        self.charge_counter(
            workspace_id,
            "current_custom_script_count",
            1,
            limits.max_custom_scripts,
            "custom_scripts",
        )
        .await
    }

    pub async fn release_custom_script(&self, workspace_id: &str) -> Result<()> {
        self.release_counter(workspace_id, "current_custom_script_count", 1).await
    }

    /// Reserve storage bytes; also enforces the per-file size cap
    pub async fn reserve_storage(&self, workspace_id: &str, bytes: i64) -> Result<()> {
        let limits = self.limits_for(workspace_id).await?;
        if bytes > limits.max_file_bytes {
            return Err(Error::QuotaExceeded {
                resource: "file_bytes",
                current: bytes,
                limit: limits.max_file_bytes,
            });
        }
        self.charge_counter(
            workspace_id,
            "current_storage_bytes",
            bytes,
            limits.max_storage_bytes,
            "storage_bytes",
        )
        .await
    }

    pub async fn release_storage(&self, workspace_id: &str, bytes: i64) -> Result<()> {
        self.release_counter(workspace_id, "current_storage_bytes", bytes).await
    }

    /// API keys are counted from their table rather than a counter column
    pub async fn check_api_key_limit(&self, workspace_id: &str) -> Result<()> {
        let limits = self.limits_for(workspace_id).await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_keys WHERE workspace_id = ? AND deleted_at IS NULL",
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        let current: i64 = row.get("n");
        if current >= limits.max_api_keys {
            return Err(Error::QuotaExceeded {
                resource: "api_keys",
                current,
                limit: limits.max_api_keys,
            });
        }
        Ok(())
    }

    /// Admission check: live executions must stay under the plan's cap
    pub async fn check_concurrent_executions(&self, workspace_id: &str) -> Result<()> {
        let limits = self.limits_for(workspace_id).await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM executions WHERE workspace_id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        let current: i64 = row.get("n");
        if current >= limits.max_concurrent_executions {
            return Err(Error::QuotaExceeded {
                resource: "concurrent_executions",
                current,
                limit: limits.max_concurrent_executions,
            });
        }
        Ok(())
    }

    /// Admission check: executions started since the first of the month
    pub async fn check_monthly_executions(&self, workspace_id: &str) -> Result<()> {
        use chrono::{Datelike, TimeZone, Utc};
        let limits = self.limits_for(workspace_id).await?;
        let now = Utc::now();
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .unwrap()
            .to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM executions WHERE workspace_id = ? AND created_at >= ?",
        )
        .bind(workspace_id)
        .bind(&month_start)
        .fetch_one(&self.pool)
        .await?;
        let current: i64 = row.get("n");
        if current >= limits.max_monthly_executions {
            return Err(Error::QuotaExceeded {
                resource: "monthly_executions",
                current,
                limit: limits.max_monthly_executions,
            });
        }
        Ok(())
    }

    /// increment-if-below in a single statement; zero affected rows means
    /// either a missing workspace or a full counter
    async fn charge_counter(
        &self,
        workspace_id: &str,
        column: &str,
        amount: i64,
        limit: i64,
        resource: &'static str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE workspaces SET {col} = {col} + ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL AND {col} + ? <= ?",
            col = column
        );
        let affected = sqlx::query(&sql)
            .bind(amount)
            .bind(now_rfc3339())
            .bind(workspace_id)
            .bind(amount)
            .bind(limit)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 1 {
            return Ok(());
        }

        let sql = format!("SELECT {} AS n FROM workspaces WHERE id = ? AND deleted_at IS NULL", column);
        let row = sqlx::query(&sql)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workspace", id: workspace_id.to_string() })?;
        Err(Error::QuotaExceeded { resource, current: row.get("n"), limit })
    }

    async fn release_counter(&self, workspace_id: &str, column: &str, amount: i64) -> Result<()> {
        let sql = format!(
            "UPDATE workspaces SET {col} = MAX(0, {col} - ?), updated_at = ? WHERE id = ? AND deleted_at IS NULL",
            col = column
        );
        sqlx::query(&sql)
            .bind(amount)
            .bind(now_rfc3339())
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
