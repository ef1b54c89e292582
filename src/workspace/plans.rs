/// Lock-free plan catalog using ArcSwap
///
/// Plan limit profiles are read on every quota check and rate-limit decision
/// but change only when an operator edits the plans table. The catalog keeps
/// the whole tier->limits map behind an atomic pointer swap so the hot path
/// never takes a lock.

use arc_swap::ArcSwap;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::workspace::types::{PlanLimits, PlanTier};

/// Process-wide catalog of plan limit profiles
#[derive(Debug)]
pub struct PlanCatalog {
    plans: ArcSwap<HashMap<PlanTier, PlanLimits>>,
}

impl PlanCatalog {
    /// Catalog preloaded with the built-in profiles
    pub fn with_defaults() -> Self {
        let mut map = HashMap::new();
        for tier in PlanTier::all() {
            map.insert(tier, PlanLimits::defaults_for(tier));
        }
        Self { plans: ArcSwap::new(Arc::new(map)) }
    }

    /// Limits for a tier (falls back to built-ins if a row went missing)
    pub fn limits(&self, tier: PlanTier) -> PlanLimits {
        self.plans
            .load()
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| PlanLimits::defaults_for(tier))
    }

    /// Reload the catalog from the plans table in one atomic swap
    pub async fn reload(&self, pool: &SqlitePool) -> Result<()> {
        let rows = sqlx::query("SELECT tier, limits FROM plans")
            .fetch_all(pool)
            .await?;

        let mut map = HashMap::new();
        for row in rows {
            let tier_str: String = row.get("tier");
            let limits_json: String = row.get("limits");
            if let Some(tier) = PlanTier::parse(&tier_str) {
                let limits: PlanLimits = serde_json::from_str(&limits_json)?;
                map.insert(tier, limits);
            } else {
                tracing::warn!("⚠️ Skipping unknown plan tier in catalog: {}", tier_str);
            }
        }
        // Missing tiers keep their built-in profiles
        for tier in PlanTier::all() {
            map.entry(tier).or_insert_with(|| PlanLimits::defaults_for(tier));
        }

        self.plans.store(Arc::new(map));
        tracing::info!("📊 Plan catalog reloaded with {} tiers", self.plans.load().len());
        Ok(())
    }
}
