/// Workspace and plan type definitions
///
/// A workspace is the multi-tenancy unit: every workflow, variable,
/// credential, file and API key belongs to exactly one. The plan assigned to
/// a workspace drives both the quota accountant and the rate-limit
/// accountant.

use serde::{Deserialize, Serialize};

/// Subscription tier of a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanTier {
    Freemium,
    Starter,
    Pro,
    Business,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Freemium => "FREEMIUM",
            PlanTier::Starter => "STARTER",
            PlanTier::Pro => "PRO",
            PlanTier::Business => "BUSINESS",
            PlanTier::Enterprise => "ENTERPRISE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FREEMIUM" => Some(PlanTier::Freemium),
            "STARTER" => Some(PlanTier::Starter),
            "PRO" => Some(PlanTier::Pro),
            "BUSINESS" => Some(PlanTier::Business),
            "ENTERPRISE" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }

    pub fn all() -> [PlanTier; 5] {
        [
            PlanTier::Freemium,
            PlanTier::Starter,
            PlanTier::Pro,
            PlanTier::Business,
            PlanTier::Enterprise,
        ]
    }
}

/// Feature flags gated per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Webhooks,
    Scheduling,
    CustomScripts,
    ApiAccess,
    ExportData,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Webhooks => "can_use_webhooks",
            Feature::Scheduling => "can_use_scheduling",
            Feature::CustomScripts => "can_use_custom_scripts",
            Feature::ApiAccess => "can_use_api_access",
            Feature::ExportData => "can_export_data",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "can_use_webhooks" => Some(Feature::Webhooks),
            "can_use_scheduling" => Some(Feature::Scheduling),
            "can_use_custom_scripts" => Some(Feature::CustomScripts),
            "can_use_api_access" => Some(Feature::ApiAccess),
            "can_export_data" => Some(Feature::ExportData),
            _ => None,
        }
    }
}

/// Per-plan quota/feature profile, consumed by the accountants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_members: i64,
    pub max_workflows: i64,
    pub max_custom_scripts: i64,
    pub max_storage_bytes: i64,
    pub max_file_bytes: i64,
    pub max_api_keys: i64,
    pub max_monthly_executions: i64,
    pub max_concurrent_executions: i64,
    pub api_rate_limit_per_minute: i64,
    pub api_rate_limit_per_hour: i64,
    pub api_rate_limit_per_day: i64,
    pub can_use_webhooks: bool,
    pub can_use_scheduling: bool,
    pub can_use_custom_scripts: bool,
    pub can_use_api_access: bool,
    pub can_export_data: bool,
}

impl PlanLimits {
    /// Whether the plan grants a feature
    pub fn feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::Webhooks => self.can_use_webhooks,
            Feature::Scheduling => self.can_use_scheduling,
            Feature::CustomScripts => self.can_use_custom_scripts,
            Feature::ApiAccess => self.can_use_api_access,
            Feature::ExportData => self.can_export_data,
        }
    }

    /// Built-in profile for a tier, also used to seed the plans table
    pub fn defaults_for(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Freemium => Self {
                max_members: 3,
                max_workflows: 5,
                max_custom_scripts: 3,
                max_storage_bytes: 100 * 1024 * 1024,
                max_file_bytes: 5 * 1024 * 1024,
                max_api_keys: 2,
                max_monthly_executions: 1_000,
                max_concurrent_executions: 2,
                api_rate_limit_per_minute: 100,
                api_rate_limit_per_hour: 2_000,
                api_rate_limit_per_day: 20_000,
                can_use_webhooks: true,
                can_use_scheduling: false,
                can_use_custom_scripts: false,
                can_use_api_access: true,
                can_export_data: false,
            },
            PlanTier::Starter => Self {
                max_members: 5,
                max_workflows: 20,
                max_custom_scripts: 10,
                max_storage_bytes: 1024 * 1024 * 1024,
                max_file_bytes: 25 * 1024 * 1024,
                max_api_keys: 5,
                max_monthly_executions: 10_000,
                max_concurrent_executions: 5,
                api_rate_limit_per_minute: 300,
                api_rate_limit_per_hour: 10_000,
                api_rate_limit_per_day: 100_000,
                can_use_webhooks: true,
                can_use_scheduling: true,
                can_use_custom_scripts: true,
                can_use_api_access: true,
                can_export_data: false,
            },
            PlanTier::Pro => Self {
                max_members: 15,
                max_workflows: 100,
                max_custom_scripts: 50,
                max_storage_bytes: 10 * 1024 * 1024 * 1024,
                max_file_bytes: 100 * 1024 * 1024,
                max_api_keys: 20,
                max_monthly_executions: 100_000,
                max_concurrent_executions: 20,
                api_rate_limit_per_minute: 600,
                api_rate_limit_per_hour: 30_000,
                api_rate_limit_per_day: 500_000,
                can_use_webhooks: true,
                can_use_scheduling: true,
                can_use_custom_scripts: true,
                can_use_api_access: true,
                can_export_data: true,
            },
            PlanTier::Business => Self {
                max_members: 50,
                max_workflows: 500,
                max_custom_scripts: 200,
                max_storage_bytes: 100 * 1024 * 1024 * 1024,
                max_file_bytes: 250 * 1024 * 1024,
                max_api_keys: 50,
                max_monthly_executions: 1_000_000,
                max_concurrent_executions: 50,
                api_rate_limit_per_minute: 1_200,
                api_rate_limit_per_hour: 60_000,
                api_rate_limit_per_day: 1_000_000,
                can_use_webhooks: true,
                can_use_scheduling: true,
                can_use_custom_scripts: true,
                can_use_api_access: true,
                can_export_data: true,
            },
            PlanTier::Enterprise => Self {
                max_members: 1_000,
                max_workflows: 10_000,
                max_custom_scripts: 5_000,
                max_storage_bytes: 1024i64 * 1024 * 1024 * 1024,
                max_file_bytes: 1024 * 1024 * 1024,
                max_api_keys: 500,
                max_monthly_executions: 100_000_000,
                max_concurrent_executions: 500,
                api_rate_limit_per_minute: 6_000,
                api_rate_limit_per_hour: 300_000,
                api_rate_limit_per_day: 5_000_000,
                can_use_webhooks: true,
                can_use_scheduling: true,
                can_use_custom_scripts: true,
                can_use_api_access: true,
                can_export_data: true,
            },
        }
    }
}

/// A registered user; membership/role management lives outside the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User identifier (USR-…)
    pub id: String,
    pub email: String,
    pub display_name: String,
}

/// A tenant workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace identifier (WSP-…)
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    /// URL-safe unique slug
    pub slug: String,
    pub plan: PlanTier,
    pub is_suspended: bool,
    /// Derived counters, kept transactionally consistent with the resources
    pub current_workflow_count: i64,
    pub current_custom_script_count: i64,
    pub current_storage_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A workspace-scoped key/value variable; the value is sealed when secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Variable identifier (VAR-…)
    pub id: String,
    pub workspace_id: String,
    pub key: String,
    /// Plaintext for non-secret variables, sealed blob otherwise
    pub value: String,
    pub is_secret: bool,
}

/// A stored credential; sensitive fields live in the sealed portion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Credential identifier (CRD-…)
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub credential_type: String,
    /// Non-sensitive fields, stored in the clear
    pub data: serde_json::Value,
    /// Sensitive fields as a sealed JSON object (api_token, password, …)
    pub sealed_data: String,
}

/// A database-connection descriptor; the password is stored sealed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConnection {
    /// Database identifier (DB-…)
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub engine: String,
    pub host: String,
    pub port: i64,
    pub database_name: String,
    pub username: String,
    /// Sealed blob, decrypted only at reference-resolution time
    pub sealed_password: String,
}

/// Workspace-scoped file metadata; bytes live on disk at `path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// File identifier (FIL-…)
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

/// Workspace-scoped API key record (hash + display fields only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// API key identifier (AKY-…)
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub key_hash: String,
    pub prefix: String,
    pub last_four: String,
    pub permissions: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub usage_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trip() {
        for tier in PlanTier::all() {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::parse("GOLD"), None);
    }

    #[test]
    fn freemium_is_the_floor() {
        let free = PlanLimits::defaults_for(PlanTier::Freemium);
        let pro = PlanLimits::defaults_for(PlanTier::Pro);
        assert!(free.max_workflows < pro.max_workflows);
        assert!(free.api_rate_limit_per_minute < pro.api_rate_limit_per_minute);
        assert!(!free.can_export_data);
        assert!(pro.can_export_data);
        assert_eq!(free.api_rate_limit_per_minute, 100);
    }

    #[test]
    fn feature_lookup_matches_flags() {
        let starter = PlanLimits::defaults_for(PlanTier::Starter);
        assert!(starter.feature(Feature::Scheduling));
        assert!(!starter.feature(Feature::ExportData));
        assert_eq!(Feature::parse("can_export_data"), Some(Feature::ExportData));
    }
}
