/// Idempotent setup: schema creation and seed data
///
/// Creates every table, seeds the five plan profiles and the global `echo`
/// script (the no-op used by smoke tests), and verifies auxiliary service
/// configuration. Safe to run repeatedly; operator-edited plan rows are
/// left untouched.

use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::execution::storage::ExecutionStorage;
use crate::security::SecretBox;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ParamType, SchemaField};
use crate::workspace::storage::{now_rfc3339, WorkspaceStorage};
use crate::workspace::types::{PlanLimits, PlanTier};

/// Lua source of the seeded no-op script: echoes its params back
const ECHO_SCRIPT: &str = "return { ok = true, [\"in\"] = params }\n";

/// Run the full setup against the configured database
pub async fn run_setup(config: &Config) -> Result<()> {
    let pool = crate::server::connect_pool(config).await?;
    tracing::info!("🔧 Creating schema");
    init_all_schemas(config, &pool).await?;
    tracing::info!("🌱 Seeding plans");
    seed_plans(&pool).await?;
    tracing::info!("🌱 Seeding global scripts");
    seed_global_scripts(config, &pool).await?;
    verify_auxiliary(config);
    tracing::info!("✅ Setup complete");
    Ok(())
}

/// Create every layer's tables (idempotent)
pub async fn init_all_schemas(config: &Config, pool: &SqlitePool) -> Result<()> {
    let secrets = Arc::new(SecretBox::new(&config.encryption_key));
    WorkspaceStorage::new(pool.clone(), secrets).init_schema().await?;
    WorkflowStorage::new(pool.clone()).init_schema().await?;
    ExecutionStorage::new(pool.clone()).init_schema().await?;
    Ok(())
}

/// Insert the built-in plan profiles, keeping operator edits
pub async fn seed_plans(pool: &SqlitePool) -> Result<()> {
    let now = now_rfc3339();
    for tier in PlanTier::all() {
        let limits = PlanLimits::defaults_for(tier);
        sqlx::query(
            r#"
            INSERT INTO plans (tier, limits, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tier) DO NOTHING
            "#,
        )
        .bind(tier.as_str())
        .bind(serde_json::to_string(&limits)?)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Seed the global `echo` script and write its on-disk artifact
pub async fn seed_global_scripts(config: &Config, pool: &SqlitePool) -> Result<()> {
    let workflows = WorkflowStorage::new(pool.clone());
    if workflows.get_script_by_name("echo").await.is_ok() {
        tracing::debug!("📋 Global script 'echo' already seeded");
        return Ok(());
    }

    let scripts_dir = scripts_dir(config);
    std::fs::create_dir_all(&scripts_dir)?;
    let artifact = scripts_dir.join("echo.lua");
    std::fs::write(&artifact, ECHO_SCRIPT)?;

    let mut input_schema = std::collections::HashMap::new();
    input_schema.insert(
        "x".to_string(),
        SchemaField { field_type: ParamType::Integer, required: false },
    );
    input_schema.insert(
        "y".to_string(),
        SchemaField { field_type: ParamType::Boolean, required: false },
    );
    input_schema.insert(
        "z".to_string(),
        SchemaField { field_type: ParamType::Boolean, required: false },
    );
    input_schema.insert(
        "pw".to_string(),
        SchemaField { field_type: ParamType::Password, required: false },
    );
    workflows
        .create_script(
            "echo",
            ECHO_SCRIPT,
            artifact.to_str().unwrap_or("data/scripts/echo.lua"),
            "lua",
            input_schema,
            serde_json::json!({ "ok": { "type": "boolean" }, "in": { "type": "object" } }),
        )
        .await?;
    tracing::info!("🌱 Seeded global script 'echo' at {}", artifact.display());
    Ok(())
}

fn scripts_dir(config: &Config) -> PathBuf {
    if config.database.dsn == ":memory:" {
        return PathBuf::from("data/scripts");
    }
    match std::path::Path::new(&config.database.dsn).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("scripts"),
        _ => PathBuf::from("data/scripts"),
    }
}

fn verify_auxiliary(config: &Config) {
    match &config.redis {
        Some(redis) => tracing::info!(
            "📡 Rate-limit counter store configured at {}:{} (in-process counters are used by this build)",
            redis.host,
            redis.port
        ),
        None => tracing::info!("📡 No external counter store configured; rate limiting is in-process"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn setup_is_idempotent_and_seeds_plans() {
        let config = Config::for_tests();
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        init_all_schemas(&config, &pool).await.unwrap();
        seed_plans(&pool).await.unwrap();
        seed_plans(&pool).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM plans").fetch_one(&pool).await.unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 5);
    }

    #[tokio::test]
    async fn operator_plan_edits_survive_reseeding() {
        let config = Config::for_tests();
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        init_all_schemas(&config, &pool).await.unwrap();
        seed_plans(&pool).await.unwrap();

        sqlx::query("UPDATE plans SET limits = ? WHERE tier = 'FREEMIUM'")
            .bind(serde_json::to_string(&PlanLimits::defaults_for(PlanTier::Pro)).unwrap())
            .execute(&pool)
            .await
            .unwrap();
        seed_plans(&pool).await.unwrap();

        let row = sqlx::query("SELECT limits FROM plans WHERE tier = 'FREEMIUM'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let limits: PlanLimits = serde_json::from_str(&row.get::<String, _>("limits")).unwrap();
        assert_eq!(limits.max_workflows, PlanLimits::defaults_for(PlanTier::Pro).max_workflows);
    }
}
