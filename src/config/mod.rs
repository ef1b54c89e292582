/// Configuration management for the Miniflow service
///
/// Layers an optional `.ini` profile (selected by APP_ENV) under flat
/// environment-variable overrides. Secrets (JWT_SECRET_KEY, ENCRYPTION_KEY)
/// are validated for length at load time so a misconfigured process fails
/// fast instead of sealing data with a weak key.

use anyhow::{bail, Context, Result};
use config::FileFormat;
use serde::{Deserialize, Serialize};

/// Deployment profile, selects the matching `.ini` file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppEnv {
    Local,
    Dev,
    Test,
    Prod,
}

impl AppEnv {
    pub fn as_str(self) -> &'static str {
        match self {
            AppEnv::Local => "local",
            AppEnv::Dev => "dev",
            AppEnv::Test => "test",
            AppEnv::Prod => "prod",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "local" => Ok(AppEnv::Local),
            "dev" => Ok(AppEnv::Dev),
            "test" => Ok(AppEnv::Test),
            "prod" => Ok(AppEnv::Prod),
            other => bail!("unknown APP_ENV '{}', expected local|dev|test|prod", other),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Master key material for the secret box, already length-checked
    pub encryption_key: String,
    /// Recognized for forward compatibility; this build keeps rate-limit
    /// counters in process memory and never connects (see DESIGN.md)
    pub redis: Option<RedisConfig>,
    pub uploads: UploadConfig,
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Whether interactive docs are exposed (local/dev only by default)
    pub expose_docs: bool,
}

/// Persistence backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend selector; only "sqlite" is supported by this build
    pub db_type: String,
    /// SQLite database path, or ":memory:" for tests
    pub dsn: String,
}

/// Bearer-token configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC key for bearer tokens, >= 32 bytes
    pub jwt_secret: String,
    /// Signing algorithm, HS256 unless overridden
    pub jwt_algorithm: String,
    /// Access-token lifetime in minutes
    pub access_token_minutes: i64,
}

/// Rate-limit counter store location (recognized, unused in this build)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

/// File-upload caps consumed by the file surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Hard per-file byte cap regardless of plan
    pub max_file_bytes: i64,
}

/// Input-scheduler / output-collector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How many ready inputs one claim pulls at most
    pub input_batch_size: u32,
    /// How many worker results one collector pass drains at most
    pub output_batch_size: u32,
    /// Adaptive polling floor in milliseconds
    pub poll_floor_ms: u64,
    /// Adaptive polling ceiling in milliseconds
    pub poll_ceiling_ms: u64,
    /// Number of parallel input-scheduler loops
    pub input_loops: u32,
    /// Wall-clock deadline for a whole execution, in seconds
    pub execution_deadline_seconds: i64,
}

impl Config {
    /// Load configuration from `config/{APP_ENV}.ini` plus environment overrides
    pub fn load() -> Result<Self> {
        let env = AppEnv::parse(
            &std::env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()),
        )?;

        let profile_path = format!("config/{}.ini", env.as_str());
        let cfg = config::Config::builder()
            .add_source(config::File::new(&profile_path, FileFormat::Ini).required(false))
            .add_source(config::Environment::default())
            .build()
            .context("failed to assemble configuration sources")?;

        let get_str = |keys: &[&str], default: &str| -> String {
            for key in keys {
                if let Ok(value) = cfg.get_string(key) {
                    return value;
                }
            }
            default.to_string()
        };
        let get_i64 = |keys: &[&str], default: i64| -> i64 {
            for key in keys {
                if let Ok(value) = cfg.get_int(key) {
                    return value;
                }
            }
            default
        };

        let db_type = get_str(&["db_type", "database.db_type"], "sqlite");
        if db_type != "sqlite" {
            bail!(
                "DB_TYPE '{}' is not supported by this build, expected 'sqlite'",
                db_type
            );
        }

        let jwt_secret = get_str(&["jwt_secret_key", "auth.jwt_secret_key"], "");
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET_KEY must be at least 32 bytes");
        }

        let encryption_key = get_str(&["encryption_key", "encryption.key"], "");
        if encryption_key.len() < 32 {
            bail!("ENCRYPTION_KEY must be at least 32 bytes");
        }

        let redis_host = get_str(&["redis_host", "redis.host"], "");
        let redis = if redis_host.is_empty() {
            None
        } else {
            Some(RedisConfig {
                host: redis_host,
                port: get_i64(&["redis_port", "redis.port"], 6379) as u16,
            })
        };

        Ok(Self {
            env,
            server: ServerConfig {
                host: get_str(&["miniflow_host", "server.host"], "0.0.0.0"),
                port: get_i64(&["miniflow_port", "server.port"], 3004) as u16,
                expose_docs: matches!(env, AppEnv::Local | AppEnv::Dev),
            },
            database: DatabaseConfig {
                db_type,
                dsn: get_str(&["database_dsn", "database.dsn"], "data/miniflow.db"),
            },
            auth: AuthConfig {
                jwt_secret,
                jwt_algorithm: get_str(&["jwt_algorithm", "auth.jwt_algorithm"], "HS256"),
                access_token_minutes: get_i64(&["auth.access_token_minutes"], 60),
            },
            encryption_key,
            redis,
            uploads: UploadConfig {
                max_file_bytes: get_i64(&["uploads.max_file_bytes"], 25 * 1024 * 1024),
            },
            scheduler: SchedulerConfig {
                input_batch_size: get_i64(&["scheduler.input_batch_size"], 16) as u32,
                output_batch_size: get_i64(&["scheduler.output_batch_size"], 32) as u32,
                poll_floor_ms: get_i64(&["scheduler.poll_floor_ms"], 25) as u64,
                poll_ceiling_ms: get_i64(&["scheduler.poll_ceiling_ms"], 1000) as u64,
                input_loops: get_i64(&["scheduler.input_loops"], 2) as u32,
                execution_deadline_seconds: get_i64(&["scheduler.execution_deadline_seconds"], 3600),
            },
        })
    }

    /// Fixed configuration for tests: in-memory store, throwaway keys
    pub fn for_tests() -> Self {
        Self {
            env: AppEnv::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                expose_docs: false,
            },
            database: DatabaseConfig {
                db_type: "sqlite".to_string(),
                dsn: ":memory:".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "test-jwt-secret-key-0123456789abcdef".to_string(),
                jwt_algorithm: "HS256".to_string(),
                access_token_minutes: 60,
            },
            encryption_key: "test-encryption-key-0123456789abcdef".to_string(),
            redis: None,
            uploads: UploadConfig { max_file_bytes: 1024 * 1024 },
            scheduler: SchedulerConfig {
                input_batch_size: 8,
                output_batch_size: 16,
                poll_floor_ms: 5,
                poll_ceiling_ms: 50,
                input_loops: 2,
                execution_deadline_seconds: 30,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parses_known_values() {
        assert_eq!(AppEnv::parse("local").unwrap(), AppEnv::Local);
        assert_eq!(AppEnv::parse("prod").unwrap(), AppEnv::Prod);
        assert!(AppEnv::parse("staging").is_err());
    }

    #[test]
    fn test_config_is_self_consistent() {
        let cfg = Config::for_tests();
        assert!(cfg.auth.jwt_secret.len() >= 32);
        assert!(cfg.encryption_key.len() >= 32);
        assert_eq!(cfg.database.db_type, "sqlite");
    }
}
