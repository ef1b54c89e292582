/// SQLite persistence for workspace-scoped resources
///
/// Users, workspaces, variables, credentials, database descriptors, files
/// and API keys. Sensitive fields are sealed by the secret box before they
/// touch the database; callers that need plaintext go through the reveal
/// helpers so decryption stays in one place.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ids::{new_id, IdKind};
use crate::security::auth::{generate_api_key, GeneratedApiKey};
use crate::security::SecretBox;
use crate::workspace::types::{
    ApiKey, Credential, DatabaseConnection, PlanTier, StoredFile, User, Variable, Workspace,
};

/// RFC 3339 timestamp for created_at/updated_at columns
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage manager for workspace-scoped resources
#[derive(Clone)]
pub struct WorkspaceStorage {
    pool: SqlitePool,
    secrets: Arc<SecretBox>,
}

impl WorkspaceStorage {
    pub fn new(pool: SqlitePool, secrets: Arc<SecretBox>) -> Self {
        Self { pool, secrets }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the workspace-layer tables (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL,
                is_suspended INTEGER NOT NULL DEFAULT 0,
                current_workflow_count INTEGER NOT NULL DEFAULT 0,
                current_custom_script_count INTEGER NOT NULL DEFAULT 0,
                current_storage_bytes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                tier TEXT PRIMARY KEY,
                limits JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS variables (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                is_secret INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(workspace_id, key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                credential_type TEXT NOT NULL,
                data JSON NOT NULL,
                sealed_data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS database_connections (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                engine TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                database_name TEXT NOT NULL,
                username TEXT NOT NULL,
                sealed_password TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                prefix TEXT NOT NULL,
                last_four TEXT NOT NULL,
                permissions JSON NOT NULL,
                allowed_ips JSON NOT NULL,
                expires_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
        ];
        for ddl in statements {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_variables_workspace ON variables(workspace_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- users ----

    pub async fn create_user(&self, email: &str, display_name: &str) -> Result<User> {
        let id = new_id(IdKind::User);
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(display_name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "user", id: email.to_string() }
            }
            other => other.into(),
        })?;
        Ok(User { id, email: email.to_string(), display_name: display_name.to_string() })
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, email, display_name FROM users WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound { resource: "user", id: id.to_string() })?;
        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
        })
    }

    // ---- workspaces ----

    pub async fn create_workspace(
        &self,
        owner_user_id: &str,
        name: &str,
        slug: &str,
        plan: PlanTier,
    ) -> Result<Workspace> {
        let id = new_id(IdKind::Workspace);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, owner_user_id, name, slug, plan, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_user_id)
        .bind(name)
        .bind(slug)
        .bind(plan.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "workspace", id: slug.to_string() }
            }
            other => other.into(),
        })?;
        self.get_workspace(&id).await
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workspace", id: id.to_string() })?;
        workspace_from_row(&row)
    }

    pub async fn set_suspended(&self, id: &str, suspended: bool) -> Result<()> {
        let changed = sqlx::query(
            "UPDATE workspaces SET is_suspended = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(suspended as i64)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if changed == 0 {
            return Err(Error::NotFound { resource: "workspace", id: id.to_string() });
        }
        Ok(())
    }

    // ---- variables ----

    /// Create a variable; secret values are sealed before they are stored
    pub async fn create_variable(
        &self,
        workspace_id: &str,
        key: &str,
        value: &str,
        is_secret: bool,
    ) -> Result<Variable> {
        let stored_value = if is_secret { self.secrets.seal_str(value)? } else { value.to_string() };
        let id = new_id(IdKind::Variable);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO variables (id, workspace_id, key, value, is_secret, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(key)
        .bind(&stored_value)
        .bind(is_secret as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "variable", id: key.to_string() }
            }
            other => other.into(),
        })?;
        Ok(Variable {
            id,
            workspace_id: workspace_id.to_string(),
            key: key.to_string(),
            value: stored_value,
            is_secret,
        })
    }

    pub async fn get_variable(&self, id: &str) -> Result<Variable> {
        let row = sqlx::query(
            "SELECT id, workspace_id, key, value, is_secret FROM variables WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound { resource: "variable", id: id.to_string() })?;
        Ok(variable_from_row(&row))
    }

    /// Batched fetch for the reference resolver (one query per group)
    pub async fn variables_by_ids(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Variable>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, workspace_id, key, value, is_secret FROM variables \
             WHERE workspace_id = ? AND deleted_at IS NULL AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for id in ids {
            query = query.bind(id);
        }
        for row in query.fetch_all(&self.pool).await? {
            let var = variable_from_row(&row);
            out.insert(var.id.clone(), var);
        }
        Ok(out)
    }

    /// Plaintext of a variable; opens the seal for secret ones
    pub fn reveal_variable(&self, variable: &Variable) -> Result<String> {
        if variable.is_secret {
            self.secrets.open_str(&variable.value)
        } else {
            Ok(variable.value.clone())
        }
    }

    // ---- credentials ----

    /// Create a credential; `secret_fields` is sealed as one JSON object
    pub async fn create_credential(
        &self,
        workspace_id: &str,
        name: &str,
        credential_type: &str,
        data: &serde_json::Value,
        secret_fields: &serde_json::Value,
    ) -> Result<Credential> {
        let id = new_id(IdKind::Credential);
        let now = now_rfc3339();
        let sealed = self.secrets.seal_str(&serde_json::to_string(secret_fields)?)?;
        sqlx::query(
            r#"
            INSERT INTO credentials (id, workspace_id, name, credential_type, data, sealed_data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(credential_type)
        .bind(serde_json::to_string(data)?)
        .bind(&sealed)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(Credential {
            id,
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            credential_type: credential_type.to_string(),
            data: data.clone(),
            sealed_data: sealed,
        })
    }

    pub async fn credentials_by_ids(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Credential>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM credentials WHERE workspace_id = ? AND deleted_at IS NULL AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for id in ids {
            query = query.bind(id);
        }
        for row in query.fetch_all(&self.pool).await? {
            let data_json: String = row.get("data");
            let cred = Credential {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                name: row.get("name"),
                credential_type: row.get("credential_type"),
                data: serde_json::from_str(&data_json)?,
                sealed_data: row.get("sealed_data"),
            };
            out.insert(cred.id.clone(), cred);
        }
        Ok(out)
    }

    /// Full credential object with sensitive fields decrypted and merged in
    pub fn open_credential(&self, credential: &Credential) -> Result<serde_json::Value> {
        let opened = self.secrets.open_str(&credential.sealed_data)?;
        let secret_fields: serde_json::Value = serde_json::from_str(&opened)?;
        let mut merged = credential.data.clone();
        if let (Some(obj), Some(extra)) = (merged.as_object_mut(), secret_fields.as_object()) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        Ok(merged)
    }

    // ---- database connections ----

    pub async fn create_database(
        &self,
        workspace_id: &str,
        name: &str,
        engine: &str,
        host: &str,
        port: i64,
        database_name: &str,
        username: &str,
        password: &str,
    ) -> Result<DatabaseConnection> {
        let id = new_id(IdKind::Database);
        let now = now_rfc3339();
        let sealed_password = self.secrets.seal_str(password)?;
        sqlx::query(
            r#"
            INSERT INTO database_connections
                (id, workspace_id, name, engine, host, port, database_name, username, sealed_password, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(engine)
        .bind(host)
        .bind(port)
        .bind(database_name)
        .bind(username)
        .bind(&sealed_password)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(DatabaseConnection {
            id,
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            engine: engine.to_string(),
            host: host.to_string(),
            port,
            database_name: database_name.to_string(),
            username: username.to_string(),
            sealed_password,
        })
    }

    pub async fn databases_by_ids(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, DatabaseConnection>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM database_connections WHERE workspace_id = ? AND deleted_at IS NULL AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for id in ids {
            query = query.bind(id);
        }
        for row in query.fetch_all(&self.pool).await? {
            let db = DatabaseConnection {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                name: row.get("name"),
                engine: row.get("engine"),
                host: row.get("host"),
                port: row.get("port"),
                database_name: row.get("database_name"),
                username: row.get("username"),
                sealed_password: row.get("sealed_password"),
            };
            out.insert(db.id.clone(), db);
        }
        Ok(out)
    }

    /// Connection descriptor with the password decrypted, for the resolver
    pub fn database_descriptor(&self, db: &DatabaseConnection) -> Result<serde_json::Value> {
        let password = self.secrets.open_str(&db.sealed_password)?;
        Ok(serde_json::json!({
            "engine": db.engine,
            "host": db.host,
            "port": db.port,
            "database": db.database_name,
            "username": db.username,
            "password": password,
        }))
    }

    // ---- files ----

    pub async fn create_file(
        &self,
        workspace_id: &str,
        name: &str,
        path: &str,
        size_bytes: i64,
        mime_type: &str,
    ) -> Result<StoredFile> {
        let id = new_id(IdKind::File);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO files (id, workspace_id, name, path, size_bytes, mime_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(path)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(StoredFile {
            id,
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            size_bytes,
            mime_type: mime_type.to_string(),
        })
    }

    pub async fn files_by_ids(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, StoredFile>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM files WHERE workspace_id = ? AND deleted_at IS NULL AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for id in ids {
            query = query.bind(id);
        }
        for row in query.fetch_all(&self.pool).await? {
            let file = StoredFile {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                name: row.get("name"),
                path: row.get("path"),
                size_bytes: row.get("size_bytes"),
                mime_type: row.get("mime_type"),
            };
            out.insert(file.id.clone(), file);
        }
        Ok(out)
    }

    /// Delete a file record and its on-disk artifact together
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let row = sqlx::query("SELECT path, size_bytes, workspace_id FROM files WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "file", id: id.to_string() })?;
        let path: String = row.get("path");
        sqlx::query("UPDATE files SET deleted_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("⚠️ Failed to remove file artifact {}: {}", path, e);
        }
        Ok(())
    }

    // ---- API keys ----

    /// Create an API key; the raw key is returned once and never stored
    pub async fn create_api_key(
        &self,
        workspace_id: &str,
        name: &str,
        permissions: &[String],
        allowed_ips: &[String],
        expires_at: Option<&str>,
    ) -> Result<(ApiKey, GeneratedApiKey)> {
        let generated = generate_api_key();
        let id = new_id(IdKind::ApiKey);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, workspace_id, name, key_hash, prefix, last_four, permissions, allowed_ips, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(&generated.hash)
        .bind(&generated.prefix)
        .bind(&generated.last_four)
        .bind(serde_json::to_string(permissions)?)
        .bind(serde_json::to_string(allowed_ips)?)
        .bind(expires_at)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let key = ApiKey {
            id,
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            key_hash: generated.hash.clone(),
            prefix: generated.prefix.clone(),
            last_four: generated.last_four.clone(),
            permissions: permissions.to_vec(),
            allowed_ips: allowed_ips.to_vec(),
            expires_at: expires_at.map(|s| s.to_string()),
            is_active: true,
            usage_count: 0,
        };
        Ok((key, generated))
    }

    pub async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ? AND deleted_at IS NULL")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let permissions_json: String = row.get("permissions");
                let allowed_ips_json: String = row.get("allowed_ips");
                Ok(Some(ApiKey {
                    id: row.get("id"),
                    workspace_id: row.get("workspace_id"),
                    name: row.get("name"),
                    key_hash: row.get("key_hash"),
                    prefix: row.get("prefix"),
                    last_four: row.get("last_four"),
                    permissions: serde_json::from_str(&permissions_json)?,
                    allowed_ips: serde_json::from_str(&allowed_ips_json)?,
                    expires_at: row.get("expires_at"),
                    is_active: row.get::<i64, _>("is_active") != 0,
                    usage_count: row.get("usage_count"),
                }))
            }
            None => Ok(None),
        }
    }

    /// Bump the usage counter after a successful authentication
    pub async fn touch_api_key(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET usage_count = usage_count + 1, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_api_keys(&self, workspace_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_keys WHERE workspace_id = ? AND deleted_at IS NULL",
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }
}

fn workspace_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workspace> {
    let plan_str: String = row.get("plan");
    let plan = PlanTier::parse(&plan_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt plan tier '{}'", plan_str)))?;
    Ok(Workspace {
        id: row.get("id"),
        owner_user_id: row.get("owner_user_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        plan,
        is_suspended: row.get::<i64, _>("is_suspended") != 0,
        current_workflow_count: row.get("current_workflow_count"),
        current_custom_script_count: row.get("current_custom_script_count"),
        current_storage_bytes: row.get("current_storage_bytes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn variable_from_row(row: &sqlx::sqlite::SqliteRow) -> Variable {
    Variable {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        key: row.get("key"),
        value: row.get("value"),
        is_secret: row.get::<i64, _>("is_secret") != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> WorkspaceStorage {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        let secrets = Arc::new(SecretBox::new("test-encryption-key-0123456789abcdef"));
        let storage = WorkspaceStorage::new(pool, secrets);
        storage.init_schema().await.unwrap();
        storage
    }

    async fn seeded_workspace(storage: &WorkspaceStorage) -> Workspace {
        let owner = storage.create_user("owner@example.com", "Owner").await.unwrap();
        storage
            .create_workspace(&owner.id, "Acme", "acme", PlanTier::Freemium)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn workspace_slug_is_unique() {
        let storage = storage().await;
        let owner = storage.create_user("o@example.com", "O").await.unwrap();
        storage.create_workspace(&owner.id, "A", "acme", PlanTier::Pro).await.unwrap();
        let dup = storage.create_workspace(&owner.id, "B", "acme", PlanTier::Pro).await;
        assert!(matches!(dup, Err(Error::AlreadyExists { resource: "workspace", .. })));
    }

    #[tokio::test]
    async fn secret_variable_is_sealed_at_rest_and_reveals() {
        let storage = storage().await;
        let ws = seeded_workspace(&storage).await;
        let var = storage.create_variable(&ws.id, "API_KEY", "hunter2", true).await.unwrap();
        // Stored bytes must not be the plaintext
        assert_ne!(var.value, "hunter2");
        assert!(!var.value.contains("hunter2"));
        assert_eq!(storage.reveal_variable(&var).unwrap(), "hunter2");

        let plain = storage.create_variable(&ws.id, "REGION", "eu-west-1", false).await.unwrap();
        assert_eq!(plain.value, "eu-west-1");
        assert_eq!(storage.reveal_variable(&plain).unwrap(), "eu-west-1");
    }

    #[tokio::test]
    async fn variable_key_unique_per_workspace() {
        let storage = storage().await;
        let ws = seeded_workspace(&storage).await;
        storage.create_variable(&ws.id, "K", "1", false).await.unwrap();
        let dup = storage.create_variable(&ws.id, "K", "2", false).await;
        assert!(matches!(dup, Err(Error::AlreadyExists { resource: "variable", .. })));
    }

    #[tokio::test]
    async fn credential_merges_decrypted_fields() {
        let storage = storage().await;
        let ws = seeded_workspace(&storage).await;
        let cred = storage
            .create_credential(
                &ws.id,
                "github",
                "api_token",
                &serde_json::json!({"account": "acme-bot"}),
                &serde_json::json!({"api_token": "ghp_secret"}),
            )
            .await
            .unwrap();
        assert!(!cred.sealed_data.contains("ghp_secret"));
        let opened = storage.open_credential(&cred).unwrap();
        assert_eq!(opened["account"], "acme-bot");
        assert_eq!(opened["api_token"], "ghp_secret");
    }

    #[tokio::test]
    async fn database_descriptor_decrypts_password() {
        let storage = storage().await;
        let ws = seeded_workspace(&storage).await;
        let db = storage
            .create_database(&ws.id, "main", "postgresql", "db.internal", 5432, "app", "svc", "pg-pass")
            .await
            .unwrap();
        assert!(!db.sealed_password.contains("pg-pass"));
        let descriptor = storage.database_descriptor(&db).unwrap();
        assert_eq!(descriptor["host"], "db.internal");
        assert_eq!(descriptor["port"], 5432);
        assert_eq!(descriptor["password"], "pg-pass");
    }

    #[tokio::test]
    async fn api_key_lookup_by_hash_only() {
        let storage = storage().await;
        let ws = seeded_workspace(&storage).await;
        let (key, generated) = storage
            .create_api_key(&ws.id, "ci", &["execute".to_string()], &[], None)
            .await
            .unwrap();
        let found = storage
            .find_api_key_by_hash(&crate::security::auth::hash_api_key(&generated.raw))
            .await
            .unwrap()
            .expect("key should resolve by hash");
        assert_eq!(found.id, key.id);
        assert_eq!(found.last_four, generated.last_four);
        // Raw key itself is not a valid lookup value
        assert!(storage.find_api_key_by_hash(&generated.raw).await.unwrap().is_none());
    }
}
