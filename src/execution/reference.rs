/// Reference template parsing and resolution
///
/// Grammar: `${type:id_or_value(.path)?}` with
/// `type ∈ {static, trigger, node, value, credential, database, file}` and
/// `path` a dotted chain of identifiers with optional `[index]` steps.
///
/// A parameter value is a reference iff it is a string shaped `${…:…}`;
/// everything else is a literal. Resolution is a pure function of the
/// referenced target state plus the declared parameter type: groups are
/// fetched once per node (no N+1), composition is atomic per node, and a
/// declared-type mismatch aborts that node's dispatch.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::execution::storage::ExecutionStorage;
use crate::execution::types::Execution;
use crate::workflow::types::{looks_like_reference, InputParam, ParamType};
use crate::workspace::storage::WorkspaceStorage;

/// Source a reference pulls from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    Static,
    Trigger,
    Node,
    Value,
    Credential,
    Database,
    File,
}

impl RefType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "static" => Some(RefType::Static),
            "trigger" => Some(RefType::Trigger),
            "node" => Some(RefType::Node),
            "value" => Some(RefType::Value),
            "credential" => Some(RefType::Credential),
            "database" => Some(RefType::Database),
            "file" => Some(RefType::File),
            _ => None,
        }
    }
}

/// One step of a dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// A parsed reference template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub ref_type: RefType,
    /// Literal for `static`, id (or upstream node name) otherwise
    pub target: String,
    pub path: Vec<PathStep>,
}

/// Parse a parameter value: `None` for literals, `Some(reference)` otherwise
pub fn parse_reference(value: &Value) -> Option<Result<Reference>> {
    if !looks_like_reference(value) {
        return None;
    }
    let template = value.as_str().expect("reference shape implies a string");
    Some(parse_template(template))
}

fn parse_template(template: &str) -> Result<Reference> {
    let inner = &template[2..template.len() - 1];
    let (type_str, rest) = inner
        .split_once(':')
        .ok_or_else(|| Error::ReferenceResolution(format!("malformed reference '{}'", template)))?;
    let ref_type = RefType::parse(type_str).ok_or_else(|| {
        Error::ReferenceResolution(format!("unknown reference type '{}'", type_str))
    })?;

    match ref_type {
        // Everything after the colon is the literal, dots included
        RefType::Static => Ok(Reference { ref_type, target: rest.to_string(), path: Vec::new() }),
        // The whole remainder is a path into the trigger payload
        RefType::Trigger => Ok(Reference {
            ref_type,
            target: String::new(),
            path: parse_path(rest)?,
        }),
        // A bare id
        RefType::Value => {
            if rest.is_empty() {
                return Err(Error::ReferenceResolution("empty variable reference".to_string()));
            }
            Ok(Reference { ref_type, target: rest.to_string(), path: Vec::new() })
        }
        // id, optionally followed by .path
        RefType::Node | RefType::Credential | RefType::Database | RefType::File => {
            let (target, path) = match rest.split_once('.') {
                Some((target, path)) => (target, parse_path(path)?),
                None => (rest, Vec::new()),
            };
            if target.is_empty() {
                return Err(Error::ReferenceResolution(format!(
                    "reference '{}' has no target id",
                    template
                )));
            }
            Ok(Reference { ref_type, target: target.to_string(), path })
        }
    }
}

/// Parse a dotted path with optional `[index]` steps ("items[0].name")
pub fn parse_path(path: &str) -> Result<Vec<PathStep>> {
    let mut steps = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(Error::ReferenceResolution(format!("empty path segment in '{}'", path)));
        }
        let mut rest = segment;
        if !rest.starts_with('[') {
            let key_end = rest.find('[').unwrap_or(rest.len());
            steps.push(PathStep::Key(rest[..key_end].to_string()));
            rest = &rest[key_end..];
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(|| {
                Error::ReferenceResolution(format!("unterminated index in '{}'", segment))
            })?;
            let index: usize = rest[1..close].parse().map_err(|_| {
                Error::ReferenceResolution(format!("bad array index in '{}'", segment))
            })?;
            steps.push(PathStep::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(Error::ReferenceResolution(format!(
                    "unexpected trailing characters in '{}'",
                    segment
                )));
            }
        }
    }
    Ok(steps)
}

/// Walk a JSON value along a parsed path
pub fn step_path<'a>(value: &'a Value, path: &[PathStep]) -> Option<&'a Value> {
    let mut current = value;
    for step in path {
        current = match step {
            PathStep::Key(key) => current.get(key.as_str())?,
            PathStep::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Coerce a resolved value to the declared parameter type
pub fn coerce(param: &str, value: Value, param_type: ParamType) -> Result<Value> {
    let mismatch = |actual: &Value| Error::TypeMismatch {
        param: param.to_string(),
        expected: param_type.as_str(),
        actual: type_name(actual).to_string(),
    };
    match param_type {
        ParamType::String | ParamType::Email | ParamType::Url | ParamType::Password => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(&other)),
        },
        ParamType::Integer => match &value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 {
                        Ok(Value::from(f as i64))
                    } else {
                        Err(mismatch(&value))
                    }
                } else {
                    Err(mismatch(&value))
                }
            }
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        ParamType::Float => match &value {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        ParamType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch(&value)),
        },
        ParamType::Array => match &value {
            Value::Array(_) => Ok(value),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) if parsed.is_array() => Ok(parsed),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        ParamType::Object => match &value {
            Value::Object(_) => Ok(value),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) if parsed.is_object() => Ok(parsed),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolves a snapshot's parameter templates against live state
#[derive(Clone)]
pub struct ReferenceResolver {
    workspace: WorkspaceStorage,
    executions: ExecutionStorage,
}

impl ReferenceResolver {
    pub fn new(workspace: WorkspaceStorage, executions: ExecutionStorage) -> Self {
        Self { workspace, executions }
    }

    /// Produce `name -> concrete value`, each coerced to its declared type.
    /// Either every reference of the node resolves or the node fails.
    pub async fn resolve(
        &self,
        execution: &Execution,
        params: &HashMap<String, InputParam>,
    ) -> Result<serde_json::Map<String, Value>> {
        // Parse every parameter up front and group references by type so
        // each source is fetched once per node
        let mut parsed: Vec<(String, ParamType, ParsedValue)> = Vec::new();
        let mut wanted: HashMap<RefType, HashSet<String>> = HashMap::new();
        for (name, param) in params {
            let effective = if param.value.is_null() {
                param.default.clone().unwrap_or(Value::Null)
            } else {
                param.value.clone()
            };
            match parse_reference(&effective) {
                Some(reference) => {
                    let reference = reference?;
                    wanted.entry(reference.ref_type).or_default().insert(reference.target.clone());
                    parsed.push((name.clone(), param.param_type, ParsedValue::Reference(reference)));
                }
                None => parsed.push((name.clone(), param.param_type, ParsedValue::Literal(effective))),
            }
        }

        let fetched = self.fetch_groups(execution, &wanted).await?;

        let mut resolved = serde_json::Map::new();
        for (name, param_type, value) in parsed {
            let raw = match value {
                ParsedValue::Literal(literal) => literal,
                ParsedValue::Reference(reference) => self.materialize(execution, &fetched, &reference)?,
            };
            resolved.insert(name.clone(), coerce(&name, raw, param_type)?);
        }
        Ok(resolved)
    }

    async fn fetch_groups(
        &self,
        execution: &Execution,
        wanted: &HashMap<RefType, HashSet<String>>,
    ) -> Result<FetchedGroups> {
        let mut groups = FetchedGroups::default();

        if let Some(ids) = wanted.get(&RefType::Value) {
            let ids: Vec<String> = ids.iter().cloned().collect();
            groups.variables = self.workspace.variables_by_ids(&execution.workspace_id, &ids).await?;
        }
        if let Some(ids) = wanted.get(&RefType::Credential) {
            let ids: Vec<String> = ids.iter().cloned().collect();
            groups.credentials = self.workspace.credentials_by_ids(&execution.workspace_id, &ids).await?;
        }
        if let Some(ids) = wanted.get(&RefType::Database) {
            let ids: Vec<String> = ids.iter().cloned().collect();
            groups.databases = self.workspace.databases_by_ids(&execution.workspace_id, &ids).await?;
        }
        if let Some(ids) = wanted.get(&RefType::File) {
            let ids: Vec<String> = ids.iter().cloned().collect();
            groups.files = self.workspace.files_by_ids(&execution.workspace_id, &ids).await?;
        }
        if wanted.contains_key(&RefType::Node) {
            groups.node_directory = self.executions.node_directory(&execution.id).await?;
            groups.success_outputs = self.executions.success_outputs_by_node(&execution.id).await?;
        }
        Ok(groups)
    }

    fn materialize(
        &self,
        execution: &Execution,
        fetched: &FetchedGroups,
        reference: &Reference,
    ) -> Result<Value> {
        match reference.ref_type {
            RefType::Static => Ok(Value::String(reference.target.clone())),
            RefType::Trigger => step_path(&execution.trigger_data, &reference.path)
                .cloned()
                .ok_or_else(|| {
                    Error::ReferenceResolution(
                        "trigger payload has no value at the referenced path".to_string(),
                    )
                }),
            RefType::Node => {
                // The target may be the upstream node's id or its name
                let node_id = fetched
                    .node_directory
                    .get(&reference.target)
                    .ok_or_else(|| {
                        Error::ReferenceResolution(format!(
                            "'{}' is not a node of this execution",
                            reference.target
                        ))
                    })?;
                let output = fetched
                    .success_outputs
                    .get(node_id)
                    .ok_or_else(|| Error::NodeOutputMissing(reference.target.clone()))?;
                step_path(output, &reference.path).cloned().ok_or_else(|| {
                    Error::ReferenceResolution(format!(
                        "output of '{}' has no value at the referenced path",
                        reference.target
                    ))
                })
            }
            RefType::Value => {
                let variable = fetched.variables.get(&reference.target).ok_or_else(|| {
                    Error::ReferenceResolution(format!("variable {} not found", reference.target))
                })?;
                // Secret variables are opened here and nowhere else
                Ok(Value::String(self.workspace.reveal_variable(variable)?))
            }
            RefType::Credential => {
                let credential = fetched.credentials.get(&reference.target).ok_or_else(|| {
                    Error::ReferenceResolution(format!("credential {} not found", reference.target))
                })?;
                let opened = self.workspace.open_credential(credential)?;
                step_path(&opened, &reference.path).cloned().ok_or_else(|| {
                    Error::ReferenceResolution(format!(
                        "credential {} has no field at the referenced path",
                        reference.target
                    ))
                })
            }
            RefType::Database => {
                let database = fetched.databases.get(&reference.target).ok_or_else(|| {
                    Error::ReferenceResolution(format!("database {} not found", reference.target))
                })?;
                let descriptor = self.workspace.database_descriptor(database)?;
                step_path(&descriptor, &reference.path).cloned().ok_or_else(|| {
                    Error::ReferenceResolution(format!(
                        "database {} has no field at the referenced path",
                        reference.target
                    ))
                })
            }
            RefType::File => {
                let file = fetched.files.get(&reference.target).ok_or_else(|| {
                    Error::ReferenceResolution(format!("file {} not found", reference.target))
                })?;
                // `content` loads the artifact; anything else reads metadata
                if reference.path.first() == Some(&PathStep::Key("content".to_string())) {
                    let bytes = std::fs::read(&file.path).map_err(|e| {
                        Error::ReferenceResolution(format!(
                            "file {} artifact unreadable: {}",
                            reference.target, e
                        ))
                    })?;
                    let content = match String::from_utf8(bytes) {
                        Ok(text) => Value::String(text),
                        Err(raw) => {
                            use base64::Engine;
                            Value::String(
                                base64::engine::general_purpose::STANDARD.encode(raw.into_bytes()),
                            )
                        }
                    };
                    return step_path(&content, &reference.path[1..]).cloned().ok_or_else(|| {
                        Error::ReferenceResolution("file content has no nested fields".to_string())
                    });
                }
                let described = serde_json::json!({
                    "metadata": {
                        "name": file.name,
                        "size": file.size_bytes,
                        "mime_type": file.mime_type,
                        "path": file.path,
                    }
                });
                step_path(&described, &reference.path).cloned().ok_or_else(|| {
                    Error::ReferenceResolution(format!(
                        "file {} has no metadata at the referenced path",
                        reference.target
                    ))
                })
            }
        }
    }
}

enum ParsedValue {
    Literal(Value),
    Reference(Reference),
}

#[derive(Default)]
struct FetchedGroups {
    variables: HashMap<String, crate::workspace::types::Variable>,
    credentials: HashMap<String, crate::workspace::types::Credential>,
    databases: HashMap<String, crate::workspace::types::DatabaseConnection>,
    files: HashMap<String, crate::workspace::types::StoredFile>,
    /// name-or-id -> node id for this execution
    node_directory: HashMap<String, String>,
    /// node id -> result_data of the node's SUCCESS output
    success_outputs: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(template: &str) -> Reference {
        parse_reference(&json!(template)).expect("should detect").expect("should parse")
    }

    #[test]
    fn literals_are_not_references() {
        assert!(parse_reference(&json!(42)).is_none());
        assert!(parse_reference(&json!("plain")).is_none());
        assert!(parse_reference(&json!("${missing colon}")).is_none());
    }

    #[test]
    fn static_keeps_dots_in_the_literal() {
        let r = parsed("${static:3.14}");
        assert_eq!(r.ref_type, RefType::Static);
        assert_eq!(r.target, "3.14");
        assert!(r.path.is_empty());
    }

    #[test]
    fn trigger_parses_the_whole_rest_as_path() {
        let r = parsed("${trigger:payload.items[2].id}");
        assert_eq!(r.ref_type, RefType::Trigger);
        assert_eq!(
            r.path,
            vec![
                PathStep::Key("payload".to_string()),
                PathStep::Key("items".to_string()),
                PathStep::Index(2),
                PathStep::Key("id".to_string()),
            ]
        );
    }

    #[test]
    fn node_splits_target_and_path() {
        let r = parsed("${node:A.in.y}");
        assert_eq!(r.ref_type, RefType::Node);
        assert_eq!(r.target, "A");
        assert_eq!(r.path, vec![PathStep::Key("in".to_string()), PathStep::Key("y".to_string())]);

        let bare = parsed("${node:NOD-0011223344556677}");
        assert_eq!(bare.target, "NOD-0011223344556677");
        assert!(bare.path.is_empty());
    }

    #[test]
    fn unknown_type_is_a_resolution_error() {
        let err = parse_reference(&json!("${magic:X}")).unwrap();
        assert!(matches!(err, Err(Error::ReferenceResolution(_))));
    }

    #[test]
    fn path_walks_objects_and_arrays() {
        let value = json!({"in": {"items": [{"id": 7}, {"id": 9}]}});
        let path = parse_path("in.items[1].id").unwrap();
        assert_eq!(step_path(&value, &path), Some(&json!(9)));
        let missing = parse_path("in.items[5]").unwrap();
        assert_eq!(step_path(&value, &missing), None);
    }

    #[test]
    fn coercion_canonical_rules() {
        assert_eq!(coerce("p", json!("7"), ParamType::Integer).unwrap(), json!(7));
        assert_eq!(coerce("p", json!(7), ParamType::Float).unwrap(), json!(7.0));
        assert_eq!(coerce("p", json!("true"), ParamType::Boolean).unwrap(), json!(true));
        assert_eq!(coerce("p", json!("[1,2]"), ParamType::Array).unwrap(), json!([1, 2]));
        assert_eq!(
            coerce("p", json!("{\"a\":1}"), ParamType::Object).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(coerce("p", json!(5), ParamType::String).unwrap(), json!("5"));
        assert_eq!(coerce("p", json!("s"), ParamType::Password).unwrap(), json!("s"));
    }

    #[test]
    fn coercion_mismatches_carry_the_parameter() {
        match coerce("count", json!("seven"), ParamType::Integer) {
            Err(Error::TypeMismatch { param, expected, .. }) => {
                assert_eq!(param, "count");
                assert_eq!(expected, "integer");
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
        assert!(coerce("p", json!(7.5), ParamType::Integer).is_err());
        assert!(coerce("p", json!({"a": 1}), ParamType::Array).is_err());
        assert!(coerce("p", json!("yes"), ParamType::Boolean).is_err());
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
        assert!(parse_path("a[0]b").is_err());
    }

    mod resolving {
        use super::super::*;
        use crate::execution::storage::PlannedNode;
        use crate::execution::types::{OutputStatus, WorkerResult};
        use crate::security::SecretBox;
        use crate::workflow::types::InputParam;
        use crate::workspace::types::PlanTier;
        use serde_json::json;
        use std::sync::Arc;

        struct Fixture {
            resolver: ReferenceResolver,
            workspace: crate::workspace::types::Workspace,
            execution: Execution,
            storage: WorkspaceStorage,
        }

        async fn fixture() -> Fixture {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect(":memory:")
                .await
                .unwrap();
            let secrets = Arc::new(SecretBox::new("test-encryption-key-0123456789abcdef"));
            let storage = WorkspaceStorage::new(pool.clone(), secrets);
            storage.init_schema().await.unwrap();
            let executions = ExecutionStorage::new(pool);
            executions.init_schema().await.unwrap();

            let owner = storage.create_user("o@example.com", "O").await.unwrap();
            let workspace = storage
                .create_workspace(&owner.id, "Acme", "acme", PlanTier::Pro)
                .await
                .unwrap();

            // Plan a two-node execution and complete node A only
            let execution = executions
                .create_execution(&workspace.id, "WFL-A", None, json!({"seed": 7}))
                .await
                .unwrap();
            let plan = vec![
                planned("NOD-A", "A", 0, &["NOD-B"]),
                planned("NOD-B", "B", 1, &[]),
            ];
            executions.install_plan(&execution.id, &plan, 300).await.unwrap();
            executions
                .ingest_result(&WorkerResult {
                    execution_id: execution.id.clone(),
                    node_id: "NOD-A".to_string(),
                    status: OutputStatus::Success,
                    result_data: json!({"ok": true, "items": [{"id": 11}, {"id": 22}]}),
                    duration: 0.1,
                    error_message: None,
                    error_details: None,
                })
                .await
                .unwrap();
            let execution = executions.get_execution(&execution.id).await.unwrap();

            Fixture {
                resolver: ReferenceResolver::new(storage.clone(), executions),
                workspace,
                execution,
                storage,
            }
        }

        fn planned(node_id: &str, name: &str, deps: i64, fanout: &[&str]) -> PlannedNode {
            PlannedNode {
                node_id: node_id.to_string(),
                node_name: name.to_string(),
                priority: 1,
                dependency_count: deps,
                max_retries: 0,
                timeout_seconds: 30,
                params: std::collections::HashMap::new(),
                script_name: "echo".to_string(),
                script_path: "/tmp/echo.lua".to_string(),
                process_type: "lua".to_string(),
                fanout: fanout.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn param(t: ParamType, value: serde_json::Value) -> InputParam {
            InputParam { param_type: t, value, required: true, default: None, description: None }
        }

        #[tokio::test]
        async fn resolves_every_source_type_in_one_pass() {
            let fx = fixture().await;
            let variable = fx
                .storage
                .create_variable(&fx.workspace.id, "TOKEN", "hunter2", true)
                .await
                .unwrap();
            let credential = fx
                .storage
                .create_credential(
                    &fx.workspace.id,
                    "github",
                    "api_token",
                    &json!({"account": "bot"}),
                    &json!({"api_token": "ghp_secret"}),
                )
                .await
                .unwrap();
            let database = fx
                .storage
                .create_database(&fx.workspace.id, "main", "postgresql", "db.internal", 5432, "app", "svc", "pg-pass")
                .await
                .unwrap();
            let artifact = tempfile::NamedTempFile::new().unwrap();
            std::fs::write(artifact.path(), b"hello world").unwrap();
            let file = fx
                .storage
                .create_file(&fx.workspace.id, "notes.txt", artifact.path().to_str().unwrap(), 11, "text/plain")
                .await
                .unwrap();

            let mut params = HashMap::new();
            params.insert("seed".into(), param(ParamType::Integer, json!("${trigger:seed}")));
            params.insert("pi".into(), param(ParamType::Float, json!("${static:3.14}")));
            params.insert("up".into(), param(ParamType::Boolean, json!("${node:A.ok}")));
            params.insert("second".into(), param(ParamType::Integer, json!("${node:A.items[1].id}")));
            params.insert(
                "pw".into(),
                param(ParamType::Password, json!(format!("${{value:{}}}", variable.id))),
            );
            params.insert(
                "token".into(),
                param(ParamType::String, json!(format!("${{credential:{}.api_token}}", credential.id))),
            );
            params.insert(
                "host".into(),
                param(ParamType::String, json!(format!("${{database:{}.host}}", database.id))),
            );
            params.insert(
                "dbpw".into(),
                param(ParamType::Password, json!(format!("${{database:{}.password}}", database.id))),
            );
            params.insert(
                "size".into(),
                param(ParamType::Integer, json!(format!("${{file:{}.metadata.size}}", file.id))),
            );
            params.insert(
                "notes".into(),
                param(ParamType::String, json!(format!("${{file:{}.content}}", file.id))),
            );
            params.insert("label".into(), param(ParamType::String, json!("just a literal")));

            let resolved = fx.resolver.resolve(&fx.execution, &params).await.unwrap();
            assert_eq!(resolved["seed"], json!(7));
            assert_eq!(resolved["pi"], json!(3.14));
            assert_eq!(resolved["up"], json!(true));
            assert_eq!(resolved["second"], json!(22));
            assert_eq!(resolved["pw"], json!("hunter2"));
            assert_eq!(resolved["token"], json!("ghp_secret"));
            assert_eq!(resolved["host"], json!("db.internal"));
            assert_eq!(resolved["dbpw"], json!("pg-pass"));
            assert_eq!(resolved["size"], json!(11));
            assert_eq!(resolved["notes"], json!("hello world"));
            assert_eq!(resolved["label"], json!("just a literal"));
        }

        #[tokio::test]
        async fn composition_is_atomic_per_node() {
            let fx = fixture().await;
            let mut params = HashMap::new();
            params.insert("seed".into(), param(ParamType::Integer, json!("${trigger:seed}")));
            params.insert(
                "missing".into(),
                param(ParamType::String, json!("${value:VAR-0000000000000000}")),
            );
            assert!(matches!(
                fx.resolver.resolve(&fx.execution, &params).await,
                Err(Error::ReferenceResolution(_))
            ));
        }

        #[tokio::test]
        async fn pending_upstream_is_node_output_missing() {
            let fx = fixture().await;
            let mut params = HashMap::new();
            params.insert("late".into(), param(ParamType::Boolean, json!("${node:B.ok}")));
            assert!(matches!(
                fx.resolver.resolve(&fx.execution, &params).await,
                Err(Error::NodeOutputMissing(_))
            ));
        }

        #[tokio::test]
        async fn declared_type_drives_the_failure() {
            let fx = fixture().await;
            let mut params = HashMap::new();
            // trigger.seed is 7; declaring it boolean must abort the node
            params.insert("flag".into(), param(ParamType::Boolean, json!("${trigger:seed}")));
            assert!(matches!(
                fx.resolver.resolve(&fx.execution, &params).await,
                Err(Error::TypeMismatch { .. })
            ));
        }
    }
}
