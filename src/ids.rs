/// Opaque prefixed identifier allocation
///
/// Every entity id has the shape `PREFIX-16HEX` with the hex drawn from the
/// OS RNG. Uniqueness is ultimately enforced by the store's unique
/// constraints; callers retry allocation on the (negligible) collision.

use rand::rngs::OsRng;
use rand::RngCore;

/// Entity kinds that receive allocated identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Workspace,
    Workflow,
    Node,
    Edge,
    Trigger,
    Execution,
    ExecutionInput,
    ExecutionOutput,
    User,
    Script,
    CustomScript,
    Variable,
    Credential,
    Database,
    File,
    ApiKey,
}

impl IdKind {
    /// Wire-level prefix without the trailing dash
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::Workspace => "WSP",
            IdKind::Workflow => "WFL",
            IdKind::Node => "NOD",
            IdKind::Edge => "EDG",
            IdKind::Trigger => "TRG",
            IdKind::Execution => "EXC",
            IdKind::ExecutionInput => "EXI",
            IdKind::ExecutionOutput => "EXO",
            IdKind::User => "USR",
            IdKind::Script => "SCR",
            IdKind::CustomScript => "CUS",
            IdKind::Variable => "VAR",
            IdKind::Credential => "CRD",
            IdKind::Database => "DB",
            IdKind::File => "FIL",
            IdKind::ApiKey => "AKY",
        }
    }
}

/// Allocate a fresh identifier for the given kind
pub fn new_id(kind: IdKind) -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("{}-{}", kind.prefix(), hex::encode_upper(bytes))
}

/// Check that an id carries the expected prefix and a 16-hex body
pub fn is_valid(id: &str, kind: IdKind) -> bool {
    let prefix = kind.prefix();
    match id.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('-')) {
        Some(body) => body.len() == 16 && body.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()),
        None => false,
    }
}

/// Extract the prefix of an arbitrary id string, if it has one
pub fn prefix_of(id: &str) -> Option<&str> {
    id.split_once('-').map(|(prefix, _)| prefix)
}
