/// Security layer
///
/// Cross-cutting concerns the execution path depends on:
/// - Authenticated encryption of secrets at rest (secret box)
/// - Request-scoped identity: bearer tokens, API keys, trace ids

pub mod auth;
pub mod secretbox;

pub use auth::{Caller, RequestContext};
pub use secretbox::SecretBox;
