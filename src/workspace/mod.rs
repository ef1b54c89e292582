/// Workspace layer: multi-tenant accounts, plans and accounting
///
/// This module owns the tenancy model and the two accountants the execution
/// path depends on:
/// - Plan catalog (lock-free, ArcSwap)
/// - Quota/limit accounting against plan limits
/// - Sliding-window rate limiting keyed by request subject
/// - Storage for workspace-scoped resources (variables, credentials,
///   database descriptors, files, API keys)

pub mod plans;
pub mod quota;
pub mod ratelimit;
pub mod storage;
pub mod types;

pub use plans::PlanCatalog;
pub use quota::QuotaAccountant;
pub use ratelimit::{RateLimiter, RateThresholds};
pub use storage::WorkspaceStorage;
pub use types::{Feature, PlanLimits, PlanTier, Workspace};
