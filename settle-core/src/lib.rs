//! Settle Core
//!
//! Reconciliation core for remote control planes that execute mutations
//! asynchronously.
//!
//! ## Module Structure
//!
//! - `classify` - Maps remote errors onto a canonical error taxonomy
//! - `waiter` - Convergence poller driving read-and-check loops
//! - `pagination` - Aggregates cursor-paginated list endpoints
//! - `lifecycle` - Create/read/update/delete/list built on the three above
//! - `provider` - Trait abstracting the remote control plane
//! - `status`, `operation`, `resource`, `path`, `cancel` - Shared value types

pub mod cancel;
pub mod classify;
pub mod lifecycle;
pub mod operation;
pub mod pagination;
pub mod path;
pub mod provider;
pub mod resource;
pub mod status;
pub mod waiter;

// Re-export main types
pub use cancel::Cancellation;
pub use classify::{
    ErrorEnvelope, ErrorKind, NotFoundRule, RemoteError, classify, classify_any, triage,
};
pub use lifecycle::{Applied, LifecycleOptions, Reconciler};
pub use operation::OperationHandle;
pub use pagination::{Page, PaginationError, Paginator, collect_all};
pub use provider::{
    BoxFuture, ControlPlane, Mutation, MutationOutcome, MutationRequest, OperationError,
    OperationResult,
};
pub use resource::ResourceRef;
pub use status::{Observation, Phase, PollState, StateSets};
pub use waiter::{FinalState, NotFoundPolicy, WaitConfig, WaitError, wait_for, wait_for_operation};
