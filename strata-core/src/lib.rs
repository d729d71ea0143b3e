//! Strata core functionality.
//!
//! This crate contains the backend models, retry policy, candidate selection and
//! statement classification that power the Strata time-series proxy. Nothing in
//! here performs network I/O; the async engine lives in `strata-proxy`.

pub mod domain {
    //! Backend descriptors and the immutable backend registry.
    pub mod backend;
    pub mod registry;
}

pub mod load_balancer {
    //! Backend selection for reads.
    pub mod selector;
}

pub mod policy {
    //! Delivery policies shared by the read, write and mutation paths.
    pub mod retry;
}

pub mod query {
    //! Query-string handling and statement classification.
    pub mod classify;
    pub mod params;
}

mod error;

pub use domain::backend::{Backend, BackendDescriptor, BackendId, SharedBackend};
pub use domain::registry::{BackendRegistry, SharedRegistry};
pub use error::RegistryError;
pub use load_balancer::selector::CandidateSet;
pub use policy::retry::{RetryDecision, RetryPolicy, RetryState};
pub use query::classify::{is_mutation, StatementKind};
pub use query::params::QueryParams;
