//! # iga-store
//!
//! The persistence context the engines are written against, plus an
//! in-memory implementation.
//!
//! ```text
//! ┌───────────────────────────┐
//! │   PersistenceContext      │  get / search / save / remove
//! │   (unit of work)          │  commit / rollback / decache / reconnect
//! └─────────────┬─────────────┘  acquire_lock / release_lock
//!               │
//!    ┌──────────┴──────────┐
//!    │  InMemoryContext    │  session over a shared Database
//!    └─────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod filter;
pub mod lock;
pub mod memory;
pub mod projection;

pub use context::{LockToken, PersistenceContext};
pub use error::{StoreError, StoreResult};
pub use filter::{Filter, QueryOptions};
pub use lock::IdentityLock;
pub use memory::{InMemoryContext, SessionMetrics};
pub use projection::ProjectionIterator;
