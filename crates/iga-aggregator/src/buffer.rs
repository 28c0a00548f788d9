//! The identity completion buffer.
//!
//! At most one identity is open at a time. Records that share its multiplex
//! key accumulate on it; the first record with a different key, or the end
//! of the stream, hands it back for completion.
//!
//! ```text
//!            open(key)                 advance(other key | None)
//!   Idle ──────────────▶ Open(key) ───────────────────────────▶ Flushing
//!    ▲                     │  advance(same key): stays open          │
//!    │                     └──────────── abandon ──────────┐         │
//!    └─────────────────────────────────────────────────────┴─ flushed┘
//! ```

use iga_core::Identity;
use iga_store::{IdentityLock, PersistenceContext};
use tracing::warn;

/// A record folded into the open identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRecord {
    pub native_identity: String,
    pub created: bool,
}

/// The identity currently being built up.
pub struct OpenIdentity<C: PersistenceContext> {
    pub key: String,
    pub identity: Identity,
    lock: Option<IdentityLock<C>>,
    pub records: Vec<BufferedRecord>,
}

impl<C: PersistenceContext> OpenIdentity<C> {
    #[must_use]
    pub fn new(key: impl Into<String>, identity: Identity, lock: Option<IdentityLock<C>>) -> Self {
        Self {
            key: key.into(),
            identity,
            lock,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, native_identity: impl Into<String>, created: bool) {
        self.records.push(BufferedRecord {
            native_identity: native_identity.into(),
            created,
        });
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Releases the identity lock. A failed release is logged, not retried.
    pub fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            let identity = lock.identity();
            if let Err(e) = lock.release() {
                warn!(identity_id = %identity, error = %e, "Failed to release identity lock");
            }
        }
    }
}

impl<C: PersistenceContext> std::fmt::Debug for OpenIdentity<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIdentity")
            .field("key", &self.key)
            .field("identity", &self.identity.name)
            .field("locked", &self.lock.is_some())
            .field("records", &self.records.len())
            .finish()
    }
}

enum BufferState<C: PersistenceContext> {
    Idle,
    Open(OpenIdentity<C>),
    Flushing,
}

pub struct CompletionBuffer<C: PersistenceContext> {
    state: BufferState<C>,
}

impl<C: PersistenceContext> Default for CompletionBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PersistenceContext> CompletionBuffer<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: BufferState::Idle,
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, BufferState::Idle)
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        matches!(self.state, BufferState::Flushing)
    }

    /// Key of the open identity.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match &self.state {
            BufferState::Open(open) => Some(&open.key),
            _ => None,
        }
    }

    #[must_use]
    pub fn holds(&self, key: &str) -> bool {
        self.key() == Some(key)
    }

    /// Moves to the next record's key. Returns the open identity for
    /// completion when the key changes or the stream ended (`None`).
    pub fn advance(&mut self, next_key: Option<&str>) -> Option<OpenIdentity<C>> {
        let key_changed = match &self.state {
            BufferState::Open(open) => next_key != Some(open.key.as_str()),
            _ => false,
        };
        if !key_changed {
            return None;
        }
        match std::mem::replace(&mut self.state, BufferState::Flushing) {
            BufferState::Open(open) => Some(open),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Opens an identity. Anything still open is returned unflushed.
    pub fn open(&mut self, identity: OpenIdentity<C>) -> Option<OpenIdentity<C>> {
        match std::mem::replace(&mut self.state, BufferState::Open(identity)) {
            BufferState::Open(previous) => Some(previous),
            _ => None,
        }
    }

    /// Marks the identity handed out by [`advance`](Self::advance) complete.
    pub fn flushed(&mut self) {
        if self.is_flushing() {
            self.state = BufferState::Idle;
        }
    }

    /// Drops the open identity without completing it.
    pub fn abandon(&mut self) -> Option<OpenIdentity<C>> {
        match std::mem::replace(&mut self.state, BufferState::Idle) {
            BufferState::Open(open) => Some(open),
            _ => None,
        }
    }

    pub fn current_mut(&mut self) -> Option<&mut OpenIdentity<C>> {
        match &mut self.state {
            BufferState::Open(open) => Some(open),
            _ => None,
        }
    }
}

impl<C: PersistenceContext> std::fmt::Debug for CompletionBuffer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            BufferState::Idle => f.write_str("CompletionBuffer::Idle"),
            BufferState::Open(open) => write!(f, "CompletionBuffer::Open({})", open.key),
            BufferState::Flushing => f.write_str("CompletionBuffer::Flushing"),
        }
    }
}
