//! In-memory persistence context.
//!
//! A shared [`Database`] holds committed objects and identity locks. Each
//! [`InMemoryContext`] is one session over it with its own pending writes and
//! cache. With integrity checks enabled, a commit that removes an object still
//! referenced by a surviving object is rolled back with
//! [`StoreError::IntegrityViolation`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use iga_core::{IdentityId, Object, ObjectKind, ObjectRef, Persistent, PropertyValue};
use uuid::Uuid;

use crate::context::{LockToken, PersistenceContext};
use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, QueryOptions};

#[derive(Debug, Default)]
struct Database {
    objects: HashMap<ObjectKind, BTreeMap<Uuid, Object>>,
    locks: HashMap<IdentityId, LockToken>,
    commit_faults: usize,
}

impl Database {
    fn get(&self, key: &ObjectRef) -> Option<&Object> {
        self.objects.get(&key.kind).and_then(|m| m.get(&key.id))
    }

    fn insert(&mut self, key: ObjectRef, object: Object) -> Option<Object> {
        self.objects.entry(key.kind).or_default().insert(key.id, object)
    }

    fn remove(&mut self, key: &ObjectRef) -> Option<Object> {
        self.objects.get_mut(&key.kind).and_then(|m| m.remove(&key.id))
    }

    fn contains(&self, key: &ObjectRef) -> bool {
        self.get(key).is_some()
    }

    fn all(&self) -> impl Iterator<Item = &Object> {
        self.objects.values().flat_map(BTreeMap::values)
    }

    fn find_orphaned(&self, removed: &HashSet<ObjectRef>) -> Option<StoreError> {
        if removed.is_empty() {
            return None;
        }
        self.all().find_map(|object| {
            object
                .references()
                .into_iter()
                .find(|r| removed.contains(r))
                .map(|r| StoreError::IntegrityViolation {
                    removed: r,
                    referenced_by: object.object_ref(),
                })
        })
    }
}

#[derive(Debug, Default)]
struct Session {
    /// Latest pending state per object: `Some` saved, `None` removed.
    pending: HashMap<ObjectRef, Option<Object>>,
    cache: HashSet<ObjectRef>,
}

/// Counters a session keeps about its own activity.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub decaches: AtomicUsize,
}

impl SessionMetrics {
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn decaches(&self) -> usize {
        self.decaches.load(Ordering::SeqCst)
    }
}

/// One session over a shared in-memory database.
#[derive(Debug)]
pub struct InMemoryContext {
    database: Arc<RwLock<Database>>,
    session: Mutex<Session>,
    integrity_checks: bool,
    metrics: SessionMetrics,
}

impl Default for InMemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            database: Arc::new(RwLock::new(Database::default())),
            session: Mutex::new(Session::default()),
            integrity_checks: false,
            metrics: SessionMetrics::default(),
        }
    }

    /// Rejects commits that would orphan a hard reference.
    #[must_use]
    pub fn with_integrity_checks(mut self) -> Self {
        self.integrity_checks = true;
        self
    }

    fn sibling(&self) -> Self {
        Self {
            database: Arc::clone(&self.database),
            session: Mutex::new(Session::default()),
            integrity_checks: self.integrity_checks,
            metrics: SessionMetrics::default(),
        }
    }

    fn db(&self) -> RwLockReadGuard<'_, Database> {
        self.database.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn db_mut(&self) -> RwLockWriteGuard<'_, Database> {
        self.database.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Writes an object straight into the committed store.
    pub fn seed<T: Persistent>(&self, object: T) {
        let key = object.object_ref();
        self.db_mut().insert(key, object.into());
    }

    /// Makes the next `count` commits fail with a transient error.
    pub fn fail_next_commits(&self, count: usize) {
        self.db_mut().commit_faults = count;
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.session().cache.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.session().pending.len()
    }

    /// Committed objects of one kind.
    #[must_use]
    pub fn committed_count(&self, kind: ObjectKind) -> usize {
        self.db().objects.get(&kind).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn lock_holder(&self, identity: IdentityId) -> Option<LockToken> {
        self.db().locks.get(&identity).cloned()
    }

    /// Every committed reference whose target does not exist, as
    /// `(referencing, referenced)` pairs.
    #[must_use]
    pub fn dangling_references(&self) -> Vec<(ObjectRef, ObjectRef)> {
        let db = self.db();
        db.all()
            .flat_map(|object| {
                let from = object.object_ref();
                object
                    .references()
                    .into_iter()
                    .filter(|r| !db.contains(r))
                    .map(move |r| (from, r))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Current session view of every object of kind `kind` that passes `accept`.
    fn scan(&self, kind: ObjectKind, accept: impl Fn(&Object) -> bool) -> Vec<Object> {
        let mut session = self.session();
        let db = self.db();
        let mut found: Vec<Object> = db
            .objects
            .get(&kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|o| !session.pending.contains_key(&o.object_ref()))
            .filter(|o| accept(o))
            .cloned()
            .collect();
        found.extend(
            session
                .pending
                .iter()
                .filter(|(key, _)| key.kind == kind)
                .filter_map(|(_, entry)| entry.as_ref())
                .filter(|o| accept(o))
                .cloned(),
        );
        for object in &found {
            session.cache.insert(object.object_ref());
        }
        found
    }

    fn query(&self, kind: ObjectKind, options: &QueryOptions) -> Vec<Object> {
        let mut found = self.scan(kind, |o| options.accepts(o));
        if let Some(property) = &options.order_by {
            found.sort_by_key(|o| match o.property(property) {
                PropertyValue::Text(text) => text,
                _ => String::new(),
            });
        }
        if let Some(limit) = options.limit {
            found.truncate(limit);
        }
        found
    }

    fn view(&self, key: ObjectRef) -> Option<Object> {
        let mut session = self.session();
        let found = match session.pending.get(&key) {
            Some(entry) => entry.clone(),
            None => self.db().get(&key).cloned(),
        };
        if found.is_some() {
            session.cache.insert(key);
        }
        found
    }

    fn stage(&self, key: ObjectRef, entry: Option<Object>) {
        let mut session = self.session();
        session.cache.insert(key);
        session.pending.insert(key, entry);
    }
}

fn typed<T: Persistent>(objects: Vec<Object>) -> Vec<T> {
    objects
        .into_iter()
        .filter_map(|o| T::try_from(o).ok())
        .collect()
}

#[async_trait]
impl PersistenceContext for InMemoryContext {
    async fn get<T: Persistent>(&self, id: T::Id) -> StoreResult<Option<T>> {
        let key = ObjectRef::new(T::KIND, id);
        Ok(self.view(key).and_then(|o| T::try_from(o).ok()))
    }

    async fn get_by_name<T: Persistent>(&self, name: &str) -> StoreResult<Option<T>> {
        let found = self.scan(T::KIND, |o| o.name() == Some(name));
        Ok(typed::<T>(found).into_iter().next())
    }

    async fn search<T: Persistent>(&self, options: &QueryOptions) -> StoreResult<Vec<T>> {
        Ok(typed(self.query(T::KIND, options)))
    }

    async fn search_ids<T: Persistent>(&self, options: &QueryOptions) -> StoreResult<Vec<T::Id>> {
        Ok(self
            .query(T::KIND, options)
            .iter()
            .map(|o| T::Id::from(o.id()))
            .collect())
    }

    async fn count<T: Persistent>(&self, filter: &Filter) -> StoreResult<usize> {
        Ok(self.scan(T::KIND, |o| filter.matches_object(o)).len())
    }

    async fn save<T: Persistent>(&self, object: T) -> StoreResult<()> {
        let key = object.object_ref();
        self.stage(key, Some(object.into()));
        Ok(())
    }

    async fn remove<T: Persistent>(&self, id: T::Id) -> StoreResult<()> {
        let key = ObjectRef::new(T::KIND, id);
        if self.view(key).is_none() {
            return Err(StoreError::not_found(T::KIND, id));
        }
        self.stage(key, None);
        Ok(())
    }

    async fn remove_where<T: Persistent>(&self, filter: &Filter) -> StoreResult<usize> {
        let matched = self.scan(T::KIND, |o| filter.matches_object(o));
        for object in &matched {
            self.stage(object.object_ref(), None);
        }
        Ok(matched.len())
    }

    async fn update_where<T, F>(&self, filter: &Filter, update: F) -> StoreResult<usize>
    where
        T: Persistent,
        F: Fn(&mut T) + Send + Sync,
    {
        let matched: Vec<T> = typed(self.scan(T::KIND, |o| filter.matches_object(o)));
        let count = matched.len();
        for mut object in matched {
            update(&mut object);
            self.stage(object.object_ref(), Some(object.into()));
        }
        Ok(count)
    }

    async fn commit(&self) -> StoreResult<()> {
        let pending = std::mem::take(&mut self.session().pending);
        let mut db = self.db_mut();
        if db.commit_faults > 0 {
            db.commit_faults -= 1;
            return Err(StoreError::transient("Injected commit failure"));
        }

        let mut undo = Vec::with_capacity(pending.len());
        let mut removed = HashSet::new();
        for (key, entry) in pending {
            let previous = match entry {
                Some(object) => db.insert(key, object),
                None => {
                    removed.insert(key);
                    db.remove(&key)
                }
            };
            undo.push((key, previous));
        }

        if self.integrity_checks {
            if let Some(violation) = db.find_orphaned(&removed) {
                for (key, previous) in undo.into_iter().rev() {
                    match previous {
                        Some(object) => {
                            db.insert(key, object);
                        }
                        None => {
                            db.remove(&key);
                        }
                    }
                }
                return Err(violation);
            }
        }

        self.metrics.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.session().pending.clear();
        self.metrics.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decache(&self) {
        self.session().cache.clear();
        self.metrics.decaches.fetch_add(1, Ordering::SeqCst);
    }

    fn decache_object(&self, object: ObjectRef) {
        self.session().cache.remove(&object);
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let mut session = self.session();
        session.pending.clear();
        session.cache.clear();
        self.metrics.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn new_session(&self) -> StoreResult<Self> {
        Ok(self.sibling())
    }

    async fn acquire_lock(&self, identity: IdentityId, token: &LockToken) -> StoreResult<()> {
        let mut db = self.db_mut();
        match db.locks.get(&identity) {
            Some(holder) if holder != token => Err(StoreError::LockContention {
                identity,
                holder: holder.to_string(),
            }),
            _ => {
                db.locks.insert(identity, token.clone());
                Ok(())
            }
        }
    }

    fn release_lock(&self, identity: IdentityId, token: &LockToken) -> StoreResult<()> {
        let mut db = self.db_mut();
        match db.locks.get(&identity) {
            Some(holder) if holder == token => {
                db.locks.remove(&identity);
                Ok(())
            }
            Some(_) => Err(StoreError::LockNotHeld { identity }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iga_core::{Application, Identity, Link};

    #[tokio::test]
    async fn test_reads_see_pending_writes() {
        let ctx = InMemoryContext::new();
        let identity = Identity::new("alice");
        ctx.save(identity.clone()).await.unwrap();

        let found: Option<Identity> = ctx.get(identity.id).await.unwrap();
        assert_eq!(found, Some(identity.clone()));
        assert_eq!(ctx.committed_count(ObjectKind::Identity), 0);

        ctx.commit().await.unwrap();
        assert_eq!(ctx.committed_count(ObjectKind::Identity), 1);
    }

    #[tokio::test]
    async fn test_reconnect_discards_pending() {
        let ctx = InMemoryContext::new();
        ctx.save(Identity::new("bob")).await.unwrap();
        ctx.reconnect().await.unwrap();
        ctx.commit().await.unwrap();
        assert_eq!(ctx.committed_count(ObjectKind::Identity), 0);
        assert_eq!(ctx.metrics().reconnects(), 1);
    }

    #[tokio::test]
    async fn test_integrity_violation_rolls_back() {
        let ctx = InMemoryContext::new().with_integrity_checks();
        let app = Application::new("ldap");
        let identity = Identity::new("carol");
        let link = Link::new(identity.id, app.id, "carol");
        ctx.seed(app.clone());
        ctx.seed(identity.clone());
        ctx.seed(link);

        ctx.remove::<Identity>(identity.id).await.unwrap();
        let err = ctx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::IntegrityViolation { .. }));

        let still_there: Option<Identity> = ctx.get(identity.id).await.unwrap();
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn test_lock_contention_between_tokens() {
        let ctx = InMemoryContext::new();
        let identity = IdentityId::new();
        let first = LockToken::new();
        let second = LockToken::new();

        ctx.acquire_lock(identity, &first).await.unwrap();
        ctx.acquire_lock(identity, &first).await.unwrap();
        let err = ctx.acquire_lock(identity, &second).await.unwrap_err();
        assert!(err.is_transient());

        assert!(ctx.release_lock(identity, &second).is_err());
        ctx.release_lock(identity, &first).unwrap();
        ctx.acquire_lock(identity, &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_share_committed_state() {
        let ctx = InMemoryContext::new();
        let other = ctx.new_session().await.unwrap();
        let identity = Identity::new("dave");

        other.save(identity.clone()).await.unwrap();
        assert!(ctx.get::<Identity>(identity.id).await.unwrap().is_none());

        other.commit().await.unwrap();
        assert!(ctx.get::<Identity>(identity.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_update_and_remove() {
        let ctx = InMemoryContext::new();
        let app = Application::new("hr");
        for n in 0..3 {
            ctx.seed(Link::new(IdentityId::new(), app.id, format!("u{n}")));
        }
        let filter = Filter::eq("application", app.id);
        let updated = ctx
            .update_where::<Link, _>(&filter, |l| l.display_name = Some("x".into()))
            .await
            .unwrap();
        assert_eq!(updated, 3);
        ctx.commit().await.unwrap();

        let links: Vec<Link> = ctx.search(&QueryOptions::filter(filter.clone())).await.unwrap();
        assert!(links.iter().all(|l| l.display_name.as_deref() == Some("x")));

        assert_eq!(ctx.remove_where::<Link>(&filter).await.unwrap(), 3);
        ctx.commit().await.unwrap();
        assert_eq!(ctx.count::<Link>(&filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_commit_fault() {
        let ctx = InMemoryContext::new();
        ctx.fail_next_commits(1);
        ctx.save(Identity::new("erin")).await.unwrap();
        assert!(ctx.commit().await.unwrap_err().is_transient());
        ctx.commit().await.unwrap();
    }
}
