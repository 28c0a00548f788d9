//! Id-first iteration for loops that mutate what they iterate.
//!
//! The matching ids are materialized up front. Objects are then loaded one at
//! a time, so the loop body can commit and decache without disturbing the
//! iteration. Ids whose object vanished in the meantime are skipped.

use std::collections::VecDeque;

use iga_core::Persistent;

use crate::context::PersistenceContext;
use crate::error::StoreResult;
use crate::filter::QueryOptions;

pub struct ProjectionIterator<T: Persistent> {
    ids: VecDeque<T::Id>,
    total: usize,
    fetched: usize,
}

impl<T: Persistent> ProjectionIterator<T> {
    #[must_use]
    pub fn new(ids: Vec<T::Id>) -> Self {
        Self {
            total: ids.len(),
            ids: ids.into(),
            fetched: 0,
        }
    }

    pub async fn query<C: PersistenceContext>(
        ctx: &C,
        options: &QueryOptions,
    ) -> StoreResult<Self> {
        Ok(Self::new(ctx.search_ids::<T>(options).await?))
    }

    /// Number of ids the projection matched.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of objects returned so far.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    pub fn next_id(&mut self) -> Option<T::Id> {
        self.ids.pop_front()
    }

    pub async fn fetch_next<C: PersistenceContext>(&mut self, ctx: &C) -> StoreResult<Option<T>> {
        while let Some(id) = self.ids.pop_front() {
            if let Some(object) = ctx.get::<T>(id).await? {
                self.fetched += 1;
                return Ok(Some(object));
            }
        }
        Ok(None)
    }
}
