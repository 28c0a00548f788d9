//! Bulk refresh-date touch for links skipped as unchanged.
//!
//! Optimized records do not pass through identity completion, but their
//! links must still look fresh to delete detection.

use chrono::{DateTime, Utc};
use iga_core::{Link, LinkId};
use iga_store::{Filter, PersistenceContext, StoreResult};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RefreshTouchBatch {
    pending: Vec<LinkId>,
    batch_size: usize,
}

impl RefreshTouchBatch {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Queues a link. Returns `true` when the batch is full.
    pub fn push(&mut self, link: LinkId) -> bool {
        self.pending.push(link);
        self.pending.len() >= self.batch_size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sets `last_refresh` on every queued link and commits.
    pub async fn flush<C: PersistenceContext>(&mut self, ctx: &C, now: DateTime<Utc>) -> StoreResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let ids = std::mem::take(&mut self.pending);
        let touched = ctx
            .update_where::<Link, _>(&Filter::id_in(&ids), move |link| {
                link.last_refresh = Some(now);
            })
            .await?;
        ctx.commit().await?;
        debug!(touched, "Refresh dates touched");
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iga_core::{ApplicationId, IdentityId};
    use iga_store::InMemoryContext;

    #[tokio::test]
    async fn test_flush_touches_only_queued_links() {
        let ctx = InMemoryContext::new();
        let queued = Link::new(IdentityId::new(), ApplicationId::new(), "u1");
        let other = Link::new(IdentityId::new(), ApplicationId::new(), "u2");
        ctx.seed(queued.clone());
        ctx.seed(other.clone());

        let mut batch = RefreshTouchBatch::new(10);
        assert!(!batch.push(queued.id));
        let now = Utc::now();
        assert_eq!(batch.flush(&ctx, now).await.unwrap(), 1);
        assert!(batch.is_empty());

        let queued = ctx.get::<Link>(queued.id).await.unwrap().unwrap();
        let other = ctx.get::<Link>(other.id).await.unwrap().unwrap();
        assert_eq!(queued.last_refresh, Some(now));
        assert_eq!(other.last_refresh, None);
    }

    #[test]
    fn test_push_reports_full_batch() {
        let mut batch = RefreshTouchBatch::new(2);
        assert!(!batch.push(LinkId::new()));
        assert!(batch.push(LinkId::new()));
    }
}
