//! Group inheritance cycle detection.

use std::collections::HashSet;

use iga_core::{ManagedAttribute, ManagedAttributeId};
use iga_store::{PersistenceContext, StoreResult};
use tracing::warn;

/// Splits candidate parents of `node` into those that keep the hierarchy
/// acyclic and those that would close a cycle.
///
/// A candidate closes a cycle when it is `node` itself or when `node` is
/// reachable through the candidate's own inheritance chain as stored.
pub async fn prune_cycles<C: PersistenceContext>(
    ctx: &C,
    node: ManagedAttributeId,
    parents: Vec<ManagedAttributeId>,
) -> StoreResult<(Vec<ManagedAttributeId>, Vec<ManagedAttributeId>)> {
    let mut kept = Vec::with_capacity(parents.len());
    let mut pruned = Vec::new();
    for parent in parents {
        if kept.contains(&parent) || pruned.contains(&parent) {
            continue;
        }
        if reaches(ctx, parent, node).await? {
            warn!(group_id = %node, parent_id = %parent, "Inheritance cycle pruned");
            pruned.push(parent);
        } else {
            kept.push(parent);
        }
    }
    Ok((kept, pruned))
}

async fn reaches<C: PersistenceContext>(
    ctx: &C,
    from: ManagedAttributeId,
    target: ManagedAttributeId,
) -> StoreResult<bool> {
    let mut stack = vec![from];
    let mut visited = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == target {
            return Ok(true);
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(group) = ctx.get::<ManagedAttribute>(current).await? {
            stack.extend(group.inheritance);
        }
    }
    Ok(false)
}
