//! Integration tests for cascading deletion.
//!
//! Every test runs against an in-memory store with integrity checks on, so
//! a commit that would leave a reference to a removed object fails.

mod common;

use std::sync::Arc;

use common::{context, seed_graph};
use iga_core::*;
use iga_store::{LockToken, PersistenceContext, StoreError};
use iga_terminator::{Terminator, TerminatorConfig, TerminatorError};

/// Deleting any single object leaves no dangling references.
#[tokio::test]
async fn test_every_deletion_leaves_no_dangling_references() {
    let count = seed_graph(&context()).objects().len();
    for index in 0..count {
        let ctx = context();
        let graph = seed_graph(&ctx);
        let object = graph.objects().remove(index);
        let reference = object.object_ref();

        let terminator = Terminator::new(Arc::clone(&ctx));
        terminator
            .delete_object(object)
            .await
            .unwrap_or_else(|e| panic!("deleting {reference} failed: {e}"));

        assert!(
            ctx.dangling_references().is_empty(),
            "dangling references after deleting {reference}: {:?}",
            ctx.dangling_references()
        );
    }
}

/// Deleting an identity repairs everything that pointed at it.
#[tokio::test]
async fn test_identity_cascade() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator.delete(graph.bob.clone()).await.unwrap();

    assert!(ctx.get::<Identity>(graph.bob.id).await.unwrap().is_none());
    assert!(ctx.get::<Link>(graph.bob_link.id).await.unwrap().is_none());
    assert!(ctx.get::<Scorecard>(graph.scorecard.id).await.unwrap().is_none());
    assert!(ctx
        .get::<PolicyViolation>(graph.violation.id)
        .await
        .unwrap()
        .is_none());
    assert!(ctx
        .get::<WorkItem>(graph.requested_item.id)
        .await
        .unwrap()
        .is_none());

    let alice = ctx.get::<Identity>(graph.alice.id).await.unwrap().unwrap();
    assert_eq!(alice.manager, None);
    assert!(alice.extended.is_empty());

    let ops = ctx.get::<Identity>(graph.ops.id).await.unwrap().unwrap();
    assert_eq!(ops.owner, None);

    let item = ctx.get::<WorkItem>(graph.owned_item.id).await.unwrap().unwrap();
    assert_eq!(item.owner, Some(graph.admin.id));
    assert_eq!(item.assignee, None);

    let engineer = ctx.get::<Bundle>(graph.engineer.id).await.unwrap().unwrap();
    assert_eq!(engineer.owner, None);
    let policy = ctx.get::<Policy>(graph.policy.id).await.unwrap().unwrap();
    assert_eq!(policy.owner, None);
    assert_eq!(policy.violation_owner, None);

    assert_eq!(ctx.committed_count(ObjectKind::IdentitySnapshot), 0);
    assert!(ctx.lock_holder(graph.alice.id).is_none());
}

/// Work items fall back to no owner when the administrator is the deleted identity.
#[tokio::test]
async fn test_work_items_unowned_without_administrator() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let config = TerminatorConfig {
        admin_identity: "bob".to_string(),
        ..TerminatorConfig::default()
    };
    let terminator = Terminator::new(Arc::clone(&ctx)).with_config(config);

    terminator.delete(graph.bob.clone()).await.unwrap();

    let item = ctx.get::<WorkItem>(graph.owned_item.id).await.unwrap().unwrap();
    assert_eq!(item.owner, None);
}

/// Protected identities survive deletion requests untouched.
#[tokio::test]
async fn test_protected_identity_is_skipped() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let mut bob = graph.bob.clone();
    bob.protected = true;
    ctx.seed(bob.clone());

    let terminator = Terminator::new(Arc::clone(&ctx));
    terminator.delete(bob).await.unwrap();

    assert!(ctx.get::<Identity>(graph.bob.id).await.unwrap().is_some());
    assert!(ctx.get::<Link>(graph.bob_link.id).await.unwrap().is_some());
    assert_eq!(terminator.deleted_count(), 0);
}

/// Deleting an application removes its accounts, catalog and references.
#[tokio::test]
async fn test_application_cascade() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator
        .delete_by_id::<Application>(graph.ldap.id)
        .await
        .unwrap();

    assert_eq!(ctx.committed_count(ObjectKind::Link), 0);
    assert_eq!(ctx.committed_count(ObjectKind::ManagedAttribute), 0);
    assert_eq!(ctx.committed_count(ObjectKind::IdentityEntitlement), 0);
    assert_eq!(ctx.committed_count(ObjectKind::ExternalAttribute), 0);
    assert_eq!(ctx.committed_count(ObjectKind::Target), 0);
    assert_eq!(ctx.committed_count(ObjectKind::TargetAssociation), 0);
    assert_eq!(ctx.committed_count(ObjectKind::ApplicationScorecard), 0);

    let hr = ctx.get::<Application>(graph.hr.id).await.unwrap().unwrap();
    assert_eq!(hr.proxy, None);
    assert!(hr.dependencies.is_empty());

    let alice = ctx.get::<Identity>(graph.alice.id).await.unwrap().unwrap();
    assert!(alice.links.is_empty());
    assert!(alice.exceptions.is_empty());

    let config = ctx
        .get::<Configuration>(graph.config.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config.pass_through_applications, vec!["hr".to_string()]);
}

/// Deleting a role prunes it from identities, roles and constraints.
#[tokio::test]
async fn test_bundle_cascade() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator.delete(graph.engineer.clone()).await.unwrap();

    let alice = ctx.get::<Identity>(graph.alice.id).await.unwrap().unwrap();
    assert!(alice.assigned_roles.is_empty());
    assert_eq!(alice.detected_roles, vec![graph.auditor.id]);

    let auditor = ctx.get::<Bundle>(graph.auditor.id).await.unwrap().unwrap();
    assert!(auditor.inheritance.is_empty());

    let constraint = ctx
        .get::<SodConstraint>(graph.constraint.id)
        .await
        .unwrap()
        .unwrap();
    assert!(constraint.left_bundles.is_empty());
    assert_eq!(constraint.right_bundles, vec![graph.auditor.id]);
    assert_eq!(ctx.committed_count(ObjectKind::RoleScorecard), 0);
}

/// Deleting a rule nulls every slot that named it.
#[tokio::test]
async fn test_rule_references_nulled() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator.delete(graph.rule.clone()).await.unwrap();

    let ldap = ctx.get::<Application>(graph.ldap.id).await.unwrap().unwrap();
    assert_eq!(ldap.correlation_rule, None);
    let engineer = ctx.get::<Bundle>(graph.engineer.id).await.unwrap().unwrap();
    assert_eq!(engineer.selector_rule, None);
    let policy = ctx.get::<Policy>(graph.policy.id).await.unwrap().unwrap();
    assert_eq!(policy.violation_rule, None);
}

/// Policies take their constraints with them; violations are detached.
#[tokio::test]
async fn test_policy_cascade() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator.delete(graph.policy.clone()).await.unwrap();

    assert!(ctx
        .get::<SodConstraint>(graph.constraint.id)
        .await
        .unwrap()
        .is_none());
    let violation = ctx
        .get::<PolicyViolation>(graph.violation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(violation.policy, None);
}

/// Link deletion can leave the entitlement index in place.
#[tokio::test]
async fn test_delete_link_preserving_entitlements() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));

    terminator
        .delete_link(graph.alice_link.clone(), true)
        .await
        .unwrap();

    assert!(ctx
        .get::<IdentityEntitlement>(graph.entitlement.id)
        .await
        .unwrap()
        .is_some());
    assert_eq!(ctx.committed_count(ObjectKind::ExternalAttribute), 0);
    let alice = ctx.get::<Identity>(graph.alice.id).await.unwrap().unwrap();
    assert!(alice.links.is_empty());
}

/// A locked identity blocks the cascade and the object survives.
#[tokio::test]
async fn test_lock_contention_aborts_deletion() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let other = LockToken::named("another-task");
    ctx.acquire_lock(graph.alice.id, &other).await.unwrap();

    let terminator = Terminator::new(Arc::clone(&ctx));
    let err = terminator
        .delete(graph.engineer.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TerminatorError::Store(StoreError::LockContention { .. })
    ));
    assert!(err.is_transient());
    assert!(ctx.get::<Bundle>(graph.engineer.id).await.unwrap().is_some());

    let unlocked = Terminator::new(Arc::clone(&ctx)).with_config(TerminatorConfig {
        no_locking: true,
        ..TerminatorConfig::default()
    });
    unlocked.delete(graph.engineer.clone()).await.unwrap();
    assert!(ctx.get::<Bundle>(graph.engineer.id).await.unwrap().is_none());
    assert_eq!(ctx.lock_holder(graph.alice.id), Some(other));
}

/// Bulk deletion stops once terminated.
#[tokio::test]
async fn test_terminated_bulk_delete_stops() {
    let ctx = context();
    let graph = seed_graph(&ctx);
    let terminator = Terminator::new(Arc::clone(&ctx));
    terminator.terminate();

    let deleted = terminator
        .delete_where::<Link>(iga_store::Filter::eq("application", graph.ldap.id))
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(ctx.committed_count(ObjectKind::Link), 2);
}

/// Deleting by id reports objects that do not exist.
#[tokio::test]
async fn test_delete_missing_object() {
    let ctx = context();
    let terminator = Terminator::new(Arc::clone(&ctx));
    let err = terminator
        .delete_by_id::<Identity>(IdentityId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TerminatorError::NotFound {
            kind: ObjectKind::Identity,
            ..
        }
    ));
}
