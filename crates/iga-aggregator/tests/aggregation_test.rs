//! End-to-end account and group aggregation.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use iga_aggregator::*;
use iga_core::*;
use iga_store::{Filter, PersistenceContext};

#[tokio::test]
async fn test_first_pass_creates_identities_and_links() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(3));

    let summary = fx
        .aggregator(AggregationConfig::for_applications(["ldap"]))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.statistics.total, 3);
    assert_eq!(summary.statistics.created, 3);
    assert_eq!(summary.statistics.errors, 0);
    assert!(!summary.terminated);
    let links = fx.links(&app).await;
    assert_eq!(links.len(), 3);
    assert!(links.iter().all(|l| l.identity.is_some() && l.last_refresh.is_some()));
    assert_eq!(fx.ctx.committed_count(ObjectKind::Identity), 3);
    assert!(fx.ctx.dangling_references().is_empty());
}

#[tokio::test]
async fn test_second_identical_pass_is_optimized() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(4));
    let config = AggregationConfig::for_applications(["ldap"]);

    fx.aggregator(config.clone()).run().await.unwrap();
    let before = fx.links(&app).await;

    let summary = fx.aggregator(config).run().await.unwrap();
    assert_eq!(summary.statistics.optimized, 4);
    assert_eq!(summary.statistics.created, 0);
    assert_eq!(summary.statistics.updated, 0);

    let after = fx.links(&app).await;
    assert_eq!(before.len(), after.len());
    for (old, new) in before.into_iter().zip(after) {
        assert!(new.last_refresh >= old.last_refresh);
        let mut old = old;
        let mut new = new;
        old.last_refresh = None;
        new.last_refresh = None;
        assert_eq!(old, new);
    }
    assert_eq!(fx.ctx.committed_count(ObjectKind::Identity), 4);
}

#[tokio::test]
async fn test_changed_record_is_updated() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(2));
    let config = AggregationConfig::for_applications(["ldap"]);
    fx.aggregator(config.clone()).run().await.unwrap();

    fx.source.set_records(
        "ldap",
        Schema::ACCOUNT,
        vec![
            account("user000").with_attribute("mail", "new@example.com"),
            account("user001"),
        ],
    );
    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.updated, 1);
    assert_eq!(summary.statistics.optimized, 1);
    let link = fx.link(&app, "user000").await.unwrap();
    assert_eq!(link.attributes["mail"], "new@example.com");
}

#[tokio::test]
async fn test_multiplexed_records_share_one_identity() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("a1").with_attribute("person", "p1"),
            account("a2").with_attribute("person", "p1"),
            account("b1").with_attribute("person", "p2"),
        ],
    );
    let identities = Arc::new(InstrumentedIdentities::new(fx.identities.clone()));
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.multiplex_attribute = Some("person".to_string());

    let summary = fx
        .aggregator_with(fx.source.clone(), identities.clone(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.statistics.created, 3);
    assert_eq!(identities.correlations(), 2);
    let a1 = fx.link(&app, "a1").await.unwrap();
    let a2 = fx.link(&app, "a2").await.unwrap();
    let b1 = fx.link(&app, "b1").await.unwrap();
    assert_eq!(a1.identity, a2.identity);
    assert_ne!(a1.identity, b1.identity);

    let holder = fx.ctx.get::<Identity>(a1.identity.unwrap()).await.unwrap().unwrap();
    assert_eq!(holder.links.len(), 2);
    assert!(!holder.needs_refresh);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, vec![account("u1"), account("u2"), account("u3")]);
    let identities = Arc::new(InstrumentedIdentities::new(fx.identities.clone()).fail_once("u2"));

    let summary = fx
        .aggregator_with(
            fx.source.clone(),
            identities,
            AggregationConfig::for_applications(["ldap"]),
        )
        .run()
        .await
        .unwrap();

    assert_eq!(summary.statistics.created, 3);
    assert_eq!(summary.statistics.retried, 1);
    assert_eq!(summary.statistics.errors, 0);
    assert!(!summary.check_deleted_cancelled);
    assert!(fx.link(&app, "u2").await.is_some());
    assert_eq!(fx.ctx.committed_count(ObjectKind::Identity), 3);
}

#[tokio::test]
async fn test_partial_record_without_account_is_an_error() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("u1"),
            ResourceObject::account("ghost").with_attribute("mail", "x").incremental(),
        ],
    );

    let summary = fx
        .aggregator(AggregationConfig::for_applications(["ldap"]))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.statistics.created, 1);
    assert_eq!(summary.statistics.errors, 1);
    assert!(summary.check_deleted_cancelled);
    assert_eq!(summary.errors().count(), 1);
    assert!(fx.link(&app, "ghost").await.is_none());
}

#[tokio::test]
async fn test_delete_record_removes_link() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(2));
    let config = AggregationConfig::for_applications(["ldap"]);
    fx.aggregator(config.clone()).run().await.unwrap();

    let mut config = config;
    config.record_deleted_objects = true;
    fx.source.set_records(
        "ldap",
        Schema::ACCOUNT,
        vec![ResourceObject::account("user000").with_uuid("u-0").deleted()],
    );
    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.deleted, 1);
    assert!(fx.link(&app, "user000").await.is_none());
    assert!(fx.link(&app, "user001").await.is_some());
    assert_eq!(fx.ctx.committed_count(ObjectKind::DeletedObject), 1);
    assert!(fx.ctx.dangling_references().is_empty());
}

#[tokio::test]
async fn test_correlate_only_ignores_unmatched_records() {
    let fx = Fixture::new();
    let app = ldap();
    fx.ctx.seed(Identity::new("known"));
    fx.install(&app, vec![account("known"), account("stranger")]);
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.correlate_only = true;

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.created, 1);
    assert_eq!(summary.statistics.ignored, 1);
    assert!(fx.link(&app, "stranger").await.is_none());
    assert_eq!(fx.ctx.committed_count(ObjectKind::Identity), 1);
}

#[tokio::test]
async fn test_proxied_application_is_generated() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("u1").with_attribute("app", "crm"),
            account("u2").with_attribute("app", "crm"),
            account("u3"),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.source_application_attribute = Some("app".to_string());

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.created, 3);
    let crm = fx.ctx.get_by_name::<Application>("crm").await.unwrap().unwrap();
    assert!(crm.generated);
    assert_eq!(crm.proxy, Some(app.id));
    assert_eq!(fx.links(&crm).await.len(), 2);
    assert_eq!(fx.links(&app).await.len(), 1);
}

#[tokio::test]
async fn test_foreign_application_name_is_ambiguous() {
    let fx = Fixture::new();
    let app = ldap();
    fx.ctx.seed(Application::new("hr"));
    fx.install(&app, vec![account("u1").with_attribute("app", "hr"), account("u2")]);
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.source_application_attribute = Some("app".to_string());

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.errors, 1);
    assert_eq!(summary.statistics.created, 1);
    assert!(summary.errors().any(|m| m.text.contains("Ambiguous")));
}

#[tokio::test]
async fn test_missing_application_is_reported() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(1));

    let summary = fx
        .aggregator(AggregationConfig::for_applications(["ldap", "nowhere"]))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.statistics.created, 1);
    assert!(summary.errors().any(|m| m.text.contains("nowhere")));
}

#[tokio::test]
async fn test_sequential_halt_stops_at_failed_application() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(1));
    let mut config = AggregationConfig::for_applications(["nowhere", "ldap"]);
    config.halt_on_error = true;

    let summary = fx.aggregator(config.clone()).run().await.unwrap();
    assert!(!summary.terminated);
    assert_eq!(summary.statistics.created, 1);

    config.sequential = true;
    let fx = Fixture::new();
    fx.install(&app, accounts(1));
    let summary = fx.aggregator(config).run().await.unwrap();
    assert!(summary.terminated);
    assert_eq!(summary.statistics.created, 0);
    assert!(fx.links(&app).await.is_empty());
}

#[tokio::test]
async fn test_halt_on_error_terminates() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            ResourceObject::account("ghost").with_attribute("mail", "x").sparse(),
            account("u1"),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.halt_on_error = true;

    let summary = fx.aggregator(config).run().await.unwrap();

    assert!(summary.terminated);
    assert_eq!(summary.statistics.errors, 1);
    assert!(fx.link(&app, "u1").await.is_none());
}

#[tokio::test]
async fn test_restartable_run_resumes_where_it_stopped() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(100));
    let task = fx.task_result();
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.restartable = true;
    config.restart_flush_interval = 10;

    let stopping = Arc::new(TerminateAfter::new(fx.source.clone(), 50));
    let first = fx
        .aggregator_with(stopping.clone(), fx.identities.clone(), config.clone())
        .with_task_result(task.id);
    stopping.arm(first.terminate_handle());
    let summary = first.run().await.unwrap();
    assert!(summary.terminated);
    assert_eq!(summary.statistics.created, 50);

    let stored = fx.ctx.get::<TaskResult>(task.id).await.unwrap().unwrap();
    assert!(stored.completed.is_none());
    let state = RunState::load(&stored).unwrap().unwrap();
    assert!(state.terminated);
    assert_eq!(state.restart.values().map(|l| l.len()).sum::<usize>(), 50);

    let summary = fx
        .aggregator(config)
        .with_task_result(task.id)
        .run()
        .await
        .unwrap();
    assert!(!summary.terminated);
    assert_eq!(summary.statistics.skipped, 50);
    assert_eq!(summary.statistics.created, 100);
    assert_eq!(summary.statistics.total, 100);
    assert_eq!(fx.links(&app).await.len(), 100);

    let stored = fx.ctx.get::<TaskResult>(task.id).await.unwrap().unwrap();
    assert!(stored.completed.is_some());
    assert!(RunState::load(&stored).unwrap().unwrap().restart.is_empty());
}

#[tokio::test]
async fn test_phases_run_as_separate_invocations() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(&app, accounts(5));
    let task = fx.task_result();
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.enable_partitioning = true;
    config.objects_per_partition = 2;

    let summary = fx
        .aggregator(config.clone())
        .with_task_result(task.id)
        .run_phase(Phase::Partition)
        .await
        .unwrap();
    assert_eq!(summary.statistics.total, 0);
    let stored = fx.ctx.get::<TaskResult>(task.id).await.unwrap().unwrap();
    assert_eq!(RunState::load(&stored).unwrap().unwrap().partitions.len(), 3);

    let summary = fx
        .aggregator(config)
        .with_task_result(task.id)
        .run_phase(Phase::Aggregate)
        .await
        .unwrap();
    assert_eq!(summary.statistics.created, 5);
    let state = RunState::load(&fx.ctx.get::<TaskResult>(task.id).await.unwrap().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(state.completed_partitions.len(), 3);
    assert!(state.completed_phases.contains(&Phase::Aggregate));
}

#[tokio::test]
async fn test_manual_aggregation_never_deletes() {
    let fx = Fixture::new();
    let app = ldap();
    fx.ctx.seed(app.clone());
    fx.seed_account(&app, "stale", Duration::hours(1));
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.check_deleted = true;

    let summary = fx
        .aggregator(config)
        .aggregate_manual("ldap", vec![account("m1"), account("m2")])
        .await
        .unwrap();

    assert_eq!(summary.statistics.created, 2);
    assert_eq!(summary.statistics.deleted, 0);
    assert!(fx.link(&app, "stale").await.is_some());
}

#[tokio::test]
async fn test_external_attributes_written_in_background() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("u1").with_attribute("costCenter", "cc-1"),
            account("u2").with_attribute("costCenter", "cc-2"),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.external_attribute_worker = true;

    fx.aggregator(config).run().await.unwrap();

    assert_eq!(fx.ctx.committed_count(ObjectKind::ExternalAttribute), 2);
    let link = fx.link(&app, "u1").await.unwrap();
    let rows = fx
        .ctx
        .search::<ExternalAttribute>(&iga_store::QueryOptions::filter(Filter::eq(
            "object_id",
            uuid::Uuid::from(link.id),
        )))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, "cc-1");
}

#[tokio::test]
async fn test_failed_commit_leaves_no_background_external_rows() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("u1").with_attribute("costCenter", "cc-1"),
            account("u2").with_attribute("costCenter", "cc-2"),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.external_attribute_worker = true;
    fx.ctx.fail_next_commits(1);

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.retried, 1);
    assert_eq!(summary.statistics.created, 2);
    assert_eq!(fx.ctx.committed_count(ObjectKind::ExternalAttribute), 2);
    let links: Vec<uuid::Uuid> = fx.links(&app).await.iter().map(|l| l.id.into()).collect();
    let rows = fx
        .ctx
        .search::<ExternalAttribute>(&iga_store::QueryOptions::new())
        .await
        .unwrap();
    assert!(rows.iter().all(|row| links.contains(&row.object_id)));
    assert!(fx.ctx.dangling_references().is_empty());
}

#[tokio::test]
async fn test_group_hierarchy_cycle_is_broken() {
    let fx = Fixture::new();
    let app = ldap();
    fx.ctx.seed(app.clone());
    fx.source.set_records(
        "ldap",
        Schema::GROUP,
        vec![
            ResourceObject::group("A").with_attribute("memberOf", "B"),
            ResourceObject::group("B").with_attribute("memberOf", "C"),
            ResourceObject::group("C").with_attribute("memberOf", "A"),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.aggregation_type = AggregationType::Group;

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.cycles_pruned, 1);
    assert_eq!(summary.statistics.groups_created + summary.statistics.groups_updated, 3);
    assert_eq!(summary.warnings().count(), 1);

    let a = fx.group(&app, "A").await.unwrap();
    let b = fx.group(&app, "B").await.unwrap();
    let c = fx.group(&app, "C").await.unwrap();
    assert_eq!(a.inheritance, vec![b.id]);
    assert_eq!(b.inheritance, vec![c.id]);
    assert!(c.inheritance.is_empty());
}

#[tokio::test]
async fn test_group_members_are_not_stored_as_attributes() {
    let fx = Fixture::new();
    let app = ldap();
    fx.ctx.seed(app.clone());
    fx.source.set_records(
        "ldap",
        Schema::GROUP,
        vec![ResourceObject::group("admins")
            .with_display_name("Administrators")
            .with_attribute("member", vec!["u1", "u2"])
            .with_attribute("owner", "it")],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.aggregation_type = AggregationType::Group;

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.groups_created, 1);
    let group = fx.group(&app, "admins").await.unwrap();
    assert_eq!(group.display_name.as_deref(), Some("Administrators"));
    assert_eq!(group.attribute, "groups");
    assert!(!group.attributes.contains_key("member"));
    assert!(group.attributes.contains_key("owner"));
    assert!(group.last_refresh.is_some());
}

#[tokio::test]
async fn test_managed_values_are_promoted() {
    let fx = Fixture::new();
    let app = ldap();
    fx.install(
        &app,
        vec![
            account("u1").with_attribute("groups", vec!["g1", "g2"]),
            account("u2").with_attribute("groups", vec!["g2"]),
        ],
    );
    let mut config = AggregationConfig::for_applications(["ldap"]);
    config.promote_managed_attributes = true;

    let summary = fx.aggregator(config).run().await.unwrap();

    assert_eq!(summary.statistics.managed_attributes_promoted, 2);
    assert!(fx.group(&app, "g1").await.is_some());
    assert!(fx.group(&app, "g2").await.is_some());
    let entitlements = fx
        .ctx
        .count::<IdentityEntitlement>(&Filter::eq("name", "groups"))
        .await
        .unwrap();
    assert_eq!(entitlements, 3);
}
