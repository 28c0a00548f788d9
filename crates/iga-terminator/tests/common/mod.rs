//! Common fixtures for iga-terminator integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use chrono::Utc;
use iga_core::*;
use iga_store::InMemoryContext;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a test subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub fn context() -> Arc<InMemoryContext> {
    init_tracing();
    Arc::new(InMemoryContext::new().with_integrity_checks())
}

/// A small but fully cross-referenced governance graph.
pub struct Graph {
    pub admin: Identity,
    pub alice: Identity,
    pub bob: Identity,
    pub ops: Identity,
    pub ldap: Application,
    pub hr: Application,
    pub alice_link: Link,
    pub bob_link: Link,
    pub engineer: Bundle,
    pub auditor: Bundle,
    pub group: ManagedAttribute,
    pub rule: Rule,
    pub policy: Policy,
    pub constraint: SodConstraint,
    pub violation: PolicyViolation,
    pub scorecard: Scorecard,
    pub app_scorecard: ApplicationScorecard,
    pub role_scorecard: RoleScorecard,
    pub owned_item: WorkItem,
    pub requested_item: WorkItem,
    pub definition: TaskDefinition,
    pub result: TaskResult,
    pub target: Target,
    pub association: TargetAssociation,
    pub config: Configuration,
    pub entitlement: IdentityEntitlement,
}

pub fn seed_graph(ctx: &InMemoryContext) -> Graph {
    let rule = Rule::new("Correlate by email");

    let mut ldap = Application::new("ldap");
    ldap.correlation_rule = Some(rule.id);
    let mut hr = Application::new("hr");
    hr.proxy = Some(ldap.id);
    hr.dependencies.push(ldap.id);

    let admin = Identity::new("spadmin");
    let mut bob = Identity::new("bob");
    let mut ops = Identity::workgroup("ops");
    let mut alice = Identity::new("alice");

    ops.owner = Some(bob.id);
    alice.manager = Some(bob.id);
    alice.workgroups.push(ops.id);
    alice.extended.insert("sponsor".to_string(), bob.id);
    ldap.owner = Some(bob.id);

    let alice_link = Link::new(alice.id, ldap.id, "uid=alice");
    let bob_link = Link::new(bob.id, ldap.id, "uid=bob");
    alice.links.push(alice_link.id);
    bob.links.push(bob_link.id);

    alice.exceptions.push(EntitlementException {
        application: ldap.id,
        attribute: "memberOf".to_string(),
        values: vec!["cn=admins".to_string()],
    });

    let mut engineer = Bundle::new("engineer");
    engineer.owner = Some(bob.id);
    engineer.selector_rule = Some(rule.id);
    let mut auditor = Bundle::new("auditor");
    auditor.inheritance.push(engineer.id);
    alice.assigned_roles.push(engineer.id);
    alice.detected_roles.push(auditor.id);

    let role_scorecard = RoleScorecard {
        id: RoleScorecardId::new(),
        role: engineer.id,
    };
    engineer.scorecard = Some(role_scorecard.id);

    let mut group = ManagedAttribute::stub(ldap.id, Schema::GROUP, "memberOf", "cn=admins");
    group.owner = Some(bob.id);

    let policy = Policy {
        id: PolicyId::new(),
        name: "SoD".to_string(),
        owner: Some(bob.id),
        violation_owner: Some(bob.id),
        violation_rule: Some(rule.id),
    };
    let constraint = SodConstraint {
        id: SodConstraintId::new(),
        name: "engineer vs auditor".to_string(),
        policy: Some(policy.id),
        owner: None,
        violation_owner: Some(bob.id),
        left_bundles: vec![engineer.id],
        right_bundles: vec![auditor.id],
    };
    let violation = PolicyViolation {
        id: PolicyViolationId::new(),
        identity: bob.id,
        policy: Some(policy.id),
        owner: Some(alice.id),
        description: None,
    };

    let scorecard = Scorecard {
        id: ScorecardId::new(),
        identity: bob.id,
        composite_score: 10,
    };
    bob.scorecard = Some(scorecard.id);
    let app_scorecard = ApplicationScorecard {
        id: ApplicationScorecardId::new(),
        application: ldap.id,
        composite_score: 5,
    };
    ldap.scorecard = Some(app_scorecard.id);

    let mut owned_item = WorkItem::new(bob.id);
    owned_item.assignee = Some(bob.id);
    let mut requested_item = WorkItem::new(alice.id);
    requested_item.requester = Some(bob.id);

    let definition = TaskDefinition {
        id: TaskDefinitionId::new(),
        name: "Aggregate ldap".to_string(),
        owner: Some(bob.id),
    };
    let mut result = TaskResult::new("Aggregate ldap run");
    result.definition = Some(definition.id);

    let target = Target {
        id: TargetId::new(),
        name: "share".to_string(),
        application: Some(ldap.id),
    };
    let association = TargetAssociation {
        id: TargetAssociationId::new(),
        owner: group.object_ref(),
        target: Some(target.id),
        rights: vec!["read".to_string()],
    };

    let config = Configuration {
        id: ConfigurationId::new(),
        name: Configuration::SYSTEM.to_string(),
        pass_through_applications: vec!["ldap".to_string(), format!("{},hr", ldap.id)],
        attributes: Attributes::new(),
    };

    let entitlement = IdentityEntitlement::for_link(&alice_link, alice.id, "memberOf", "cn=admins");

    let snapshot = IdentitySnapshot {
        id: IdentitySnapshotId::new(),
        identity_id: bob.id,
        identity_name: bob.name.clone(),
        summary: Attributes::new(),
        created: Utc::now(),
    };
    let external =
        ExternalAttribute::new(ExternalOwner::Link, alice_link.id.into(), "memberOf", "cn=admins");

    ctx.seed(rule.clone());
    ctx.seed(ldap.clone());
    ctx.seed(hr.clone());
    ctx.seed(admin.clone());
    ctx.seed(bob.clone());
    ctx.seed(ops.clone());
    ctx.seed(alice.clone());
    ctx.seed(alice_link.clone());
    ctx.seed(bob_link.clone());
    ctx.seed(engineer.clone());
    ctx.seed(auditor.clone());
    ctx.seed(role_scorecard.clone());
    ctx.seed(group.clone());
    ctx.seed(policy.clone());
    ctx.seed(constraint.clone());
    ctx.seed(violation.clone());
    ctx.seed(scorecard.clone());
    ctx.seed(app_scorecard.clone());
    ctx.seed(owned_item.clone());
    ctx.seed(requested_item.clone());
    ctx.seed(definition.clone());
    ctx.seed(result.clone());
    ctx.seed(target.clone());
    ctx.seed(association.clone());
    ctx.seed(config.clone());
    ctx.seed(entitlement.clone());
    ctx.seed(snapshot);
    ctx.seed(external);

    Graph {
        admin,
        alice,
        bob,
        ops,
        ldap,
        hr,
        alice_link,
        bob_link,
        engineer,
        auditor,
        group,
        rule,
        policy,
        constraint,
        violation,
        scorecard,
        app_scorecard,
        role_scorecard,
        owned_item,
        requested_item,
        definition,
        result,
        target,
        association,
        config,
        entitlement,
    }
}

impl Graph {
    /// Every seeded object that a deletion test can target.
    pub fn objects(&self) -> Vec<Object> {
        vec![
            self.admin.clone().into(),
            self.alice.clone().into(),
            self.bob.clone().into(),
            self.ops.clone().into(),
            self.ldap.clone().into(),
            self.hr.clone().into(),
            self.alice_link.clone().into(),
            self.bob_link.clone().into(),
            self.engineer.clone().into(),
            self.auditor.clone().into(),
            self.group.clone().into(),
            self.rule.clone().into(),
            self.policy.clone().into(),
            self.constraint.clone().into(),
            self.violation.clone().into(),
            self.scorecard.clone().into(),
            self.app_scorecard.clone().into(),
            self.role_scorecard.clone().into(),
            self.owned_item.clone().into(),
            self.requested_item.clone().into(),
            self.definition.clone().into(),
            self.result.clone().into(),
            self.target.clone().into(),
            self.association.clone().into(),
            self.config.clone().into(),
            self.entitlement.clone().into(),
        ]
    }
}
