//! 生命周期阶段编排：执行顺序、完成闩锁传递、租户分区与提交/回滚阶段。

mod support;

use std::sync::Arc;

use spark_registry::{
    AnyFilter, AuditHandler, CallScope, InMemoryAuditRecorder, LifecyclePhase, MethodSet,
    Operation, OperationKind, Registry, Resource, TenantId,
};
use support::{Recorder, call_log, entries};

fn methods(kinds: &[OperationKind]) -> Option<MethodSet> {
    Some(MethodSet::of(kinds))
}

#[test]
fn phases_run_in_protocol_order() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    let lifecycle = registry.lifecycle();
    for (phase, name) in [
        (LifecyclePhase::Reporting, "reporting"),
        (LifecyclePhase::User, "user"),
        (LifecyclePhase::System, "system"),
        (LifecyclePhase::Tenant, "tenant"),
        (LifecyclePhase::Default, "default"),
    ] {
        lifecycle.add_handler(
            phase,
            methods(&[OperationKind::Get]),
            Arc::new(AnyFilter),
            Recorder::new(name, &log).shared(),
        );
    }

    registry.put("/a", Resource::new()).unwrap();
    registry.get("/a").unwrap();
    assert_eq!(
        entries(&log),
        ["default:GET", "tenant:GET", "system:GET", "user:GET", "reporting:GET"]
    );
}

#[test]
fn completion_skips_tenant_and_system_but_not_user_or_reporting() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    let recorder = Arc::new(InMemoryAuditRecorder::new());
    let lifecycle = registry.lifecycle();
    let get = || methods(&[OperationKind::Get]);

    lifecycle.add_handler(
        LifecyclePhase::Default,
        get(),
        Arc::new(AnyFilter),
        Recorder::new("default", &log)
            .completing()
            .answering("handled")
            .shared(),
    );
    lifecycle.add_handler(LifecyclePhase::Tenant, get(), Arc::new(AnyFilter), Recorder::new("tenant", &log).shared());
    lifecycle.add_handler(LifecyclePhase::System, get(), Arc::new(AnyFilter), Recorder::new("system", &log).shared());
    lifecycle.add_handler(LifecyclePhase::User, get(), Arc::new(AnyFilter), Recorder::new("user", &log).shared());
    lifecycle.add_handler(
        LifecyclePhase::Reporting,
        get(),
        Arc::new(AnyFilter),
        Arc::new(AuditHandler::new(recorder.clone())),
    );

    let resource = registry.get("/virtual").unwrap();
    assert_eq!(resource.content(), b"handled");
    assert_eq!(entries(&log), ["default:GET", "user:GET"]);

    let events = recorder.events();
    assert_eq!(events.len(), 1, "reporting 阶段总是执行");
    assert!(events[0].completed, "reporting 阶段应看到累计的完成状态");
    assert_eq!(events[0].path, "/virtual");
}

#[test]
fn user_phase_completion_is_accumulated() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    registry.lifecycle().add_handler(
        LifecyclePhase::User,
        methods(&[OperationKind::Get]),
        Arc::new(AnyFilter),
        Recorder::new("user", &log)
            .completing()
            .answering("from user phase")
            .shared(),
    );
    let resource = registry.get("/nowhere").unwrap();
    assert_eq!(resource.content(), b"from user phase", "user 阶段完成后不应回落存储");
}

#[test]
fn tenant_partitions_only_see_their_tenant() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    registry.lifecycle().add_handler_for_tenant(
        TenantId(7),
        LifecyclePhase::User,
        methods(&[OperationKind::Get]),
        Arc::new(AnyFilter),
        Recorder::new("tenant7", &log).shared(),
    );
    registry.put("/a", Resource::new()).unwrap();

    registry.get("/a").unwrap();
    assert!(entries(&log).is_empty(), "超级租户不应触发租户 7 的 Handler");

    let scope = CallScope::builder().tenant(TenantId(7)).identity("alice").build();
    registry
        .execute(&scope, Operation::Get {
            path: "/a".to_owned(),
        })
        .unwrap();
    assert_eq!(entries(&log), ["tenant7:GET"]);
}

#[test]
fn commit_phase_follows_successful_writes() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    registry.lifecycle().add_handler(
        LifecyclePhase::Commit,
        methods(&[OperationKind::Put]),
        Arc::new(AnyFilter),
        Recorder::new("commit", &log).shared(),
    );
    registry.lifecycle().add_handler(
        LifecyclePhase::Rollback,
        methods(&[OperationKind::Put]),
        Arc::new(AnyFilter),
        Recorder::new("rollback", &log).shared(),
    );

    registry.put("/a", Resource::new()).unwrap();
    assert_eq!(entries(&log), ["commit:PUT"]);
}

#[test]
fn rollback_phase_follows_failed_writes() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    let put = || methods(&[OperationKind::Put]);
    registry.lifecycle().add_handler(
        LifecyclePhase::Default,
        put(),
        Arc::new(AnyFilter),
        Recorder::new("guard", &log).failing().shared(),
    );
    registry
        .lifecycle()
        .add_handler(LifecyclePhase::Commit, put(), Arc::new(AnyFilter), Recorder::new("commit", &log).shared());
    registry
        .lifecycle()
        .add_handler(LifecyclePhase::Rollback, put(), Arc::new(AnyFilter), Recorder::new("rollback", &log).shared());

    registry.put("/a", Resource::new()).unwrap_err();
    assert_eq!(entries(&log), ["guard:PUT", "rollback:PUT"]);
    assert!(!registry.resource_exists("/a").unwrap());
}

#[test]
fn unknown_phase_names_fall_back_to_default() {
    let registry = Registry::in_memory("local");
    let log = call_log();
    let handler = Recorder::new("stray", &log).shared();
    registry.add_handler_in_phase(
        methods(&[OperationKind::Get]),
        Arc::new(AnyFilter),
        Arc::clone(&handler),
        Some("nightly"),
    );
    assert_eq!(registry.lifecycle().handlers(LifecyclePhase::Default).len(), 1);
    assert!(registry.remove_handler_from_phase(&handler, Some("DEFAULT")));
    assert!(registry.lifecycle().handlers(LifecyclePhase::Default).is_empty());
}

#[test]
fn identity_becomes_default_author() {
    let registry = Registry::builder("local").default_author("system").build();
    registry.put("/anonymous", Resource::new()).unwrap();
    assert_eq!(registry.get("/anonymous").unwrap().author(), Some("system"));

    let scope = CallScope::builder().identity("alice").build();
    registry
        .execute(&scope, Operation::Put {
            path: "/signed".to_owned(),
            resource: Resource::new(),
        })
        .unwrap();
    assert_eq!(registry.get("/signed").unwrap().author(), Some("alice"));
}
