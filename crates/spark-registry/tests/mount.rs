//! 跨实例挂载场景：路径改写、链接元数据、跨边界搬移、只读目标与联邦查询。

mod support;

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use spark_registry::{
    AnyFilter, AuditHandler, ConfigError, Handler, InMemoryAuditRecorder, InMemoryStore,
    InstanceRegistry, LifecyclePhase, MethodSet, MountEntry, Operation, OperationKind, Registry,
    RegistryError, RemoteInstanceConfig, RequestContext, Resource, TransactionBoundary, properties,
};
use support::{MountFixture, Recorder, call_log, entries, mount_fixture};

fn mounted() -> MountFixture {
    let fixture = mount_fixture(RemoteInstanceConfig::new("instanceX"));
    fixture
        .local
        .create_remote_link("/apps/remote", "instanceX", "/services")
        .unwrap();
    fixture
}

#[test]
fn remote_put_and_get_are_redirected() {
    let MountFixture { local, remote } = mounted();

    let stored = local
        .put("/apps/remote/echo", Resource::new().with_content("v1"))
        .unwrap();
    assert_eq!(stored, "/apps/remote/echo", "返回路径应位于本地命名空间");

    let actual = remote.get("/services/echo").unwrap();
    assert_eq!(actual.content(), b"v1");
    assert!(!local.store().exists("/apps/remote/echo").unwrap(), "本地存储不应写入");

    let seen = local.get("/apps/remote/echo").unwrap();
    assert_eq!(seen.path(), "/apps/remote/echo");
    assert_eq!(seen.property(properties::MOUNT), Some("true"));
    assert_eq!(seen.property(properties::LINK), Some("true"));
    assert_eq!(seen.property(properties::MOUNT_POINT), Some("/apps/remote"));
    assert_eq!(seen.property(properties::TARGET_POINT), Some("/services"));
    assert_eq!(seen.property(properties::ACTUAL_PATH), Some("/services/echo"));
    assert_eq!(seen.property(properties::REAL_PATH), Some("instanceX:/services/echo"));
    assert_eq!(seen.property(properties::AUTHOR), Some("admin"));
}

#[test]
fn link_metadata_is_not_written_back() {
    let MountFixture { local, remote } = mounted();
    local
        .put("/apps/remote/doc", Resource::new().with_content("a"))
        .unwrap();

    let fetched = local.get("/apps/remote/doc").unwrap();
    local.put("/apps/remote/doc", fetched).unwrap();

    let actual = remote.get("/services/doc").unwrap();
    assert_eq!(actual.property(properties::MOUNT), None);
    assert_eq!(actual.property(properties::ACTUAL_PATH), None);
}

#[test]
fn mount_entry_is_persisted_and_removed_with_the_link() {
    let MountFixture { local, remote } = mounted();
    let entry_path = MountEntry::entry_path("/apps/remote");
    let entry = local.store().get(&entry_path).unwrap().expect("挂载条目应已持久化");
    let entry = MountEntry::from_resource(&entry).unwrap();
    assert_eq!(entry.target, "instanceX");
    assert_eq!(entry.sub_path.as_deref(), Some("/services"));

    local.delete("/apps/remote").unwrap();
    assert!(!local.store().exists(&entry_path).unwrap(), "删除挂载点即移除链接");

    local
        .put("/apps/remote/after", Resource::new().with_content("local"))
        .unwrap();
    assert!(local.store().exists("/apps/remote/after").unwrap());
    assert!(!remote.resource_exists("/services/after").unwrap());
}

#[test]
fn moves_across_the_boundary_use_dump_and_restore() {
    let MountFixture { local, remote } = mounted();
    local
        .put("/local/doc", Resource::new().with_content("payload"))
        .unwrap();

    let moved = local.move_resource("/local/doc", "/apps/remote/doc").unwrap();
    assert_eq!(moved, "/apps/remote/doc");
    assert_eq!(remote.get("/services/doc").unwrap().content(), b"payload");
    assert!(!local.resource_exists("/local/doc").unwrap(), "移动后源路径应删除");

    let copied = local.copy("/apps/remote/doc", "/local/copy").unwrap();
    assert_eq!(copied, "/local/copy");
    assert_eq!(local.get("/local/copy").unwrap().content(), b"payload");
    assert!(remote.resource_exists("/services/doc").unwrap(), "复制保留源");
}

#[test]
fn moves_inside_the_mount_stay_remote() {
    let MountFixture { local, remote } = mounted();
    local.put("/apps/remote/a", Resource::new().with_content("x")).unwrap();
    let renamed = local.rename("/apps/remote/a", "b").unwrap();
    assert_eq!(renamed, "/apps/remote/b");
    assert!(remote.resource_exists("/services/b").unwrap());
    assert!(!remote.resource_exists("/services/a").unwrap());
}

#[test]
fn read_only_target_rejects_writes_but_serves_reads() {
    let MountFixture { local, remote } =
        mount_fixture(RemoteInstanceConfig::new("instanceX").read_only(true));
    local
        .create_remote_link("/apps/remote", "instanceX", "/services")
        .unwrap();
    remote
        .put("/services/fixed", Resource::new().with_content("ro"))
        .unwrap();

    let err = local
        .put("/apps/remote/new", Resource::new())
        .unwrap_err();
    assert!(matches!(err, RegistryError::ReadOnly { ref instance } if instance == "instanceX"), "{err}");
    assert_eq!(local.get("/apps/remote/fixed").unwrap().content(), b"ro");
    assert!(!remote.resource_exists("/services/new").unwrap());
}

#[test]
fn federated_query_merges_local_and_remote_matches() {
    let MountFixture { local, remote } = mounted();
    remote
        .put("/services/a", Resource::new().with_property("kind", "svc"))
        .unwrap();
    remote
        .put("/elsewhere/z", Resource::new().with_property("kind", "svc"))
        .unwrap();
    local
        .put("/local/b", Resource::new().with_property("kind", "svc"))
        .unwrap();

    let params = BTreeMap::from([("kind".to_owned(), "svc".to_owned())]);
    let found = local.execute_query("/", &params).unwrap();
    let mut children = found.children().to_vec();
    children.sort();
    assert_eq!(children, ["/apps/remote/a", "/local/b"], "挂载外的远端资源不可见");
}

#[test]
fn registry_context_describes_the_target_instance() {
    let MountFixture { local, .. } = mounted();
    let remote_info = local.get_registry_context("/apps/remote/x").unwrap();
    assert_eq!(remote_info.instance_id, "instanceX");
    let local_info = local.get_registry_context("/local").unwrap();
    assert_eq!(local_info.instance_id, "local");
}

#[test]
fn unknown_instance_is_a_config_error() {
    let MountFixture { local, .. } = mount_fixture(RemoteInstanceConfig::new("instanceX"));
    let err = local
        .create_remote_link("/apps/ghost", "nowhere", "/")
        .unwrap_err();
    assert!(
        matches!(err, RegistryError::Config(ConfigError::UnknownInstance { .. })),
        "未登记实例应报配置错误: {err}"
    );
}

#[test]
fn unreachable_instance_fails_on_first_use() {
    let local = Registry::builder("local")
        .remote_instance(RemoteInstanceConfig::new("offline"))
        .build();
    local.create_remote_link("/apps/offline", "offline", "/").unwrap();
    let err = local.get("/apps/offline/a").unwrap_err();
    assert!(matches!(err, RegistryError::Unavailable { .. }), "{err}");
}

#[test]
fn remote_audit_sees_caller_paths() {
    let MountFixture { local, remote } = mounted();
    let recorder = Arc::new(InMemoryAuditRecorder::new());
    remote.lifecycle().add_handler(
        LifecyclePhase::Reporting,
        None,
        Arc::new(AnyFilter),
        Arc::new(AuditHandler::new(recorder.clone())),
    );

    local
        .put("/apps/remote/echo", Resource::new().with_content("v1"))
        .unwrap();
    let paths: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|event| event.kind == spark_registry::OperationKind::Put)
        .map(|event| event.path)
        .collect();
    assert_eq!(paths, ["/apps/remote/echo"], "远端审计应以调用方路径入账");
}

#[test]
fn simulated_writes_never_reach_the_target() {
    let MountFixture { local, remote } = mounted();
    let report = local.simulate(Operation::Put {
        path: "/apps/remote/draft".to_owned(),
        resource: Resource::new(),
    });
    assert!(report.error.is_none());
    assert!(!remote.resource_exists("/services/draft").unwrap());
}

#[test]
fn mounts_are_restored_from_persisted_entries() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Registry::in_memory("instanceX");
    let instances = Arc::new(InstanceRegistry::new());
    instances.register(remote.clone());
    let build = || {
        Registry::builder("local")
            .store(Arc::clone(&store))
            .connector(instances.clone())
            .remote_instance(RemoteInstanceConfig::new("instanceX"))
            .build()
    };

    let first = build();
    first
        .create_remote_link("/apps/remote", "instanceX", "/services")
        .unwrap();
    first.create_link("/shortcut", "/apps/remote").unwrap();
    first
        .put("/apps/remote/echo", Resource::new().with_content("v1"))
        .unwrap();
    drop(first);

    let restarted = build();
    assert_eq!(restarted.restore_mounts().unwrap(), 2);
    assert_eq!(
        restarted.get("/apps/remote/echo").unwrap().content(),
        b"v1",
        "重启后挂载应恢复"
    );
    assert_eq!(restarted.get("/shortcut/echo").unwrap().content(), b"v1");
}

/// 在 `commit` 阶段记录目标存储的事务深度。
struct DepthAtCommit {
    store: Arc<InMemoryStore>,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl Handler for DepthAtCommit {
    fn put(&self, _ctx: &mut RequestContext) -> spark_registry::Result<Option<String>> {
        self.seen.lock().push(self.store.depth());
        Ok(None)
    }
}

#[test]
fn target_commit_phase_runs_after_the_nested_commit() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Registry::builder("instanceX").store(Arc::clone(&store)).build();
    let instances = InstanceRegistry::new();
    instances.register(remote.clone());
    let local = Registry::builder("local")
        .connector(Arc::new(instances))
        .remote_instance(RemoteInstanceConfig::new("instanceX"))
        .build();
    local
        .create_remote_link("/apps/remote", "instanceX", "/services")
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    remote.lifecycle().add_handler(
        LifecyclePhase::Commit,
        Some(MethodSet::of(&[OperationKind::Put])),
        Arc::new(AnyFilter),
        Arc::new(DepthAtCommit {
            store,
            seen: Arc::clone(&seen),
        }),
    );

    local
        .put("/apps/remote/echo", Resource::new().with_content("v1"))
        .unwrap();
    assert_eq!(*seen.lock(), [0], "commit 阶段只执行一次，且在目标事务真正提交之后");

    remote.put("/services/direct", Resource::new()).unwrap();
    assert_eq!(*seen.lock(), [0, 0]);
}

#[test]
fn target_rollback_phase_runs_once_for_failed_nested_writes() {
    let MountFixture { local, remote } = mounted();
    let log = call_log();
    let put = || Some(MethodSet::of(&[OperationKind::Put]));
    remote.lifecycle().add_handler(
        LifecyclePhase::Default,
        put(),
        Arc::new(AnyFilter),
        Recorder::new("guard", &log).failing().shared(),
    );
    for phase in [LifecyclePhase::Commit, LifecyclePhase::Rollback] {
        let name = if phase == LifecyclePhase::Commit { "commit" } else { "rollback" };
        remote
            .lifecycle()
            .add_handler(phase, put(), Arc::new(AnyFilter), Recorder::new(name, &log).shared());
    }

    local
        .put("/apps/remote/echo", Resource::new())
        .unwrap_err();
    assert_eq!(entries(&log), ["guard:PUT", "rollback:PUT"]);
    assert!(!remote.resource_exists("/services/echo").unwrap());
}
