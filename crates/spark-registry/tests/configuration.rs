//! TOML 配置：远端实例、Handler 目录、挂载覆盖策略。

use std::sync::Arc;

use spark_registry::{
    AuditHandler, ConfigError, Handler, HandlerCatalog, InMemoryAuditRecorder, InstanceRegistry,
    LifecyclePhase, MountEntry, Registry, RegistryConfig, RegistryError, Resource,
};

const CONFIG: &str = r#"
[registry]
instance_id = "local"
default_author = "admin"

[[remote_instance]]
id = "instanceX"
root = "/"

[[mount]]
path = "/apps/remote"
instance_id = "instanceX"
target_path = "/services"
overwrite = "virtual"

[[handler]]
name = "audit"
phase = "reporting"
methods = ["PUT", "delete"]
filter = { kind = "url", pattern = "/apps/.*" }
"#;

struct Fixture {
    local: Arc<Registry>,
    remote: Arc<Registry>,
    recorder: Arc<InMemoryAuditRecorder>,
    catalog: HandlerCatalog,
}

fn fixture(config: &RegistryConfig) -> Fixture {
    let remote = Registry::in_memory("instanceX");
    let instances = InstanceRegistry::new();
    instances.register(remote.clone());
    let local = Registry::builder(config.registry.instance_id.clone())
        .settings(config.registry.clone())
        .connector(Arc::new(instances))
        .build();
    let recorder = Arc::new(InMemoryAuditRecorder::new());
    let shared = recorder.clone();
    let catalog = HandlerCatalog::new().with("audit", move || -> Arc<dyn Handler> {
        Arc::new(AuditHandler::new(shared.clone()))
    });
    Fixture {
        local,
        remote,
        recorder,
        catalog,
    }
}

#[test]
fn configuration_wires_handlers_and_virtual_mounts() {
    let config = RegistryConfig::from_toml_str(CONFIG).unwrap();
    let Fixture {
        local,
        remote,
        recorder,
        catalog,
    } = fixture(&config);
    local.apply_config(&config, &catalog).unwrap();

    assert_eq!(local.lifecycle().handlers(LifecyclePhase::Reporting).len(), 1);
    assert_eq!(local.settings().default_author.as_deref(), Some("admin"));

    local
        .put("/apps/remote/svc", Resource::new().with_content("v1"))
        .unwrap();
    assert!(remote.resource_exists("/services/svc").unwrap());
    assert!(
        !local
            .store()
            .exists(&MountEntry::entry_path("/apps/remote"))
            .unwrap(),
        "虚拟挂载不持久化条目"
    );

    local.put("/other/doc", Resource::new()).unwrap();
    let audited: Vec<_> = recorder.events().into_iter().map(|e| e.path).collect();
    assert_eq!(audited, ["/apps/remote/svc"], "URL Filter 只放行 /apps 下的请求");
}

#[test]
fn overwrite_false_skips_occupied_mount_points() {
    let config = RegistryConfig::from_toml_str(
        r#"
[[remote_instance]]
id = "instanceX"

[[mount]]
path = "/apps/remote"
instance_id = "instanceX"
overwrite = false
"#,
    )
    .unwrap();
    let Fixture { local, catalog, .. } = fixture(&config);
    local
        .put("/apps/remote", Resource::new().with_content("local data"))
        .unwrap();

    local.apply_config(&config, &catalog).unwrap();
    assert!(local.lifecycle().handlers(LifecyclePhase::Default).is_empty());
    assert_eq!(local.get("/apps/remote").unwrap().content(), b"local data");
}

#[test]
fn overwrite_true_replaces_existing_resource_and_persists_entry() {
    let config = RegistryConfig::from_toml_str(
        r#"
[[remote_instance]]
id = "instanceX"

[[mount]]
path = "/apps/remote"
instance_id = "instanceX"
target_path = "/services"
overwrite = true
"#,
    )
    .unwrap();
    let Fixture {
        local,
        remote,
        catalog,
        ..
    } = fixture(&config);
    local
        .put("/apps/remote", Resource::new().with_content("stale"))
        .unwrap();
    remote
        .put("/services/live", Resource::new().with_content("fresh"))
        .unwrap();

    local.apply_config(&config, &catalog).unwrap();
    assert!(!local.store().exists("/apps/remote").unwrap(), "旧资源应被删除");
    assert!(
        local
            .store()
            .exists(&MountEntry::entry_path("/apps/remote"))
            .unwrap()
    );
    assert_eq!(local.get("/apps/remote/live").unwrap().content(), b"fresh");
}

#[test]
fn unknown_catalog_entry_is_reported() {
    let config = RegistryConfig::from_toml_str("[[handler]]\nname = \"missing\"\n").unwrap();
    let Fixture { local, catalog, .. } = fixture(&config);
    let err = local.apply_config(&config, &catalog).unwrap_err();
    assert!(
        matches!(err, RegistryError::Config(ConfigError::UnknownHandler { ref name }) if name == "missing"),
        "{err}"
    );
}

#[test]
fn unknown_method_name_is_reported() {
    let config = RegistryConfig::from_toml_str(
        "[[handler]]\nname = \"audit\"\nmethods = [\"TELEPORT\"]\n",
    )
    .unwrap();
    let Fixture { local, catalog, .. } = fixture(&config);
    let err = local.apply_config(&config, &catalog).unwrap_err();
    assert!(
        matches!(err, RegistryError::Config(ConfigError::UnknownOperation { .. })),
        "{err}"
    );
}

#[test]
fn duplicate_remote_instances_are_rejected() {
    let err = RegistryConfig::from_toml_str(
        "[[remote_instance]]\nid = \"a\"\n[[remote_instance]]\nid = \"a\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateInstance { ref id } if id == "a"));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = RegistryConfig::from_toml_str("[[mount]\npath = ").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}
