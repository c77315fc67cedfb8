//! 仓库实例与远端连接。
//!
//! # 教案式说明
//! - **意图（Why）**：挂载 Handler 需要把操作交给另一个仓库实例执行，调度内核只依赖
//!   [`RegistryInstance`] 这一窄接口，不关心实例是本地克隆还是远端代理；
//! - **契约（What）**：[`InstanceConnector`] 按 [`RemoteInstanceConfig`] 解析实例；
//!   [`InstanceRegistry`] 是按 ID 索引的默认实现，可选地为未登记的 ID 惰性创建内存实例。

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    context::{Operation, Outcome},
    error::{RegistryError, Result},
    model::RegistryContextInfo,
    path,
    registry::Registry,
    scope::CallScope,
    store::InMemoryStore,
};

/// 可被挂载的仓库实例。
pub trait RegistryInstance: Send + Sync + 'static {
    fn instance_id(&self) -> &str;

    fn context_info(&self) -> RegistryContextInfo;

    /// 在给定调用作用域内执行一次操作，经过该实例自己的 Handler 链。
    fn execute(&self, scope: &CallScope, operation: Operation) -> Result<Outcome>;

    fn begin_transaction(&self) -> Result<()>;

    /// 提交由调用方开启的事务帧，随后对 `operation` 执行 `commit` 阶段。
    fn commit_transaction(&self, scope: &CallScope, operation: &Operation) -> Result<()>;

    /// 回滚事务帧；`failed` 给出时对其执行 `rollback` 阶段。
    fn rollback_transaction(&self, scope: &CallScope, failed: Option<&Operation>) -> Result<()>;
}

fn default_root() -> String {
    path::ROOT.to_owned()
}

/// 远端实例的隔离配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInstanceConfig {
    pub id: String,
    /// 实例内的根路径，挂载目标路径相对于它解析。
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub cache_enabled: bool,
    /// 透传给存储层的连接描述。
    #[serde(default)]
    pub db_config: Option<String>,
}

impl RemoteInstanceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root: default_root(),
            read_only: false,
            cache_enabled: false,
            db_config: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn context_info(&self) -> RegistryContextInfo {
        RegistryContextInfo {
            instance_id: self.id.clone(),
            root: self.root.clone(),
            read_only: self.read_only,
            cache_enabled: self.cache_enabled,
        }
    }
}

/// 远端实例解析器。
pub trait InstanceConnector: Send + Sync + 'static {
    fn connect(&self, config: &RemoteInstanceConfig) -> Result<Arc<dyn RegistryInstance>>;
}

/// 按 ID 登记的实例表。
pub struct InstanceRegistry {
    instances: DashMap<String, Arc<dyn RegistryInstance>>,
    in_memory_fallback: bool,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    /// 只解析已登记实例。
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            in_memory_fallback: false,
        }
    }

    /// 对未登记的 ID 惰性创建独立的内存实例。
    pub fn with_in_memory_fallback() -> Self {
        Self {
            instances: DashMap::new(),
            in_memory_fallback: true,
        }
    }

    pub fn register(&self, instance: Arc<dyn RegistryInstance>) {
        self.instances
            .insert(instance.instance_id().to_owned(), instance);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RegistryInstance>> {
        self.instances.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

impl InstanceConnector for InstanceRegistry {
    fn connect(&self, config: &RemoteInstanceConfig) -> Result<Arc<dyn RegistryInstance>> {
        if let Some(instance) = self.get(&config.id) {
            return Ok(instance);
        }
        if !self.in_memory_fallback {
            return Err(RegistryError::Unavailable {
                instance: config.id.clone(),
                detail: "no connector is registered for this instance".to_owned(),
            });
        }
        let entry = self.instances.entry(config.id.clone()).or_insert_with(|| {
            info!(instance = %config.id, "creating in-memory registry instance");
            let registry: Arc<dyn RegistryInstance> = Registry::builder(config.id.clone())
                .store(Arc::new(InMemoryStore::new()))
                .build();
            registry
        });
        Ok(Arc::clone(entry.value()))
    }
}

impl core::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.instances.len())
            .field("in_memory_fallback", &self.in_memory_fallback)
            .finish()
    }
}
