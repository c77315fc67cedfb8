//! 集成测试共用的 Handler 与仓库夹具。

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use spark_registry::{
    Handler, InstanceRegistry, Registry, RegistryError, RemoteInstanceConfig, RequestContext,
    Resource, Result,
};

/// 共享调用日志，元素形如 `"名称:OPERATION"`。
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// 记录调用的可配置 Handler。
///
/// - `complete`：调用后置位完成闩锁；
/// - `fail`：返回 `Storage` 错误；
/// - `fatal`：返回 `Fatal` 错误，模拟模式也不吞掉；
/// - `panic`：直接 panic；
/// - `answer`：`GET` 时返回的资源内容。
pub struct Recorder {
    name: &'static str,
    log: CallLog,
    complete: bool,
    fail: bool,
    fatal: bool,
    panic: bool,
    answer: Option<&'static str>,
}

impl Recorder {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            complete: false,
            fail: false,
            fatal: false,
            panic: false,
            answer: None,
        }
    }

    pub fn completing(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn answering(mut self, content: &'static str) -> Self {
        self.answer = Some(content);
        self
    }

    pub fn shared(self) -> Arc<dyn Handler> {
        Arc::new(self)
    }

    fn observe(&self, ctx: &mut RequestContext) -> Result<()> {
        self.log
            .lock()
            .push(format!("{}:{}", self.name, ctx.kind()));
        if self.panic {
            panic!("{} exploded", self.name);
        }
        if self.fatal {
            return Err(RegistryError::fatal(format!("{} lost its backing store", self.name)));
        }
        if self.fail {
            return Err(RegistryError::storage(format!("{} refused", self.name)));
        }
        if self.complete {
            ctx.set_processing_complete(true);
        }
        Ok(())
    }
}

impl Handler for Recorder {
    fn describe(&self) -> &str {
        self.name
    }

    fn get(&self, ctx: &mut RequestContext) -> Result<Option<Resource>> {
        self.observe(ctx)?;
        Ok(self.answer.map(|content| {
            let mut resource = Resource::new().with_content(content);
            resource.set_path(ctx.path());
            resource
        }))
    }

    fn put(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        self.observe(ctx)?;
        Ok(None)
    }

    fn delete(&self, ctx: &mut RequestContext) -> Result<()> {
        self.observe(ctx)
    }

    fn put_child(&self, ctx: &mut RequestContext) -> Result<()> {
        self.observe(ctx)
    }
}

/// 取出日志快照。
pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().clone()
}

/// 本地实例 `local` 与可经连接器访问的远端实例 `instanceX`。
pub struct MountFixture {
    pub local: Arc<Registry>,
    pub remote: Arc<Registry>,
}

pub fn mount_fixture(remote_config: RemoteInstanceConfig) -> MountFixture {
    let remote = Registry::in_memory(remote_config.id.clone());
    let instances = InstanceRegistry::new();
    instances.register(remote.clone());
    let local = Registry::builder("local")
        .connector(Arc::new(instances))
        .remote_instance(remote_config)
        .default_author("admin")
        .build();
    MountFixture { local, remote }
}
