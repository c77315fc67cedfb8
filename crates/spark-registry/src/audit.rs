//! # 审计 Handler
//!
//! ## 意图（Why）
//! - 在 `reporting` 阶段观察每一次仓库操作，不改变结果也不影响完成标记；
//!
//! ## 契约（What）
//! - 记录中的路径经过调用作用域的改写栈翻译，经由挂载或符号链接到达的嵌套调用也以最外层
//!   调用方看到的路径入账；
//! - `completed` 取自进入 `reporting` 阶段时的完成闩锁。

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::{
    context::RequestContext,
    error::Result,
    handler::Handler,
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag},
    operation::OperationKind,
    scope::TenantId,
};

/// 一条审计记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRecord {
    pub kind: OperationKind,
    pub path: String,
    pub completed: bool,
    pub tenant: TenantId,
    pub identity: Option<String>,
}

/// 审计记录的去向。
pub trait AuditRecorder: Send + Sync + 'static {
    fn record(&self, record: AuditRecord);
}

/// 保存在内存中的审计记录。
#[derive(Debug, Default)]
pub struct InMemoryAuditRecorder {
    events: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditRecord> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditRecorder for InMemoryAuditRecorder {
    fn record(&self, record: AuditRecord) {
        self.events.lock().push(record);
    }
}

/// 审计 Handler，通常注册在 `reporting` 阶段。
pub struct AuditHandler {
    recorder: Arc<dyn AuditRecorder>,
}

impl AuditHandler {
    pub fn new(recorder: Arc<dyn AuditRecorder>) -> Self {
        Self { recorder }
    }

    fn observe(&self, ctx: &RequestContext) {
        let scope = ctx.scope();
        let record = AuditRecord {
            kind: ctx.kind(),
            path: scope.to_local_path(ctx.path()),
            completed: ctx.is_processing_complete(),
            tenant: scope.tenant(),
            identity: scope.identity().map(str::to_owned),
        };
        info!(
            target: "registry.audit",
            kind = %record.kind,
            path = %record.path,
            completed = record.completed,
            "registry operation observed"
        );
        self.recorder.record(record);
    }
}

impl core::fmt::Debug for AuditHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditHandler").finish_non_exhaustive()
    }
}

macro_rules! observe_value_methods {
    ($($name:ident -> $ty:ty;)*) => {
        $(
            fn $name(&self, ctx: &mut RequestContext) -> Result<Option<$ty>> {
                self.observe(ctx);
                Ok(None)
            }
        )*
    };
}

macro_rules! observe_void_methods {
    ($($name:ident;)*) => {
        $(
            fn $name(&self, ctx: &mut RequestContext) -> Result<()> {
                self.observe(ctx);
                Ok(())
            }
        )*
    };
}

impl Handler for AuditHandler {
    fn describe(&self) -> &str {
        "AuditHandler"
    }

    observe_value_methods! {
        get -> Resource;
        put -> String;
        move_resource -> String;
        copy -> String;
        rename -> String;
        import_resource -> String;
        get_versions -> Vec<String>;
        execute_query -> Collection;
        search_content -> Collection;
        get_associations -> Vec<Association>;
        get_all_associations -> Vec<Association>;
        get_tags -> Vec<Tag>;
        add_comment -> String;
        get_comments -> Vec<Comment>;
        get_rating -> u8;
        get_average_rating -> f32;
        get_registry_context -> RegistryContextInfo;
    }

    observe_void_methods! {
        delete;
        put_child;
        import_child;
        create_link;
        remove_link;
        create_version;
        restore_version;
        add_association;
        remove_association;
        apply_tag;
        remove_tag;
        edit_comment;
        remove_comment;
        rate_resource;
        dump;
        restore;
        invoke_aspect;
    }

    fn resource_exists(&self, ctx: &mut RequestContext) -> Result<bool> {
        self.observe(ctx);
        Ok(false)
    }
}
