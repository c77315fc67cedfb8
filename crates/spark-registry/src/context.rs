//! # RequestContext：一次调度的可变草稿区
//!
//! ## 角色定位（Why）
//! - 仓库门面为每次 API 调用构建一个 [`RequestContext`]，调度内核在各阶段之间传递同一实例；
//! - Handler 通过它读取请求参数（[`Operation`]）、写入“处理完成”闩锁，并借助
//!   [`CallScope`] 与本地实例协作完成嵌套重定向。
//!
//! ## 契约（What）
//! - `processing_complete` 只是一个布尔闩锁，何时复位由生命周期管理器决定；
//! - `executions` 记录每个 Handler 在本次调用中的首个执行状态，后续阶段（例如 reporting）可读取。

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    error::{RegistryError, Result},
    handler::Handler,
    instance::RegistryInstance,
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag},
    mount::LinkTarget,
    operation::OperationKind,
    path,
    scope::CallScope,
    store::ResourceStore,
};

/// 一次仓库操作及其全部参数。
///
/// 变体与 [`OperationKind`] 一一对应；所有路径字段均为规范化后的绝对路径。
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Get {
        path: String,
    },
    Put {
        path: String,
        resource: Resource,
    },
    Delete {
        path: String,
    },
    Move {
        source: String,
        target: String,
    },
    Copy {
        source: String,
        target: String,
    },
    Rename {
        source: String,
        target: String,
    },
    Import {
        path: String,
        url: String,
        resource: Resource,
    },
    /// 子资源写入后发给父集合的通知。
    PutChild {
        parent: String,
        child: String,
    },
    ImportChild {
        parent: String,
        child: String,
    },
    CreateLink {
        path: String,
        target: LinkTarget,
    },
    RemoveLink {
        path: String,
    },
    CreateVersion {
        path: String,
    },
    RestoreVersion {
        version_path: String,
    },
    GetVersions {
        path: String,
    },
    ExecuteQuery {
        path: String,
        params: BTreeMap<String, String>,
    },
    SearchContent {
        keywords: String,
    },
    ResourceExists {
        path: String,
    },
    AddAssociation {
        association: Association,
    },
    RemoveAssociation {
        association: Association,
    },
    GetAssociations {
        path: String,
        association_type: String,
    },
    GetAllAssociations {
        path: String,
    },
    ApplyTag {
        path: String,
        tag: String,
    },
    GetTags {
        path: String,
    },
    RemoveTag {
        path: String,
        tag: String,
    },
    AddComment {
        path: String,
        comment: Comment,
    },
    EditComment {
        comment_path: String,
        text: String,
    },
    RemoveComment {
        comment_path: String,
    },
    GetComments {
        path: String,
    },
    RateResource {
        path: String,
        rating: u8,
    },
    GetRating {
        path: String,
        user: String,
    },
    GetAverageRating {
        path: String,
    },
    Dump {
        path: String,
    },
    Restore {
        path: String,
        dump: String,
    },
    GetRegistryContext {
        path: String,
    },
    InvokeAspect {
        path: String,
        aspect: String,
        action: String,
    },
}

impl Operation {
    /// 对应的操作类型。
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Get { .. } => OperationKind::Get,
            Self::Put { .. } => OperationKind::Put,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Move { .. } => OperationKind::Move,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Rename { .. } => OperationKind::Rename,
            Self::Import { .. } => OperationKind::Import,
            Self::PutChild { .. } => OperationKind::PutChild,
            Self::ImportChild { .. } => OperationKind::ImportChild,
            Self::CreateLink { .. } => OperationKind::CreateLink,
            Self::RemoveLink { .. } => OperationKind::RemoveLink,
            Self::CreateVersion { .. } => OperationKind::CreateVersion,
            Self::RestoreVersion { .. } => OperationKind::RestoreVersion,
            Self::GetVersions { .. } => OperationKind::GetVersions,
            Self::ExecuteQuery { .. } => OperationKind::ExecuteQuery,
            Self::SearchContent { .. } => OperationKind::SearchContent,
            Self::ResourceExists { .. } => OperationKind::ResourceExists,
            Self::AddAssociation { .. } => OperationKind::AddAssociation,
            Self::RemoveAssociation { .. } => OperationKind::RemoveAssociation,
            Self::GetAssociations { .. } => OperationKind::GetAssociations,
            Self::GetAllAssociations { .. } => OperationKind::GetAllAssociations,
            Self::ApplyTag { .. } => OperationKind::ApplyTag,
            Self::GetTags { .. } => OperationKind::GetTags,
            Self::RemoveTag { .. } => OperationKind::RemoveTag,
            Self::AddComment { .. } => OperationKind::AddComment,
            Self::EditComment { .. } => OperationKind::EditComment,
            Self::RemoveComment { .. } => OperationKind::RemoveComment,
            Self::GetComments { .. } => OperationKind::GetComments,
            Self::RateResource { .. } => OperationKind::RateResource,
            Self::GetRating { .. } => OperationKind::GetRating,
            Self::GetAverageRating { .. } => OperationKind::GetAverageRating,
            Self::Dump { .. } => OperationKind::Dump,
            Self::Restore { .. } => OperationKind::Restore,
            Self::GetRegistryContext { .. } => OperationKind::GetRegistryContext,
            Self::InvokeAspect { .. } => OperationKind::InvokeAspect,
        }
    }

    /// 请求的主路径：搬移类为源路径，评论编辑类为评论路径，全文检索为根。
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::Import { path, .. }
            | Self::CreateLink { path, .. }
            | Self::RemoveLink { path }
            | Self::CreateVersion { path }
            | Self::GetVersions { path }
            | Self::ExecuteQuery { path, .. }
            | Self::ResourceExists { path }
            | Self::GetAssociations { path, .. }
            | Self::GetAllAssociations { path }
            | Self::ApplyTag { path, .. }
            | Self::GetTags { path }
            | Self::RemoveTag { path, .. }
            | Self::AddComment { path, .. }
            | Self::GetComments { path }
            | Self::RateResource { path, .. }
            | Self::GetRating { path, .. }
            | Self::GetAverageRating { path }
            | Self::Dump { path }
            | Self::Restore { path, .. }
            | Self::GetRegistryContext { path }
            | Self::InvokeAspect { path, .. } => path,
            Self::Move { source, .. } | Self::Copy { source, .. } | Self::Rename { source, .. } => {
                source
            }
            Self::PutChild { parent, .. } | Self::ImportChild { parent, .. } => parent,
            Self::RestoreVersion { version_path } => version_path,
            Self::EditComment { comment_path, .. } | Self::RemoveComment { comment_path } => {
                comment_path
            }
            Self::AddAssociation { association } | Self::RemoveAssociation { association } => {
                &association.source_path
            }
            Self::SearchContent { .. } => path::ROOT,
        }
    }

    /// 搬移类操作的目标路径。
    pub fn target_path(&self) -> Option<&str> {
        match self {
            Self::Move { target, .. } | Self::Copy { target, .. } | Self::Rename { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// 携带的资源载荷。
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Self::Put { resource, .. } | Self::Import { resource, .. } => Some(resource),
            _ => None,
        }
    }

    pub fn resource_mut(&mut self) -> Option<&mut Resource> {
        match self {
            Self::Put { resource, .. } | Self::Import { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// 对全部路径字段应用可能失败的改写函数。
    ///
    /// 覆盖主路径、源/目标路径、关联两端、子资源通知以及指向路径的链接目标。
    pub fn try_map_paths(&mut self, mut rewrite: impl FnMut(&str) -> Result<String>) -> Result<()> {
        let mut apply = |slot: &mut String| -> Result<()> {
            *slot = rewrite(slot)?;
            Ok(())
        };
        match self {
            Self::Get { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::Import { path, .. }
            | Self::RemoveLink { path }
            | Self::CreateVersion { path }
            | Self::GetVersions { path }
            | Self::ExecuteQuery { path, .. }
            | Self::ResourceExists { path }
            | Self::GetAssociations { path, .. }
            | Self::GetAllAssociations { path }
            | Self::ApplyTag { path, .. }
            | Self::GetTags { path }
            | Self::RemoveTag { path, .. }
            | Self::AddComment { path, .. }
            | Self::GetComments { path }
            | Self::RateResource { path, .. }
            | Self::GetRating { path, .. }
            | Self::GetAverageRating { path }
            | Self::Dump { path }
            | Self::Restore { path, .. }
            | Self::GetRegistryContext { path }
            | Self::InvokeAspect { path, .. } => apply(path),
            Self::CreateLink { path, target } => {
                apply(path)?;
                if let LinkTarget::Path(target) = target {
                    apply(target)?;
                }
                Ok(())
            }
            Self::Move { source, target }
            | Self::Copy { source, target }
            | Self::Rename { source, target } => {
                apply(source)?;
                apply(target)
            }
            Self::PutChild { parent, child } | Self::ImportChild { parent, child } => {
                apply(parent)?;
                apply(child)
            }
            Self::RestoreVersion { version_path } => apply(version_path),
            Self::EditComment { comment_path, .. } | Self::RemoveComment { comment_path } => {
                apply(comment_path)
            }
            Self::AddAssociation { association } | Self::RemoveAssociation { association } => {
                apply(&mut association.source_path)?;
                apply(&mut association.destination_path)
            }
            Self::SearchContent { .. } => Ok(()),
        }
    }

    /// 不会失败的路径改写。
    pub fn map_paths(&mut self, mut rewrite: impl FnMut(&str) -> String) {
        // 闭包恒返回 Ok，结果可安全丢弃。
        let _ = self.try_map_paths(|path| Ok(rewrite(path)));
    }
}

/// 一次调度的结果值，变体对应各操作类型的返回契约。
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// 无返回值的操作，或未产生结果。
    Empty,
    Resource(Resource),
    Path(String),
    Paths(Vec<String>),
    Collection(Collection),
    Exists(bool),
    Associations(Vec<Association>),
    Tags(Vec<Tag>),
    Comments(Vec<Comment>),
    Rating(u8),
    AverageRating(f32),
    Dump(String),
    Context(RegistryContextInfo),
}

macro_rules! outcome_accessors {
    ($($(#[$meta:meta])* $name:ident => $variant:ident($ty:ty);)*) => {
        impl Outcome {
            $(
                $(#[$meta])*
                pub fn $name(self) -> Option<$ty> {
                    match self {
                        Self::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            )*
        }
    };
}

outcome_accessors! {
    into_resource => Resource(Resource);
    into_path => Path(String);
    into_paths => Paths(Vec<String>);
    into_collection => Collection(Collection);
    /// 存在性结果；其他变体返回 `None`。
    into_exists => Exists(bool);
    into_associations => Associations(Vec<Association>);
    into_tags => Tags(Vec<Tag>);
    into_comments => Comments(Vec<Comment>);
    into_rating => Rating(u8);
    into_average_rating => AverageRating(f32);
    into_dump => Dump(String);
    into_context => Context(RegistryContextInfo);
}

impl Outcome {
    /// 是否为空结果。
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// 改写结果中出现的全部路径，`;` 后缀保持不变。
    pub fn map_paths(&mut self, mut rewrite: impl FnMut(&str) -> String) {
        match self {
            Self::Resource(resource) | Self::Collection(resource) => {
                let rewritten = rewrite(resource.path());
                resource.set_path(rewritten);
                resource.map_children(&mut rewrite);
            }
            Self::Path(path) => *path = rewrite(path),
            Self::Paths(paths) => {
                for path in paths.iter_mut() {
                    *path = rewrite(path);
                }
            }
            Self::Associations(associations) => {
                for association in associations.iter_mut() {
                    association.source_path = rewrite(&association.source_path);
                    association.destination_path = rewrite(&association.destination_path);
                }
            }
            Self::Comments(comments) => {
                for comment in comments.iter_mut() {
                    comment.path = rewrite(&comment.path);
                    comment.resource_path = rewrite(&comment.resource_path);
                }
            }
            Self::Empty
            | Self::Exists(_)
            | Self::Tags(_)
            | Self::Rating(_)
            | Self::AverageRating(_)
            | Self::Dump(_)
            | Self::Context(_) => {}
        }
    }
}

/// Handler 执行状态。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    Failed(String),
}

/// 单个 Handler 在本次调用中的执行记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerExecution {
    pub handler: String,
    pub phase: &'static str,
    pub status: ExecutionStatus,
    handler_id: usize,
}

impl HandlerExecution {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// 以数据指针标识 Handler，忽略胖指针中的 vtable 部分。
pub(crate) fn handler_id(handler: &Arc<dyn Handler>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

/// 调度草稿区。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 之间共享的状态（完成闩锁、执行记录、导出载荷）集中在此，
///   避免任何线程局部变量；
/// - **契约（What）**：`registry` 指向发起调用的本地实例，符号链接与挂载 Handler 通过它
///   回到本地调度或持久化挂载条目；`store` 供 Filter 查询已存储资源的元数据。
pub struct RequestContext {
    operation: Operation,
    scope: CallScope,
    registry: Option<Arc<dyn RegistryInstance>>,
    store: Option<Arc<dyn ResourceStore>>,
    dump: Option<String>,
    executions: Vec<HandlerExecution>,
    processing_complete: bool,
}

impl RequestContext {
    pub fn new(operation: Operation, scope: CallScope) -> Self {
        Self {
            operation,
            scope,
            registry: None,
            store: None,
            dump: None,
            executions: Vec::new(),
            processing_complete: false,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryInstance>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn path(&self) -> &str {
        self.operation.path()
    }

    /// 搬移类操作的源路径。
    pub fn source_path(&self) -> Option<&str> {
        self.operation
            .kind()
            .is_relocation()
            .then(|| self.operation.path())
    }

    pub fn target_path(&self) -> Option<&str> {
        self.operation.target_path()
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.operation.resource()
    }

    pub fn scope(&self) -> &CallScope {
        &self.scope
    }

    /// 发起调用的本地实例。
    pub fn registry(&self) -> Option<&Arc<dyn RegistryInstance>> {
        self.registry.as_ref()
    }

    /// 本地实例；缺失时返回致命错误，因为链接 Handler 无法在脱离实例的上下文中工作。
    pub fn require_registry(&self) -> Result<Arc<dyn RegistryInstance>> {
        self.registry
            .clone()
            .ok_or_else(|| RegistryError::fatal("request context is not bound to a registry"))
    }

    pub fn store(&self) -> Option<&Arc<dyn ResourceStore>> {
        self.store.as_ref()
    }

    pub fn is_processing_complete(&self) -> bool {
        self.processing_complete
    }

    pub fn set_processing_complete(&mut self, complete: bool) {
        self.processing_complete = complete;
    }

    /// 写入导出载荷，`DUMP` 操作的 Handler 以此代替返回值。
    pub fn set_dump(&mut self, dump: String) {
        self.dump = Some(dump);
    }

    pub fn take_dump(&mut self) -> Option<String> {
        self.dump.take()
    }

    /// 本次调用累计的执行记录。
    pub fn executions(&self) -> &[HandlerExecution] {
        &self.executions
    }

    pub(crate) fn take_executions(&mut self) -> Vec<HandlerExecution> {
        std::mem::take(&mut self.executions)
    }

    /// 记录执行状态；同一 Handler 在一次调用中只保留首条记录。
    pub(crate) fn record_execution(
        &mut self,
        handler: &Arc<dyn Handler>,
        phase: &'static str,
        status: ExecutionStatus,
    ) {
        let id = handler_id(handler);
        if self.executions.iter().any(|entry| entry.handler_id == id) {
            return;
        }
        self.executions.push(HandlerExecution {
            handler: handler.describe().to_owned(),
            phase,
            status,
            handler_id: id,
        });
    }
}

impl core::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestContext")
            .field("operation", &self.operation)
            .field("processing_complete", &self.processing_complete)
            .field("executions", &self.executions)
            .finish_non_exhaustive()
    }
}
