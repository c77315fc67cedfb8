//! # MountHandler：跨实例重定向
//!
//! ## 意图（Why）
//! - 把本地挂载点下的子树透明地映射到另一个仓库实例（本地克隆或远端），调用方看到的
//!   路径始终位于本地命名空间。
//!
//! ## 解析逻辑（How）
//! 1. 首次使用时经 [`InstanceConnector`] 惰性连接目标实例，并持久化一次挂载条目；
//! 2. 实际路径 = 目标根（实例根 + 子路径）+ 请求路径去掉挂载点前缀；
//! 3. 每次委托都包在 [`NestedOperation`] 中：目标实例开启事务帧，调用作用域压入
//!    事务帧与远端→本地改写帧；正常结束提交并执行目标的 `commit` 阶段，失败回滚并执行
//!    `rollback` 阶段，其余提前返回在 `Drop` 中回滚并出栈；
//! 4. 返回值中的路径改写回挂载点下，资源附带链接元数据；
//! 5. 同一作用域中同一挂载点重入时直接放行，交给后续链路与存储。
//!
//! ## 契约（What）
//! - 源与目标跨越挂载边界的搬移类操作退化为导出→恢复→删除源（复制不删除）；
//! - 联邦查询按 `(实例 ID, 挂载点)` 去重，且从不标记完成，兄弟挂载与本地存储的结果由门面合并；
//! - 只读目标拒绝一切会写入目标的请求。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{LinkTarget, MountEntry, forward_value_methods, forward_void_methods, strip_link_properties};
use crate::{
    context::{Operation, Outcome, RequestContext},
    error::{RegistryError, Result},
    handler::{Handler, MountProvider},
    instance::{InstanceConnector, RegistryInstance, RemoteInstanceConfig},
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag, properties},
    operation::OperationKind,
    path,
    scope::{CallScope, ExecutionKey, RewriteGuard, TransactionGuard},
    store::ResourceStore,
};

const EXECUTION_KIND: &str = "mount";

/// 跨实例挂载 Handler。
pub struct MountHandler {
    mount_point: String,
    instance: RemoteInstanceConfig,
    target_path: String,
    author: Option<String>,
    persist_entry: bool,
    connector: Arc<dyn InstanceConnector>,
    target: Mutex<Option<Arc<dyn RegistryInstance>>>,
    entry_registered: AtomicBool,
}

impl MountHandler {
    /// `target_path` 为目标实例内（相对实例根）的子路径。
    pub fn new(
        mount_point: impl Into<String>,
        instance: RemoteInstanceConfig,
        target_path: impl Into<String>,
        connector: Arc<dyn InstanceConnector>,
    ) -> Self {
        Self {
            mount_point: mount_point.into(),
            instance,
            target_path: target_path.into(),
            author: None,
            persist_entry: true,
            connector,
            target: Mutex::new(None),
            entry_registered: AtomicBool::new(false),
        }
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    /// 不持久化挂载条目的虚拟挂载。
    pub fn without_entry(mut self) -> Self {
        self.persist_entry = false;
        self
    }

    /// 条目已存在（例如启动恢复时），跳过首次持久化。
    pub(crate) fn entry_already_registered(self) -> Self {
        self.entry_registered.store(true, Ordering::Release);
        self
    }

    pub fn instance(&self) -> &RemoteInstanceConfig {
        &self.instance
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    /// 目标实例内挂载子树的绝对根。
    pub fn target_root(&self) -> String {
        path::rebase(&self.target_path, path::ROOT, &self.instance.root)
            .unwrap_or_else(|| self.target_path.clone())
    }

    /// 挂载点下的本地路径在目标实例中的位置。
    pub fn actual_path(&self, local: &str) -> Option<String> {
        path::rebase(local, &self.mount_point, &self.target_root())
    }

    fn map_in(&self, candidate: &str) -> String {
        self.actual_path(candidate)
            .unwrap_or_else(|| candidate.to_owned())
    }

    fn map_out(&self, candidate: &str) -> String {
        path::rebase(candidate, &self.target_root(), &self.mount_point)
            .unwrap_or_else(|| candidate.to_owned())
    }

    fn entry(&self) -> MountEntry {
        MountEntry::new(
            self.mount_point.clone(),
            &self.link_target(),
            self.author.clone(),
        )
    }

    /// 持久化挂载条目，只在第一次成功时写入；失败记录 warn，下一次使用时重试。
    pub(crate) fn register_entry(&self, store: &dyn ResourceStore) {
        if !self.persist_entry || self.entry_registered.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.entry().persist(store) {
            Ok(()) => info!(mount_point = %self.mount_point, instance = %self.instance.id, "mount entry registered"),
            Err(err) => {
                self.entry_registered.store(false, Ordering::Release);
                warn!(mount_point = %self.mount_point, error = %err, "failed to register mount entry");
            }
        }
    }

    /// 目标实例，首次调用时连接。
    fn repository(&self, ctx: &RequestContext) -> Result<Arc<dyn RegistryInstance>> {
        let connected = {
            let mut target = self.target.lock();
            match target.as_ref() {
                Some(existing) => Arc::clone(existing),
                None => {
                    let connected = self.connector.connect(&self.instance)?;
                    info!(
                        mount_point = %self.mount_point,
                        instance = %self.instance.id,
                        "mount target connected"
                    );
                    *target = Some(Arc::clone(&connected));
                    connected
                }
            }
        };
        if let Some(store) = ctx.store() {
            self.register_entry(store.as_ref());
        }
        Ok(connected)
    }

    fn execution_key(&self, ctx: &RequestContext) -> ExecutionKey {
        ExecutionKey {
            instance: ctx
                .registry()
                .map(|registry| registry.instance_id().to_owned())
                .unwrap_or_default(),
            kind: EXECUTION_KIND,
            mount_point: self.mount_point.clone(),
        }
    }

    /// 在目标实例上执行一次嵌套操作。
    fn run_nested(
        &self,
        scope: &CallScope,
        target: &Arc<dyn RegistryInstance>,
        operation: Operation,
    ) -> Result<Outcome> {
        let nested = NestedOperation::begin(
            target.as_ref(),
            scope,
            &self.target_root(),
            &self.mount_point,
        )?;
        match target.execute(scope, operation.clone()) {
            Ok(outcome) if scope.is_simulation() => {
                nested.rollback(None)?;
                Ok(outcome)
            }
            Ok(outcome) => {
                nested.commit(&operation)?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = nested.rollback(Some(&operation)) {
                    warn!(instance = target.instance_id(), error = %rollback, "nested rollback failed");
                }
                Err(err)
            }
        }
    }

    /// 把目标侧结果改写回本地命名空间并附加链接元数据。
    fn localize(&self, outcome: &mut Outcome) {
        outcome.map_paths(|candidate| self.map_out(candidate));
        if let Outcome::Resource(resource) = outcome {
            let local = resource.path().to_owned();
            let actual = self.map_in(&local);
            resource.set_property(properties::LINK, "true");
            resource.set_property(properties::MOUNT, "true");
            resource.set_property(properties::MOUNT_POINT, self.mount_point.clone());
            resource.set_property(properties::TARGET_POINT, self.target_root());
            resource.set_property(properties::REAL_PATH, format!("{}:{actual}", self.instance.id));
            resource.set_property(properties::ACTUAL_PATH, actual);
            if let Some(author) = &self.author {
                resource.set_property(properties::AUTHOR, author.clone());
            }
        }
    }

    /// 该请求是否会写入目标实例。
    fn writes_target(&self, ctx: &RequestContext) -> bool {
        let kind = ctx.kind();
        if !kind.is_relocation() {
            return kind.is_write();
        }
        let target_inside = ctx
            .target_path()
            .is_some_and(|target| path::is_within(target, &self.mount_point));
        let source_inside = path::is_within(ctx.path(), &self.mount_point);
        target_inside || (source_inside && kind != OperationKind::Copy)
    }

    /// 删除挂载点本身时改为移除链接。
    fn unlink(&self, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        let local = ctx.require_registry()?;
        local.execute(
            ctx.scope(),
            Operation::RemoveLink {
                path: self.mount_point.clone(),
            },
        )?;
        ctx.set_processing_complete(true);
        Ok(Some(Outcome::Empty))
    }

    /// 通用转发入口。
    fn forward(&self, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        let Some(_executing) = ctx.scope().enter(self.execution_key(ctx)) else {
            debug!(mount_point = %self.mount_point, kind = %ctx.kind(), "mount re-entered, passing through");
            return Ok(None);
        };
        let kind = ctx.kind();
        if kind == OperationKind::Delete && ctx.path() == self.mount_point {
            return self.unlink(ctx);
        }
        if self.instance.read_only && self.writes_target(ctx) {
            return Err(RegistryError::ReadOnly {
                instance: self.instance.id.clone(),
            });
        }
        let target = self.repository(ctx)?;

        if kind.is_relocation() {
            let source_inside = path::is_within(ctx.path(), &self.mount_point);
            let target_inside = ctx
                .target_path()
                .is_some_and(|target| path::is_within(target, &self.mount_point));
            if source_inside != target_inside {
                return self.relocate_across(ctx, &target, source_inside);
            }
        }

        let mut operation = ctx.operation().clone();
        operation.map_paths(|candidate| self.map_in(candidate));
        if let Some(resource) = operation.resource_mut() {
            strip_link_properties(resource);
        }
        debug!(
            mount_point = %self.mount_point,
            instance = %self.instance.id,
            %kind,
            actual = operation.path(),
            "forwarding operation to mount target"
        );
        let mut outcome = self.run_nested(ctx.scope(), &target, operation)?;
        self.localize(&mut outcome);
        ctx.set_processing_complete(true);
        Ok(Some(outcome))
    }

    /// 跨越挂载边界的搬移：导出→恢复→删除源。
    fn relocate_across(
        &self,
        ctx: &mut RequestContext,
        target: &Arc<dyn RegistryInstance>,
        source_inside: bool,
    ) -> Result<Option<Outcome>> {
        let kind = ctx.kind();
        let source = ctx.path().to_owned();
        let destination = ctx
            .target_path()
            .map(str::to_owned)
            .ok_or_else(|| RegistryError::invalid_path(&source, "relocation without a target"))?;
        let local = ctx.require_registry()?;
        let scope = ctx.scope().clone();
        info!(%kind, %source, %destination, mount_point = %self.mount_point, "relocating across mount boundary");

        if source_inside {
            let remote_source = self.map_in(&source);
            let dump = self
                .run_nested(&scope, target, Operation::Dump {
                    path: remote_source.clone(),
                })?
                .into_dump()
                .ok_or_else(|| RegistryError::not_found(&source))?;
            local.execute(&scope, Operation::Restore {
                path: destination.clone(),
                dump,
            })?;
            if kind != OperationKind::Copy {
                self.run_nested(&scope, target, Operation::Delete {
                    path: remote_source,
                })?;
            }
        } else {
            let dump = local
                .execute(&scope, Operation::Dump {
                    path: source.clone(),
                })?
                .into_dump()
                .ok_or_else(|| RegistryError::not_found(&source))?;
            self.run_nested(&scope, target, Operation::Restore {
                path: self.map_in(&destination),
                dump,
            })?;
            if kind != OperationKind::Copy {
                local.execute(&scope, Operation::Delete { path: source })?;
            }
        }
        ctx.set_processing_complete(true);
        Ok(Some(Outcome::Path(destination)))
    }

    /// 联邦查询：每个 `(实例, 挂载点)` 在一棵调用树中只查询一次，不标记完成。
    fn federated_query(&self, ctx: &mut RequestContext) -> Result<Option<Collection>> {
        let Operation::ExecuteQuery { path: root, params } = ctx.operation().clone() else {
            return Ok(None);
        };
        let Some(_executing) = ctx.scope().enter(self.execution_key(ctx)) else {
            return Ok(None);
        };
        if !ctx.scope().mark_queried(&self.instance.id, &self.mount_point) {
            debug!(mount_point = %self.mount_point, "federated query already issued in this call");
            return Ok(None);
        }
        let remote_root = if path::is_within(&root, &self.mount_point) {
            self.map_in(&root)
        } else {
            self.target_root()
        };
        let target = self.repository(ctx)?;
        let outcome = self.run_nested(ctx.scope(), &target, Operation::ExecuteQuery {
            path: remote_root,
            params,
        })?;
        let target_root = self.target_root();
        let children = outcome
            .into_collection()
            .map(|collection| {
                collection
                    .children()
                    .iter()
                    .filter_map(|child| path::rebase(child, &target_root, &self.mount_point))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(Resource::collection_of(root, children)))
    }
}

impl MountProvider for MountHandler {
    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn link_target(&self) -> LinkTarget {
        LinkTarget::Instance {
            instance_id: self.instance.id.clone(),
            sub_path: Some(self.target_path.clone()),
        }
    }
}

impl Handler for MountHandler {
    fn describe(&self) -> &str {
        "MountHandler"
    }

    fn as_mount_provider(&self) -> Option<&dyn MountProvider> {
        Some(self)
    }

    forward_value_methods! {
        get => into_resource -> Resource;
        put => into_path -> String;
        move_resource => into_path -> String;
        copy => into_path -> String;
        rename => into_path -> String;
        import_resource => into_path -> String;
        get_versions => into_paths -> Vec<String>;
        get_associations => into_associations -> Vec<Association>;
        get_all_associations => into_associations -> Vec<Association>;
        get_tags => into_tags -> Vec<Tag>;
        add_comment => into_path -> String;
        get_comments => into_comments -> Vec<Comment>;
        get_rating => into_rating -> u8;
        get_average_rating => into_average_rating -> f32;
    }

    forward_void_methods! {
        delete;
        create_version;
        restore_version;
        add_association;
        remove_association;
        apply_tag;
        remove_tag;
        edit_comment;
        remove_comment;
        rate_resource;
        restore;
        invoke_aspect;
    }

    fn resource_exists(&self, ctx: &mut RequestContext) -> Result<bool> {
        Ok(self
            .forward(ctx)?
            .and_then(Outcome::into_exists)
            .unwrap_or(false))
    }

    fn execute_query(&self, ctx: &mut RequestContext) -> Result<Option<Collection>> {
        self.federated_query(ctx)
    }

    fn dump(&self, ctx: &mut RequestContext) -> Result<()> {
        if let Some(dump) = self.forward(ctx)?.and_then(Outcome::into_dump) {
            ctx.set_dump(dump);
        }
        Ok(())
    }

    fn get_registry_context(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<RegistryContextInfo>> {
        ctx.set_processing_complete(true);
        Ok(Some(self.instance.context_info()))
    }
}

impl core::fmt::Debug for MountHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountHandler")
            .field("mount_point", &self.mount_point)
            .field("instance", &self.instance.id)
            .field("target_path", &self.target_path)
            .finish_non_exhaustive()
    }
}

/// 嵌套操作帧：目标实例事务 + 作用域事务帧 + 路径改写帧。
///
/// 作用域事务帧让目标实例把自己的边界视为内层，`commit`/`rollback` 阶段改由本帧收尾时执行。
/// 未收尾就被释放时只回滚目标事务；改写帧与事务帧随字段析构出栈。
struct NestedOperation<'a> {
    target: &'a dyn RegistryInstance,
    scope: CallScope,
    _rewrite: RewriteGuard,
    _transaction: TransactionGuard,
    open: bool,
}

impl<'a> NestedOperation<'a> {
    fn begin(
        target: &'a dyn RegistryInstance,
        scope: &CallScope,
        remote_root: &str,
        local_root: &str,
    ) -> Result<Self> {
        let transaction = scope.enter_transaction(target.instance_id());
        target.begin_transaction()?;
        Ok(Self {
            target,
            scope: scope.clone(),
            _rewrite: scope.push_rewrite(remote_root, local_root),
            _transaction: transaction,
            open: true,
        })
    }

    fn commit(mut self, operation: &Operation) -> Result<()> {
        self.open = false;
        self.target.commit_transaction(&self.scope, operation)
    }

    fn rollback(mut self, failed: Option<&Operation>) -> Result<()> {
        self.open = false;
        self.target.rollback_transaction(&self.scope, failed)
    }
}

impl Drop for NestedOperation<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(err) = self.target.rollback_transaction(&self.scope, None) {
            warn!(instance = self.target.instance_id(), error = %err, "nested rollback failed");
        }
    }
}
