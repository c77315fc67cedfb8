//! # Registry：仓库门面
//!
//! ## 意图（Why）
//! - 对外暴露每一种仓库操作；内部把一次调用组织为“规范化 → 授权 → 事务边界 → 生命周期调度
//!   → 存储回落”的固定流水线；
//! - 同一门面也实现 [`RegistryInstance`]，因此可以被其他实例挂载。
//!
//! ## 解析逻辑（How）
//! 1. 全部路径字段先经 [`path::normalize`]；
//! 2. 授权协作方按 `(路径, 动作, 身份)` 判定，搬移类先检查源路径再以写入动作检查目标路径；
//! 3. 写操作进入存储事务帧，成功时提交（模拟模式下一律回滚），最外层帧触发 `commit` 或
//!    `rollback` 阶段；
//! 4. [`HandlerLifecycleManager`] 执行各阶段；完成闩锁未置位时回落到存储，`EXECUTE_QUERY`
//!    把本地结果与 Handler 结果合并；
//! 5. 链接的安装、移除与恢复也在这里完成，挂载条目保存在存储中。
//!
//! ## 契约（What）
//! - 每个实例持有自己的模拟标记与符号链接登记表，没有进程级静态状态；
//! - 构建器返回 `Arc<Registry>`，内部保存一个弱自引用，供请求上下文回指本实例。

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    auth::{Action, AllowAll, Authorizer},
    catalog::HandlerCatalog,
    config::{OverwritePolicy, RegistryConfig, RegistrySettings},
    context::{HandlerExecution, Operation, Outcome, RequestContext},
    error::{ConfigError, RegistryError, Result},
    filter::{Filter, MountFilter},
    handler::{Handler, MountProvider},
    instance::{InstanceConnector, InstanceRegistry, RegistryInstance, RemoteInstanceConfig},
    lifecycle::{HandlerLifecycleManager, LifecyclePhase},
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag, properties},
    mount::{LinkTarget, MountEntry, MountHandler, SymLinkHandler, SymLinkRegistry, evict_providers},
    operation::{MethodSet, OperationKind},
    path,
    scope::CallScope,
    simulation::SimulationReport,
    store::{InMemoryStore, ResourceStore, TransactionBoundary},
};

/// 身份与默认作者均缺失时使用的用户名。
const ANONYMOUS: &str = "anonymous";

/// 仓库实例。
pub struct Registry {
    settings: RegistrySettings,
    store: Arc<dyn ResourceStore>,
    transactions: Arc<dyn TransactionBoundary>,
    lifecycle: HandlerLifecycleManager,
    authorizer: Arc<dyn Authorizer>,
    connector: Arc<dyn InstanceConnector>,
    remote_instances: DashMap<String, RemoteInstanceConfig>,
    symlinks: SymLinkRegistry,
    simulation: AtomicBool,
    self_ref: Weak<Registry>,
}

/// [`Registry`] 构建器。
pub struct RegistryBuilder {
    settings: RegistrySettings,
    store: Option<(Arc<dyn ResourceStore>, Arc<dyn TransactionBoundary>)>,
    authorizer: Option<Arc<dyn Authorizer>>,
    connector: Option<Arc<dyn InstanceConnector>>,
    remote_instances: Vec<RemoteInstanceConfig>,
}

impl RegistryBuilder {
    /// 同时提供资源存储与事务边界的存储实现。
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ResourceStore + TransactionBoundary,
    {
        let resources: Arc<dyn ResourceStore> = store.clone();
        self.store = Some((resources, store));
        self
    }

    pub fn authorizer(mut self, authorizer: impl Authorizer) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    pub fn connector(mut self, connector: Arc<dyn InstanceConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn remote_instance(mut self, instance: RemoteInstanceConfig) -> Self {
        self.remote_instances.push(instance);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.settings.read_only = read_only;
        self
    }

    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.settings.default_author = Some(author.into());
        self
    }

    /// 整体替换实例设置（含实例 ID）。
    pub fn settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Arc<Registry> {
        let (store, transactions) = self.store.unwrap_or_else(|| {
            let store = Arc::new(InMemoryStore::new());
            let resources: Arc<dyn ResourceStore> = store.clone();
            let transactions: Arc<dyn TransactionBoundary> = store;
            (resources, transactions)
        });
        let remote_instances = self
            .remote_instances
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();
        let simulation = AtomicBool::new(self.settings.simulation);
        Arc::new_cyclic(|self_ref| Registry {
            settings: self.settings,
            store,
            transactions,
            lifecycle: HandlerLifecycleManager::new(),
            authorizer: self.authorizer.unwrap_or_else(|| Arc::new(AllowAll)),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(InstanceRegistry::new())),
            remote_instances,
            symlinks: SymLinkRegistry::new(),
            simulation,
            self_ref: self_ref.clone(),
        })
    }
}

impl Registry {
    pub fn builder(instance_id: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder {
            settings: RegistrySettings {
                instance_id: instance_id.into(),
                ..RegistrySettings::default()
            },
            store: None,
            authorizer: None,
            connector: None,
            remote_instances: Vec::new(),
        }
    }

    /// 使用内存存储与默认协作方的实例。
    pub fn in_memory(instance_id: impl Into<String>) -> Arc<Self> {
        Self::builder(instance_id).build()
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn lifecycle(&self) -> &HandlerLifecycleManager {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn symlinks(&self) -> &SymLinkRegistry {
        &self.symlinks
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation.load(Ordering::Acquire)
    }

    /// 切换本实例的模拟标记，只影响之后由 [`Registry::scope`] 创建的作用域。
    pub fn set_simulation(&self, simulation: bool) {
        self.simulation.store(simulation, Ordering::Release);
        info!(instance = %self.settings.instance_id, simulation, "simulation mode changed");
    }

    /// 以实例当前模拟标记创建调用作用域。
    pub fn scope(&self) -> CallScope {
        CallScope::builder()
            .simulation(self.is_simulation())
            .build()
    }

    pub fn register_remote_instance(&self, instance: RemoteInstanceConfig) {
        self.remote_instances.insert(instance.id.clone(), instance);
    }

    pub fn remote_instance(&self, id: &str) -> Option<RemoteInstanceConfig> {
        self.remote_instances
            .get(id)
            .map(|entry| entry.value().clone())
    }

    fn self_arc(&self) -> Result<Arc<dyn RegistryInstance>> {
        let registry: Arc<Registry> = self
            .self_ref
            .upgrade()
            .ok_or_else(|| RegistryError::fatal("registry instance has been dropped"))?;
        Ok(registry)
    }

    fn author_for(&self, scope: &CallScope) -> Option<String> {
        scope
            .identity()
            .map(str::to_owned)
            .or_else(|| self.settings.default_author.clone())
    }

    fn user_for(&self, scope: &CallScope) -> String {
        self.author_for(scope)
            .unwrap_or_else(|| ANONYMOUS.to_owned())
    }

    fn context(&self, scope: &CallScope, operation: Operation) -> Result<RequestContext> {
        Ok(RequestContext::new(operation, scope.clone())
            .with_registry(self.self_arc()?)
            .with_store(Arc::clone(&self.store)))
    }

    // ---- Handler 注册 ----

    /// 在 `default` 阶段注册 Handler；`methods` 为 `None` 表示全部操作类型。
    pub fn add_handler(
        &self,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        self.lifecycle
            .add_handler(LifecyclePhase::Default, methods, filter, handler);
    }

    /// 按阶段名注册，未知或缺省的阶段名回落到 `default`。
    pub fn add_handler_in_phase(
        &self,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
        phase: Option<&str>,
    ) {
        self.lifecycle
            .add_handler(LifecyclePhase::resolve(phase), methods, filter, handler);
    }

    /// 在 `default` 阶段以优先级注册，新绑定排在最前。
    pub fn add_handler_with_priority(
        &self,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        self.lifecycle
            .add_handler_with_priority(LifecyclePhase::Default, methods, filter, handler);
    }

    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        self.lifecycle
            .remove_handler(LifecyclePhase::Default, handler)
    }

    pub fn remove_handler_from_phase(&self, handler: &Arc<dyn Handler>, phase: Option<&str>) -> bool {
        self.lifecycle
            .remove_handler(LifecyclePhase::resolve(phase), handler)
    }

    // ---- 调度 ----

    /// 在给定作用域中执行一次操作。
    pub fn execute(&self, scope: &CallScope, operation: Operation) -> Result<Outcome> {
        self.run(scope, operation).0
    }

    /// 以模拟模式预演一次操作并返回各 Handler 的执行状态。
    pub fn simulate(&self, operation: Operation) -> SimulationReport {
        let kind = operation.kind();
        let scope = CallScope::builder().simulation(true).build();
        let (result, executions) = self.run(&scope, operation);
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(err) => (None, Some(err.to_string())),
        };
        debug!(%kind, executions = executions.len(), failed = error.is_some(), "simulation finished");
        SimulationReport {
            kind,
            outcome,
            executions,
            error,
        }
    }

    fn run(&self, scope: &CallScope, operation: Operation) -> (Result<Outcome>, Vec<HandlerExecution>) {
        let mut ctx = match self.prepare(scope, operation) {
            Ok(ctx) => ctx,
            Err(err) => return (Err(err), Vec::new()),
        };
        let result = self.run_in_boundary(&mut ctx);
        (result, ctx.take_executions())
    }

    fn prepare(&self, scope: &CallScope, mut operation: Operation) -> Result<RequestContext> {
        operation.try_map_paths(path::normalize)?;
        let kind = operation.kind();
        match operation.target_path() {
            Some(target) => {
                self.authorize(scope, operation.path(), Action::for_relocation_source(kind))?;
                self.authorize(scope, target, Action::Write)?;
            }
            None => self.authorize(scope, operation.path(), Action::for_operation(kind))?,
        }
        if kind.is_write() && self.settings.read_only {
            return Err(RegistryError::ReadOnly {
                instance: self.settings.instance_id.clone(),
            });
        }
        debug!(instance = %self.settings.instance_id, %kind, path = operation.path(), "registry operation");
        self.context(scope, operation)
    }

    fn authorize(&self, scope: &CallScope, path: &str, action: Action) -> Result<()> {
        if self.authorizer.is_authorized(path, action, scope.identity()) {
            return Ok(());
        }
        warn!(path, %action, identity = ?scope.identity(), "registry access denied");
        Err(RegistryError::Unauthorized {
            path: path.to_owned(),
            action,
        })
    }

    /// 写操作包在事务帧中执行。
    fn run_in_boundary(&self, ctx: &mut RequestContext) -> Result<Outcome> {
        let kind = ctx.kind();
        if !kind.is_write() {
            return self.dispatch(ctx);
        }
        let scope = ctx.scope().clone();
        let frame = scope.enter_transaction(&self.settings.instance_id);
        self.transactions.begin()?;
        match self.dispatch(ctx) {
            Ok(outcome) if !scope.is_simulation() => {
                if let Err(err) = self.transactions.commit() {
                    if frame.is_outermost() {
                        self.lifecycle.run_rollback(kind, ctx);
                    }
                    return Err(err);
                }
                if frame.is_outermost() {
                    self.lifecycle.run_commit(kind, ctx);
                }
                Ok(outcome)
            }
            result => {
                if let Err(err) = self.transactions.rollback() {
                    warn!(%kind, error = %err, "transaction rollback failed");
                }
                if result.is_err() && frame.is_outermost() {
                    self.lifecycle.run_rollback(kind, ctx);
                }
                result
            }
        }
    }

    /// 由外层事务帧收尾时补跑 `commit`/`rollback` 阶段，只针对写操作。
    fn finish_phase(&self, scope: &CallScope, operation: &Operation, committed: bool) {
        let kind = operation.kind();
        if !kind.is_write() {
            return;
        }
        match self.context(scope, operation.clone()) {
            Ok(mut ctx) if committed => self.lifecycle.run_commit(kind, &mut ctx),
            Ok(mut ctx) => self.lifecycle.run_rollback(kind, &mut ctx),
            Err(err) => warn!(%kind, error = %err, "transaction phase skipped"),
        }
    }

    fn dispatch(&self, ctx: &mut RequestContext) -> Result<Outcome> {
        let kind = ctx.kind();
        let handled = self.lifecycle.execute(kind, ctx)?;
        let handled = ctx.take_dump().map(Outcome::Dump).or(handled);
        if ctx.is_processing_complete() {
            debug!(%kind, path = ctx.path(), "operation completed by handlers");
            return Ok(handled.unwrap_or(Outcome::Empty));
        }
        if kind.is_write() && ctx.scope().is_simulation() {
            debug!(%kind, path = ctx.path(), "store write skipped in simulation");
            return Ok(handled.unwrap_or(Outcome::Empty));
        }
        let stored = self.fallback(ctx)?;
        Ok(match (kind, handled, stored) {
            (
                OperationKind::ExecuteQuery,
                Some(Outcome::Collection(found)),
                Outcome::Collection(mut local),
            ) => {
                let mut children = local.children().to_vec();
                for child in found.children() {
                    if !children.contains(child) {
                        children.push(child.clone());
                    }
                }
                local.set_children(children);
                Outcome::Collection(local)
            }
            (OperationKind::ResourceExists, Some(Outcome::Exists(found)), Outcome::Exists(local)) => {
                Outcome::Exists(found || local)
            }
            (_, Some(handled), Outcome::Empty) => handled,
            (_, _, stored) => stored,
        })
    }

    /// 存储回落。
    fn fallback(&self, ctx: &RequestContext) -> Result<Outcome> {
        let scope = ctx.scope().clone();
        let store = self.store.as_ref();
        let outcome = match ctx.operation().clone() {
            Operation::Get { path } => store.get(&path)?.map_or(Outcome::Empty, Outcome::Resource),
            Operation::Put { path, mut resource } => {
                if resource.author().is_none() {
                    resource.set_author(self.author_for(&scope));
                }
                let stored = store.put(&path, resource)?;
                self.notify_parent(&scope, &stored, OperationKind::PutChild)?;
                Outcome::Path(stored)
            }
            Operation::Delete { path } => {
                store.delete(&path)?;
                Outcome::Empty
            }
            Operation::Move { source, target } => Outcome::Path(store.move_resource(&source, &target)?),
            Operation::Copy { source, target } => Outcome::Path(store.copy(&source, &target)?),
            Operation::Rename { source, target } => Outcome::Path(store.rename(&source, &target)?),
            Operation::Import {
                path,
                url,
                mut resource,
            } => {
                resource.set_property(properties::IMPORT_SOURCE, url);
                if resource.author().is_none() {
                    resource.set_author(self.author_for(&scope));
                }
                let stored = store.put(&path, resource)?;
                self.notify_parent(&scope, &stored, OperationKind::ImportChild)?;
                Outcome::Path(stored)
            }
            Operation::PutChild { .. } | Operation::ImportChild { .. } => Outcome::Empty,
            Operation::CreateLink { path, target } => {
                self.install_link(&path, &target, self.author_for(&scope))?;
                Outcome::Empty
            }
            Operation::RemoveLink { path } => {
                self.uninstall_link(&path)?;
                Outcome::Empty
            }
            Operation::CreateVersion { path } => {
                store.create_version(&path)?;
                Outcome::Empty
            }
            Operation::RestoreVersion { version_path } => {
                store.restore_version(&version_path)?;
                Outcome::Empty
            }
            Operation::GetVersions { path } => Outcome::Paths(store.versions(&path)?),
            Operation::ExecuteQuery { path, params } => Outcome::Collection(store.query(&path, &params)?),
            Operation::SearchContent { keywords } => Outcome::Collection(store.search(&keywords)?),
            Operation::ResourceExists { path } => Outcome::Exists(store.exists(&path)?),
            Operation::AddAssociation { association } => {
                store.add_association(&association)?;
                Outcome::Empty
            }
            Operation::RemoveAssociation { association } => {
                store.remove_association(&association)?;
                Outcome::Empty
            }
            Operation::GetAssociations {
                path,
                association_type,
            } => Outcome::Associations(store.associations(&path, &association_type)?),
            Operation::GetAllAssociations { path } => {
                Outcome::Associations(store.all_associations(&path)?)
            }
            Operation::ApplyTag { path, tag } => {
                store.apply_tag(&path, &tag, &self.user_for(&scope))?;
                Outcome::Empty
            }
            Operation::GetTags { path } => Outcome::Tags(store.tags(&path)?),
            Operation::RemoveTag { path, tag } => {
                store.remove_tag(&path, &tag)?;
                Outcome::Empty
            }
            Operation::AddComment { path, mut comment } => {
                if comment.author.is_none() {
                    comment.author = self.author_for(&scope);
                }
                Outcome::Path(store.add_comment(&path, comment)?)
            }
            Operation::EditComment { comment_path, text } => {
                store.edit_comment(&comment_path, &text)?;
                Outcome::Empty
            }
            Operation::RemoveComment { comment_path } => {
                store.remove_comment(&comment_path)?;
                Outcome::Empty
            }
            Operation::GetComments { path } => Outcome::Comments(store.comments(&path)?),
            Operation::RateResource { path, rating } => {
                store.rate(&path, &self.user_for(&scope), rating)?;
                Outcome::Empty
            }
            Operation::GetRating { path, user } => Outcome::Rating(store.rating(&path, &user)?),
            Operation::GetAverageRating { path } => {
                Outcome::AverageRating(store.average_rating(&path)?)
            }
            Operation::Dump { path } => {
                let mut buffer = Vec::new();
                store.dump(&path, &mut buffer)?;
                let dump = String::from_utf8(buffer)
                    .map_err(|err| RegistryError::storage(format!("dump is not UTF-8: {err}")))?;
                Outcome::Dump(dump)
            }
            Operation::Restore { path, dump } => {
                store.restore(&path, &mut dump.as_bytes())?;
                Outcome::Empty
            }
            Operation::GetRegistryContext { .. } => Outcome::Context(self.context_info()),
            Operation::InvokeAspect {
                path,
                aspect,
                action,
            } => {
                let mut resource = store.get(&path)?.ok_or_else(|| RegistryError::not_found(&path))?;
                resource.set_property(format!("registry.lifecycle.{aspect}.state"), action);
                store.put(&path, resource)?;
                Outcome::Empty
            }
        };
        Ok(outcome)
    }

    /// 子资源写入后通知父集合。
    fn notify_parent(&self, scope: &CallScope, child: &str, kind: OperationKind) -> Result<()> {
        let Some(parent) = path::parent(child) else {
            return Ok(());
        };
        let child = child.to_owned();
        let operation = match kind {
            OperationKind::ImportChild => Operation::ImportChild { parent, child },
            _ => Operation::PutChild { parent, child },
        };
        let mut ctx = self.context(scope, operation)?;
        self.lifecycle.execute(kind, &mut ctx).map(|_| ())
    }

    // ---- 链接 ----

    fn install_link(&self, path: &str, target: &LinkTarget, author: Option<String>) -> Result<()> {
        if path == path::ROOT {
            return Err(RegistryError::invalid_path(path, "the root cannot be a link"));
        }
        match target {
            LinkTarget::Path(target_point) => {
                if path == target_point {
                    return Err(RegistryError::invalid_path(path, "a symlink cannot target itself"));
                }
                let handler = self.symlinks.install(
                    &self.lifecycle,
                    SymLinkHandler::new(path, target_point.clone(), author),
                );
                handler.register_entry(self.store.as_ref());
            }
            LinkTarget::Instance {
                instance_id,
                sub_path,
            } => {
                let instance = self.remote_instance(instance_id).ok_or_else(|| {
                    ConfigError::UnknownInstance {
                        path: path.to_owned(),
                        instance: instance_id.clone(),
                    }
                })?;
                let handler = MountHandler::new(
                    path,
                    instance,
                    sub_path.clone().unwrap_or_else(|| path::ROOT.to_owned()),
                    Arc::clone(&self.connector),
                )
                .with_author(author);
                let handler = self.install_mount(handler);
                handler.register_entry(self.store.as_ref());
            }
        }
        Ok(())
    }

    fn install_mount(&self, handler: MountHandler) -> Arc<MountHandler> {
        let mount_point = handler.mount_point().to_owned();
        self.symlinks.forget(&mount_point);
        evict_providers(&self.lifecycle, &mount_point);
        let handler = Arc::new(handler);
        let registered: Arc<dyn Handler> = handler.clone();
        self.lifecycle.add_handler(
            LifecyclePhase::Default,
            None,
            Arc::new(MountFilter::new(mount_point.clone())),
            registered,
        );
        info!(
            %mount_point,
            instance = %handler.instance().id,
            target_path = handler.target_path(),
            "remote mount installed"
        );
        handler
    }

    fn uninstall_link(&self, path: &str) -> Result<()> {
        let symlink = self.symlinks.remove(&self.lifecycle, path);
        let evicted = evict_providers(&self.lifecycle, path);
        if !symlink && evicted == 0 {
            debug!(path, "no link installed at path");
        }
        MountEntry::remove(self.store.as_ref(), path)
    }

    /// 创建同实例符号链接。
    pub fn create_link(&self, path: &str, target: &str) -> Result<()> {
        self.call(Operation::CreateLink {
            path: path.to_owned(),
            target: LinkTarget::Path(target.to_owned()),
        })
        .map(|_| ())
    }

    /// 把 `path` 挂载到远端实例 `instance_id` 的 `sub_path` 子树。
    pub fn create_remote_link(&self, path: &str, instance_id: &str, sub_path: &str) -> Result<()> {
        self.call(Operation::CreateLink {
            path: path.to_owned(),
            target: LinkTarget::Instance {
                instance_id: instance_id.to_owned(),
                sub_path: Some(sub_path.to_owned()),
            },
        })
        .map(|_| ())
    }

    /// 移除 `path` 上的链接及其挂载条目；没有链接时什么也不做。
    pub fn remove_link(&self, path: &str) -> Result<()> {
        self.call(Operation::RemoveLink {
            path: path.to_owned(),
        })
        .map(|_| ())
    }

    /// 从存储中的挂载条目恢复全部链接，返回恢复数量。
    ///
    /// 引用未登记实例的条目记录 warn 后跳过。
    pub fn restore_mounts(&self) -> Result<usize> {
        let mut restored = 0;
        for entry in MountEntry::load_all(self.store.as_ref())? {
            match entry.link_target() {
                LinkTarget::Path(target_point) => {
                    self.symlinks.install(
                        &self.lifecycle,
                        SymLinkHandler::new(entry.path.clone(), target_point, entry.author.clone())
                            .entry_already_registered(),
                    );
                    restored += 1;
                }
                LinkTarget::Instance {
                    instance_id,
                    sub_path,
                } => {
                    let Some(instance) = self.remote_instance(&instance_id) else {
                        warn!(mount_point = %entry.path, instance = %instance_id, "mount entry references an unknown instance, skipped");
                        continue;
                    };
                    self.install_mount(
                        MountHandler::new(
                            entry.path.clone(),
                            instance,
                            sub_path.unwrap_or_else(|| path::ROOT.to_owned()),
                            Arc::clone(&self.connector),
                        )
                        .with_author(entry.author.clone())
                        .entry_already_registered(),
                    );
                    restored += 1;
                }
            }
        }
        info!(instance = %self.settings.instance_id, restored, "mount entries restored");
        Ok(restored)
    }

    // ---- 配置 ----

    /// 应用配置中的远端实例、Handler 与挂载声明。
    pub fn apply_config(&self, config: &RegistryConfig, catalog: &HandlerCatalog) -> Result<()> {
        for instance in &config.remote_instance {
            self.register_remote_instance(instance.clone());
        }
        for declared in &config.handler {
            let handler = catalog.create(&declared.name)?;
            let methods = declared.method_set()?;
            let filter = declared.filter.build(MethodSet::or_all(methods))?;
            let phase = LifecyclePhase::resolve(declared.phase.as_deref());
            if declared.priority {
                self.lifecycle
                    .add_handler_with_priority(phase, methods, filter, handler);
            } else {
                self.lifecycle.add_handler(phase, methods, filter, handler);
            }
            debug!(handler = %declared.name, %phase, "configured handler registered");
        }
        for mount in &config.mount {
            let mount_point = path::normalize(&mount.path)?;
            let instance = self.remote_instance(&mount.instance_id).ok_or_else(|| {
                ConfigError::UnknownInstance {
                    path: mount.path.clone(),
                    instance: mount.instance_id.clone(),
                }
            })?;
            let handler = MountHandler::new(
                mount_point.clone(),
                instance,
                path::normalize(&mount.target_path)?,
                Arc::clone(&self.connector),
            )
            .with_author(self.settings.default_author.clone());
            match mount.overwrite {
                OverwritePolicy::Virtual => {
                    self.install_mount(handler.without_entry());
                }
                OverwritePolicy::True => {
                    match self.store.delete(&mount_point) {
                        Ok(()) => info!(%mount_point, "existing resource replaced by mount"),
                        Err(RegistryError::NotFound { .. }) => {}
                        Err(err) => return Err(err),
                    }
                    self.install_mount(handler)
                        .register_entry(self.store.as_ref());
                }
                OverwritePolicy::False => {
                    if self.store.exists(&mount_point)? {
                        warn!(%mount_point, "resource exists at mount point, mount skipped");
                        continue;
                    }
                    self.install_mount(handler)
                        .register_entry(self.store.as_ref());
                }
            }
        }
        Ok(())
    }

    // ---- 类型化操作 ----

    fn call(&self, operation: Operation) -> Result<Outcome> {
        self.execute(&self.scope(), operation)
    }

    pub fn get(&self, path: &str) -> Result<Resource> {
        self.call(Operation::Get {
            path: path.to_owned(),
        })?
        .into_resource()
        .ok_or_else(|| RegistryError::not_found(path))
    }

    pub fn put(&self, path: &str, resource: Resource) -> Result<String> {
        let requested = path.to_owned();
        Ok(self
            .call(Operation::Put {
                path: requested.clone(),
                resource,
            })?
            .into_path()
            .unwrap_or(requested))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.call(Operation::Delete {
            path: path.to_owned(),
        })
        .map(|_| ())
    }

    pub fn move_resource(&self, source: &str, target: &str) -> Result<String> {
        self.relocate(Operation::Move {
            source: source.to_owned(),
            target: target.to_owned(),
        })
    }

    pub fn copy(&self, source: &str, target: &str) -> Result<String> {
        self.relocate(Operation::Copy {
            source: source.to_owned(),
            target: target.to_owned(),
        })
    }

    /// 重命名；`new_name` 不含 `/` 时视为同一父集合下的新名称。
    pub fn rename(&self, source: &str, new_name: &str) -> Result<String> {
        let source = path::normalize(source)?;
        let target = if new_name.contains('/') {
            new_name.to_owned()
        } else {
            let parent = path::parent(&source).unwrap_or_else(|| path::ROOT.to_owned());
            path::join(&parent, new_name)
        };
        self.relocate(Operation::Rename { source, target })
    }

    fn relocate(&self, operation: Operation) -> Result<String> {
        let requested = operation.target_path().unwrap_or_default().to_owned();
        Ok(self.call(operation)?.into_path().unwrap_or(requested))
    }

    /// 导入资源，`url` 作为来源记录在 `registry.import.source` 属性中。
    pub fn import_resource(&self, path: &str, url: &str, resource: Resource) -> Result<String> {
        let requested = path.to_owned();
        Ok(self
            .call(Operation::Import {
                path: requested.clone(),
                url: url.to_owned(),
                resource,
            })?
            .into_path()
            .unwrap_or(requested))
    }

    pub fn create_version(&self, path: &str) -> Result<()> {
        self.call(Operation::CreateVersion {
            path: path.to_owned(),
        })
        .map(|_| ())
    }

    pub fn restore_version(&self, version_path: &str) -> Result<()> {
        self.call(Operation::RestoreVersion {
            version_path: version_path.to_owned(),
        })
        .map(|_| ())
    }

    pub fn get_versions(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .call(Operation::GetVersions {
                path: path.to_owned(),
            })?
            .into_paths()
            .unwrap_or_default())
    }

    pub fn execute_query(&self, path: &str, params: &BTreeMap<String, String>) -> Result<Collection> {
        Ok(self
            .call(Operation::ExecuteQuery {
                path: path.to_owned(),
                params: params.clone(),
            })?
            .into_collection()
            .unwrap_or_else(|| Resource::collection_of(path, Vec::new())))
    }

    pub fn search_content(&self, keywords: &str) -> Result<Collection> {
        Ok(self
            .call(Operation::SearchContent {
                keywords: keywords.to_owned(),
            })?
            .into_collection()
            .unwrap_or_else(|| Resource::collection_of(path::ROOT, Vec::new())))
    }

    pub fn resource_exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .call(Operation::ResourceExists {
                path: path.to_owned(),
            })?
            .into_exists()
            .unwrap_or(false))
    }

    pub fn add_association(&self, source: &str, destination: &str, association_type: &str) -> Result<()> {
        self.call(Operation::AddAssociation {
            association: Association::new(source, destination, association_type),
        })
        .map(|_| ())
    }

    pub fn remove_association(
        &self,
        source: &str,
        destination: &str,
        association_type: &str,
    ) -> Result<()> {
        self.call(Operation::RemoveAssociation {
            association: Association::new(source, destination, association_type),
        })
        .map(|_| ())
    }

    pub fn get_associations(&self, path: &str, association_type: &str) -> Result<Vec<Association>> {
        Ok(self
            .call(Operation::GetAssociations {
                path: path.to_owned(),
                association_type: association_type.to_owned(),
            })?
            .into_associations()
            .unwrap_or_default())
    }

    pub fn get_all_associations(&self, path: &str) -> Result<Vec<Association>> {
        Ok(self
            .call(Operation::GetAllAssociations {
                path: path.to_owned(),
            })?
            .into_associations()
            .unwrap_or_default())
    }

    pub fn apply_tag(&self, path: &str, tag: &str) -> Result<()> {
        self.call(Operation::ApplyTag {
            path: path.to_owned(),
            tag: tag.to_owned(),
        })
        .map(|_| ())
    }

    pub fn get_tags(&self, path: &str) -> Result<Vec<Tag>> {
        Ok(self
            .call(Operation::GetTags {
                path: path.to_owned(),
            })?
            .into_tags()
            .unwrap_or_default())
    }

    pub fn remove_tag(&self, path: &str, tag: &str) -> Result<()> {
        self.call(Operation::RemoveTag {
            path: path.to_owned(),
            tag: tag.to_owned(),
        })
        .map(|_| ())
    }

    /// 添加评论，返回评论路径。
    pub fn add_comment(&self, path: &str, comment: Comment) -> Result<String> {
        self.call(Operation::AddComment {
            path: path.to_owned(),
            comment,
        })?
        .into_path()
        .ok_or_else(|| RegistryError::storage(format!("no comment path was reported for `{path}`")))
    }

    pub fn edit_comment(&self, comment_path: &str, text: &str) -> Result<()> {
        self.call(Operation::EditComment {
            comment_path: comment_path.to_owned(),
            text: text.to_owned(),
        })
        .map(|_| ())
    }

    pub fn remove_comment(&self, comment_path: &str) -> Result<()> {
        self.call(Operation::RemoveComment {
            comment_path: comment_path.to_owned(),
        })
        .map(|_| ())
    }

    pub fn get_comments(&self, path: &str) -> Result<Vec<Comment>> {
        Ok(self
            .call(Operation::GetComments {
                path: path.to_owned(),
            })?
            .into_comments()
            .unwrap_or_default())
    }

    pub fn rate_resource(&self, path: &str, rating: u8) -> Result<()> {
        self.call(Operation::RateResource {
            path: path.to_owned(),
            rating,
        })
        .map(|_| ())
    }

    pub fn get_rating(&self, path: &str, user: &str) -> Result<u8> {
        Ok(self
            .call(Operation::GetRating {
                path: path.to_owned(),
                user: user.to_owned(),
            })?
            .into_rating()
            .unwrap_or(0))
    }

    pub fn get_average_rating(&self, path: &str) -> Result<f32> {
        Ok(self
            .call(Operation::GetAverageRating {
                path: path.to_owned(),
            })?
            .into_average_rating()
            .unwrap_or(0.0))
    }

    /// 导出子树，格式只保证能被 [`Registry::restore`] 读回。
    pub fn dump(&self, path: &str) -> Result<String> {
        self.call(Operation::Dump {
            path: path.to_owned(),
        })?
        .into_dump()
        .ok_or_else(|| RegistryError::not_found(path))
    }

    pub fn restore(&self, path: &str, dump: &str) -> Result<()> {
        self.call(Operation::Restore {
            path: path.to_owned(),
            dump: dump.to_owned(),
        })
        .map(|_| ())
    }

    /// `path` 所在实例的描述；挂载路径返回远端实例的描述。
    pub fn get_registry_context(&self, path: &str) -> Result<RegistryContextInfo> {
        Ok(self
            .call(Operation::GetRegistryContext {
                path: path.to_owned(),
            })?
            .into_context()
            .unwrap_or_else(|| self.context_info()))
    }

    pub fn invoke_aspect(&self, path: &str, aspect: &str, action: &str) -> Result<()> {
        self.call(Operation::InvokeAspect {
            path: path.to_owned(),
            aspect: aspect.to_owned(),
            action: action.to_owned(),
        })
        .map(|_| ())
    }
}

impl RegistryInstance for Registry {
    fn instance_id(&self) -> &str {
        &self.settings.instance_id
    }

    fn context_info(&self) -> RegistryContextInfo {
        RegistryContextInfo {
            instance_id: self.settings.instance_id.clone(),
            root: self.settings.root.clone(),
            read_only: self.settings.read_only,
            cache_enabled: self.settings.cache_enabled,
        }
    }

    fn execute(&self, scope: &CallScope, operation: Operation) -> Result<Outcome> {
        Registry::execute(self, scope, operation)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.transactions.begin()
    }

    fn commit_transaction(&self, scope: &CallScope, operation: &Operation) -> Result<()> {
        if let Err(err) = self.transactions.commit() {
            self.finish_phase(scope, operation, false);
            return Err(err);
        }
        self.finish_phase(scope, operation, true);
        Ok(())
    }

    fn rollback_transaction(&self, scope: &CallScope, failed: Option<&Operation>) -> Result<()> {
        let rolled_back = self.transactions.rollback();
        if let Some(operation) = failed {
            self.finish_phase(scope, operation, false);
        }
        rolled_back
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("instance_id", &self.settings.instance_id)
            .field("read_only", &self.settings.read_only)
            .field("simulation", &self.is_simulation())
            .field("symlinks", &self.symlinks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_through_store() {
        let registry = Registry::in_memory("local");
        registry
            .put("/a/b", Resource::new().with_content("hello"))
            .unwrap();
        let resource = registry.get("/a/b").unwrap();
        assert_eq!(resource.content(), b"hello");
        assert!(registry.get("/a").unwrap().is_collection(), "父集合应隐式创建");
    }

    #[test]
    fn read_only_instance_rejects_writes() {
        let registry = Registry::builder("ro").read_only(true).build();
        let err = registry.put("/a", Resource::new()).unwrap_err();
        assert!(matches!(err, RegistryError::ReadOnly { .. }), "只读实例必须拒绝写入: {err}");
        assert!(!registry.resource_exists("/a").unwrap());
    }

    #[test]
    #[tracing_test::traced_test]
    fn authorizer_denial_is_reported() {
        let registry = Registry::builder("local")
            .authorizer(|path: &str, action: Action, _: Option<&str>| {
                !(path.starts_with("/secret") && action == Action::Write)
            })
            .build();
        let err = registry.put("/secret/x", Resource::new()).unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { action: Action::Write, .. }));
        assert!(registry.put("/open/x", Resource::new()).is_ok());
        assert!(logs_contain("registry access denied"), "拒绝访问应记录告警日志");
    }

    #[test]
    fn relocation_checks_source_and_target() {
        let registry = Registry::builder("local")
            .authorizer(|path: &str, _: Action, _: Option<&str>| !path.starts_with("/secret"))
            .build();
        registry
            .store()
            .put("/secret/doc", Resource::new().with_content("classified"))
            .unwrap();

        let err = registry.move_resource("/secret/doc", "/open/doc").unwrap_err();
        assert!(
            matches!(err, RegistryError::Unauthorized { ref path, action: Action::Delete } if path == "/secret/doc"),
            "移动受保护的源必须被拒绝: {err}"
        );
        let err = registry.copy("/secret/doc", "/open/copy").unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { action: Action::Read, .. }), "{err}");
        let err = registry.rename("/secret/doc", "leaked").unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { .. }), "{err}");

        assert!(registry.store().exists("/secret/doc").unwrap(), "源资源必须保留");
        assert!(!registry.store().exists("/open/doc").unwrap());
        assert!(!registry.store().exists("/open/copy").unwrap());

        registry.put("/open/doc", Resource::new()).unwrap();
        let err = registry.copy("/open/doc", "/secret/doc2").unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { action: Action::Write, .. }), "{err}");
    }

    #[test]
    fn rename_accepts_bare_names() {
        let registry = Registry::in_memory("local");
        registry.put("/a/b", Resource::new().with_content("x")).unwrap();
        assert_eq!(registry.rename("/a/b", "c").unwrap(), "/a/c");
        assert!(registry.resource_exists("/a/c").unwrap());
        assert!(!registry.resource_exists("/a/b").unwrap());
    }

    #[test]
    fn invoke_aspect_records_state_property() {
        let registry = Registry::in_memory("local");
        registry.put("/svc", Resource::new()).unwrap();
        registry.invoke_aspect("/svc", "ServiceLifeCycle", "promote").unwrap();
        let resource = registry.get("/svc").unwrap();
        assert_eq!(
            resource.property("registry.lifecycle.ServiceLifeCycle.state"),
            Some("promote")
        );
    }

    #[test]
    fn simulation_leaves_store_untouched() {
        let registry = Registry::in_memory("local");
        let report = registry.simulate(Operation::Put {
            path: "/sim".to_owned(),
            resource: Resource::new(),
        });
        assert!(report.error.is_none());
        assert!(!registry.resource_exists("/sim").unwrap(), "模拟写入不得落盘");
    }

    #[test]
    fn import_records_source_url() {
        let registry = Registry::in_memory("local");
        registry
            .import_resource("/imported", "http://example.org/a.wsdl", Resource::new())
            .unwrap();
        let resource = registry.get("/imported").unwrap();
        assert_eq!(
            resource.property(properties::IMPORT_SOURCE),
            Some("http://example.org/a.wsdl")
        );
    }
}
