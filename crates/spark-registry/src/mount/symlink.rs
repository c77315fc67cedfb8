//! 同实例符号链接。
//!
//! # 教案式说明
//! - **意图（Why）**：让 `/a/b` 下的请求落到同一实例的 `/x` 子树，调用方仍以 `/a/b/...` 寻址；
//! - **逻辑（How）**：Handler 把请求路径改写到目标子树后交回本地实例重新调度，结果路径再改写回来；
//!   同一作用域中同一链接重入时放行，互相指向的链接因此在有限步内终止；
//! - **契约（What）**：同一挂载点同时只保留一个链接 Handler，安装与移除在
//!   [`SymLinkRegistry`] 的锁内串行执行。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    LinkTarget, MountEntry, evict_providers, forward_value_methods, forward_void_methods,
    strip_link_properties,
};
use crate::{
    context::{Operation, Outcome, RequestContext},
    error::Result,
    filter::MountFilter,
    handler::{Handler, MountProvider},
    lifecycle::{HandlerLifecycleManager, LifecyclePhase},
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag, properties},
    operation::OperationKind,
    path,
    scope::ExecutionKey,
    store::ResourceStore,
};

const EXECUTION_KIND: &str = "symlink";

/// 符号链接 Handler。
#[derive(Debug)]
pub struct SymLinkHandler {
    mount_point: String,
    target_point: String,
    author: Option<String>,
    entry_registered: AtomicBool,
}

impl SymLinkHandler {
    pub fn new(
        mount_point: impl Into<String>,
        target_point: impl Into<String>,
        author: Option<String>,
    ) -> Self {
        Self {
            mount_point: mount_point.into(),
            target_point: target_point.into(),
            author,
            entry_registered: AtomicBool::new(false),
        }
    }

    /// 条目已存在（启动恢复时），不再重复写入。
    pub(crate) fn entry_already_registered(self) -> Self {
        self.entry_registered.store(true, Ordering::Release);
        self
    }

    /// 持久化挂载条目，只写一次；失败记录 warn，下次安装时重试。
    pub(crate) fn register_entry(&self, store: &dyn ResourceStore) {
        if self.entry_registered.swap(true, Ordering::AcqRel) {
            return;
        }
        let entry = MountEntry::new(
            self.mount_point.clone(),
            &self.link_target(),
            self.author.clone(),
        );
        if let Err(err) = entry.persist(store) {
            self.entry_registered.store(false, Ordering::Release);
            warn!(mount_point = %self.mount_point, error = %err, "failed to register symlink entry");
        }
    }

    pub fn target_point(&self) -> &str {
        &self.target_point
    }

    fn map_in(&self, candidate: &str) -> String {
        path::rebase(candidate, &self.mount_point, &self.target_point)
            .unwrap_or_else(|| candidate.to_owned())
    }

    fn map_out(&self, candidate: &str) -> String {
        path::rebase(candidate, &self.target_point, &self.mount_point)
            .unwrap_or_else(|| candidate.to_owned())
    }

    fn localize(&self, outcome: &mut Outcome) {
        outcome.map_paths(|candidate| self.map_out(candidate));
        if let Outcome::Resource(resource) = outcome {
            let actual = self.map_in(resource.path());
            resource.set_property(properties::LINK, "true");
            resource.set_property(properties::MOUNT_POINT, self.mount_point.clone());
            resource.set_property(properties::TARGET_POINT, self.target_point.clone());
            resource.set_property(properties::ACTUAL_PATH, actual);
            if let Some(author) = &self.author {
                resource.set_property(properties::AUTHOR, author.clone());
            }
        }
    }

    fn forward(&self, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        let local = ctx.require_registry()?;
        let key = ExecutionKey {
            instance: local.instance_id().to_owned(),
            kind: EXECUTION_KIND,
            mount_point: self.mount_point.clone(),
        };
        let Some(_executing) = ctx.scope().enter(key) else {
            debug!(mount_point = %self.mount_point, kind = %ctx.kind(), "symlink re-entered, passing through");
            return Ok(None);
        };

        let operation = if ctx.kind() == OperationKind::Delete && ctx.path() == self.mount_point {
            Operation::RemoveLink {
                path: self.mount_point.clone(),
            }
        } else {
            let mut operation = ctx.operation().clone();
            operation.map_paths(|candidate| self.map_in(candidate));
            if let Some(resource) = operation.resource_mut() {
                strip_link_properties(resource);
            }
            operation
        };
        debug!(
            mount_point = %self.mount_point,
            target_point = %self.target_point,
            actual = operation.path(),
            "forwarding operation through symlink"
        );
        let mut outcome = {
            let _rewrite = ctx
                .scope()
                .push_rewrite(self.target_point.clone(), self.mount_point.clone());
            local.execute(ctx.scope(), operation)?
        };
        self.localize(&mut outcome);
        ctx.set_processing_complete(true);
        Ok(Some(outcome))
    }
}

impl MountProvider for SymLinkHandler {
    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn link_target(&self) -> LinkTarget {
        LinkTarget::Path(self.target_point.clone())
    }
}

impl Handler for SymLinkHandler {
    fn describe(&self) -> &str {
        "SymLinkHandler"
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
        get_registry_context => into_context -> RegistryContextInfo;
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

    /// 只转发查询根位于链接内的查询。
    fn execute_query(&self, ctx: &mut RequestContext) -> Result<Option<Collection>> {
        if !path::is_within(ctx.path(), &self.mount_point) {
            return Ok(None);
        }
        Ok(self.forward(ctx)?.and_then(Outcome::into_collection))
    }

    fn dump(&self, ctx: &mut RequestContext) -> Result<()> {
        if let Some(dump) = self.forward(ctx)?.and_then(Outcome::into_dump) {
            ctx.set_dump(dump);
        }
        Ok(())
    }
}

/// 已安装符号链接的登记表。
#[derive(Debug, Default)]
pub struct SymLinkRegistry {
    active: Mutex<Vec<Arc<SymLinkHandler>>>,
}

impl SymLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装符号链接。
    ///
    /// 同一挂载点与目标已安装时直接返回现有 Handler；否则先驱逐该挂载点上的全部链接 Handler。
    pub fn install(
        &self,
        lifecycle: &HandlerLifecycleManager,
        handler: SymLinkHandler,
    ) -> Arc<SymLinkHandler> {
        let mut active = self.active.lock();
        if let Some(existing) = active.iter().find(|existing| {
            existing.mount_point == handler.mount_point
                && existing.target_point == handler.target_point
        }) {
            debug!(mount_point = %handler.mount_point, "symlink already installed");
            return Arc::clone(existing);
        }
        evict_providers(lifecycle, &handler.mount_point);
        active.retain(|existing| existing.mount_point != handler.mount_point);

        let handler = Arc::new(handler);
        let registered: Arc<dyn Handler> = handler.clone();
        lifecycle.add_handler(
            LifecyclePhase::Default,
            None,
            Arc::new(MountFilter::new(handler.mount_point.clone())),
            registered,
        );
        info!(
            mount_point = %handler.mount_point,
            target_point = %handler.target_point,
            "symlink installed"
        );
        active.push(Arc::clone(&handler));
        handler
    }

    /// 移除挂载点上的符号链接，返回是否存在过。
    pub fn remove(&self, lifecycle: &HandlerLifecycleManager, mount_point: &str) -> bool {
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|existing| existing.mount_point != mount_point);
        let removed = active.len() != before;
        if removed {
            evict_providers(lifecycle, mount_point);
        }
        removed
    }

    /// 只更新登记表，不触碰调度表；链接已被其他路径驱逐时使用。
    pub(crate) fn forget(&self, mount_point: &str) {
        self.active
            .lock()
            .retain(|existing| existing.mount_point != mount_point);
    }

    pub fn active(&self) -> Vec<Arc<SymLinkHandler>> {
        self.active.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}
