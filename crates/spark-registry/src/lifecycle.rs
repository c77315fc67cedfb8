//! # HandlerLifecycleManager：阶段编排
//!
//! ## 意图（Why）
//! - 把系统默认、租户、系统扩展、用户扩展、报告、提交、回滚七个阶段组合成一次操作的完整
//!   执行序列，并定义阶段之间“结果覆盖”与“完成状态合并”的规则。
//!
//! ## 解析逻辑（How）
//! 1. 执行 `default`，记录结果与完成标记；
//! 2. 未完成时执行 `tenant`，非空结果覆盖累积结果，完成标记以本阶段为准重新计算；
//! 3. 仍未完成时执行 `system`，规则同上；
//! 4. 复位闩锁后执行 `user`，再把其完成标记或入累积状态；
//! 5. 闩锁设为累积值后执行 `reporting`（始终走完），或入完成标记，返回前四步留下的结果；
//! 6. `commit`/`rollback` 只由事务边界在最外层触发。
//!
//! ## 契约（What）
//! - `tenant` 与 `user` 阶段按调用方租户隔离，子调度表在首次注册或调用时惰性创建；
//! - 未知或缺省的阶段名回落到 `default` 并输出 warn 日志。

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    context::{Outcome, RequestContext},
    error::Result,
    filter::Filter,
    handler::Handler,
    manager::HandlerManager,
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag},
    operation::{MethodSet, OperationKind},
    scope::TenantId,
};

/// 生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Default,
    Tenant,
    System,
    User,
    Reporting,
    Commit,
    Rollback,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 7] = [
        Self::Default,
        Self::Tenant,
        Self::System,
        Self::User,
        Self::Reporting,
        Self::Commit,
        Self::Rollback,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Tenant => "tenant",
            Self::System => "system",
            Self::User => "user",
            Self::Reporting => "reporting",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }

    /// 报告、提交与回滚阶段总是执行全部 Handler。
    pub const fn evaluates_all(self) -> bool {
        matches!(self, Self::Reporting | Self::Commit | Self::Rollback)
    }

    /// 解析阶段名，缺省或无法识别时回落到 `default`。
    pub fn resolve(name: Option<&str>) -> Self {
        let Some(name) = name else {
            warn!("handler registered without a lifecycle phase, using `default`");
            return Self::Default;
        };
        match Self::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(name.trim()))
        {
            Some(phase) => phase,
            None => {
                warn!(phase = name, "unknown lifecycle phase, using `default`");
                Self::Default
            }
        }
    }
}

impl core::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按租户分区的调度表。
#[derive(Debug)]
pub struct UserDefinedHandlerManager {
    phase: &'static str,
    tenants: DashMap<TenantId, Arc<HandlerManager>>,
}

impl UserDefinedHandlerManager {
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            tenants: DashMap::new(),
        }
    }

    /// 租户的子调度表，不存在时创建。
    pub fn for_tenant(&self, tenant: TenantId) -> Arc<HandlerManager> {
        Arc::clone(
            self.tenants
                .entry(tenant)
                .or_insert_with(|| Arc::new(HandlerManager::new(self.phase, false)))
                .value(),
        )
    }

    /// 已创建子调度表的租户数。
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    fn execute(&self, kind: OperationKind, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        // 先克隆出子表再执行，避免在分片锁内运行 Handler。
        let manager = self.for_tenant(ctx.scope().tenant());
        manager.execute(kind, ctx)
    }
}

/// 阶段编排器。
#[derive(Debug)]
pub struct HandlerLifecycleManager {
    default: HandlerManager,
    tenant: UserDefinedHandlerManager,
    system: HandlerManager,
    user: UserDefinedHandlerManager,
    reporting: HandlerManager,
    commit: HandlerManager,
    rollback: HandlerManager,
}

impl Default for HandlerLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerLifecycleManager {
    pub fn new() -> Self {
        let phase = |phase: LifecyclePhase| HandlerManager::new(phase.as_str(), phase.evaluates_all());
        Self {
            default: phase(LifecyclePhase::Default),
            tenant: UserDefinedHandlerManager::new(LifecyclePhase::Tenant.as_str()),
            system: phase(LifecyclePhase::System),
            user: UserDefinedHandlerManager::new(LifecyclePhase::User.as_str()),
            reporting: phase(LifecyclePhase::Reporting),
            commit: phase(LifecyclePhase::Commit),
            rollback: phase(LifecyclePhase::Rollback),
        }
    }

    fn fixed(&self, phase: LifecyclePhase) -> &HandlerManager {
        match phase {
            LifecyclePhase::System => &self.system,
            LifecyclePhase::Reporting => &self.reporting,
            LifecyclePhase::Commit => &self.commit,
            LifecyclePhase::Rollback => &self.rollback,
            LifecyclePhase::Default | LifecyclePhase::Tenant | LifecyclePhase::User => {
                &self.default
            }
        }
    }

    fn with_manager<R>(
        &self,
        phase: LifecyclePhase,
        tenant: TenantId,
        apply: impl FnOnce(&HandlerManager) -> R,
    ) -> R {
        match phase {
            LifecyclePhase::Tenant => apply(self.tenant.for_tenant(tenant).as_ref()),
            LifecyclePhase::User => apply(self.user.for_tenant(tenant).as_ref()),
            _ => apply(self.fixed(phase)),
        }
    }

    /// 在阶段中注册绑定；租户分区阶段使用超级租户。
    pub fn add_handler(
        &self,
        phase: LifecyclePhase,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        self.add_handler_for_tenant(TenantId::SUPER, phase, methods, filter, handler);
    }

    pub fn add_handler_for_tenant(
        &self,
        tenant: TenantId,
        phase: LifecyclePhase,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        self.with_manager(phase, tenant, |manager| {
            manager.add_handler(methods, filter, handler)
        });
    }

    pub fn add_handler_with_priority(
        &self,
        phase: LifecyclePhase,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        self.with_manager(phase, TenantId::SUPER, |manager| {
            manager.add_handler_with_priority(methods, filter, handler)
        });
    }

    pub fn remove_handler(&self, phase: LifecyclePhase, handler: &Arc<dyn Handler>) -> bool {
        self.remove_handler_for_tenant(TenantId::SUPER, phase, handler)
    }

    pub fn remove_handler_for_tenant(
        &self,
        tenant: TenantId,
        phase: LifecyclePhase,
        handler: &Arc<dyn Handler>,
    ) -> bool {
        self.with_manager(phase, tenant, |manager| manager.remove_handler(handler))
    }

    /// 阶段中当前注册的 Handler。
    pub fn handlers(&self, phase: LifecyclePhase) -> Vec<Arc<dyn Handler>> {
        self.with_manager(phase, TenantId::SUPER, HandlerManager::handlers)
    }

    /// 按阶段协议执行一次操作。
    pub fn execute(&self, kind: OperationKind, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        let mut result = self.default.execute(kind, ctx)?;
        let mut complete = ctx.is_processing_complete();

        if !complete {
            let tenant = self.tenant.execute(kind, ctx)?;
            result = overlay(result, tenant);
            complete = ctx.is_processing_complete();
        }
        if !complete {
            let system = self.system.execute(kind, ctx)?;
            result = overlay(result, system);
            complete = ctx.is_processing_complete();
        }

        ctx.set_processing_complete(false);
        let user = self.user.execute(kind, ctx)?;
        result = overlay(result, user);
        complete |= ctx.is_processing_complete();

        ctx.set_processing_complete(complete);
        self.reporting.execute(kind, ctx)?;
        complete |= ctx.is_processing_complete();
        ctx.set_processing_complete(complete);

        Ok(result)
    }

    /// 事务提交后执行 `commit` 阶段；失败只记录日志。
    pub fn run_commit(&self, kind: OperationKind, ctx: &mut RequestContext) {
        if let Err(err) = self.commit.execute(kind, ctx) {
            warn!(%kind, error = %err, "commit phase handler failed");
        }
    }

    /// 事务回滚后执行 `rollback` 阶段；失败只记录日志。
    pub fn run_rollback(&self, kind: OperationKind, ctx: &mut RequestContext) {
        if let Err(err) = self.rollback.execute(kind, ctx) {
            warn!(%kind, error = %err, "rollback phase handler failed");
        }
    }
}

/// 非空结果覆盖累积结果；存在性结果取或。
fn overlay(accumulated: Option<Outcome>, next: Option<Outcome>) -> Option<Outcome> {
    match (accumulated, next) {
        (Some(Outcome::Exists(previous)), Some(Outcome::Exists(next))) => {
            Some(Outcome::Exists(previous || next))
        }
        (accumulated, None) => accumulated,
        (_, next) => next,
    }
}

macro_rules! value_entry_points {
    ($($(#[$meta:meta])* $name:ident => $kind:ident, $accessor:ident -> $ty:ty;)*) => {
        impl HandlerLifecycleManager {
            $(
                $(#[$meta])*
                pub fn $name(&self, ctx: &mut RequestContext) -> Result<Option<$ty>> {
                    Ok(self
                        .execute(OperationKind::$kind, ctx)?
                        .and_then(Outcome::$accessor))
                }
            )*
        }
    };
}

macro_rules! void_entry_points {
    ($($name:ident => $kind:ident;)*) => {
        impl HandlerLifecycleManager {
            $(
                pub fn $name(&self, ctx: &mut RequestContext) -> Result<()> {
                    self.execute(OperationKind::$kind, ctx).map(|_| ())
                }
            )*
        }
    };
}

value_entry_points! {
    /// `GET` 的类型化入口。
    get => Get, into_resource -> Resource;
    put => Put, into_path -> String;
    move_resource => Move, into_path -> String;
    copy => Copy, into_path -> String;
    rename => Rename, into_path -> String;
    import_resource => Import, into_path -> String;
    get_versions => GetVersions, into_paths -> Vec<String>;
    execute_query => ExecuteQuery, into_collection -> Collection;
    search_content => SearchContent, into_collection -> Collection;
    get_associations => GetAssociations, into_associations -> Vec<Association>;
    get_all_associations => GetAllAssociations, into_associations -> Vec<Association>;
    get_tags => GetTags, into_tags -> Vec<Tag>;
    add_comment => AddComment, into_path -> String;
    get_comments => GetComments, into_comments -> Vec<Comment>;
    get_rating => GetRating, into_rating -> u8;
    get_average_rating => GetAverageRating, into_average_rating -> f32;
    get_registry_context => GetRegistryContext, into_context -> RegistryContextInfo;
}

void_entry_points! {
    delete => Delete;
    put_child => PutChild;
    import_child => ImportChild;
    create_link => CreateLink;
    remove_link => RemoveLink;
    create_version => CreateVersion;
    restore_version => RestoreVersion;
    add_association => AddAssociation;
    remove_association => RemoveAssociation;
    apply_tag => ApplyTag;
    remove_tag => RemoveTag;
    edit_comment => EditComment;
    remove_comment => RemoveComment;
    rate_resource => RateResource;
    dump => Dump;
    restore => Restore;
    invoke_aspect => InvokeAspect;
}

impl HandlerLifecycleManager {
    /// `RESOURCE_EXISTS` 的类型化入口：任一阶段报告存在即为真。
    pub fn resource_exists(&self, ctx: &mut RequestContext) -> Result<bool> {
        Ok(self
            .execute(OperationKind::ResourceExists, ctx)?
            .and_then(Outcome::into_exists)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_resolve_with_fallback() {
        assert_eq!(LifecyclePhase::resolve(Some("Reporting")), LifecyclePhase::Reporting);
        assert_eq!(LifecyclePhase::resolve(Some("nonsense")), LifecyclePhase::Default);
        assert_eq!(LifecyclePhase::resolve(None), LifecyclePhase::Default);
    }

    #[test]
    fn tenant_partitions_are_created_lazily() {
        let manager = UserDefinedHandlerManager::new("user");
        assert_eq!(manager.tenant_count(), 0);
        let first = manager.for_tenant(TenantId(7));
        let again = manager.for_tenant(TenantId(7));
        assert!(Arc::ptr_eq(&first, &again));
        manager.for_tenant(TenantId::SUPER);
        assert_eq!(manager.tenant_count(), 2);
    }

    #[test]
    fn exists_overlay_is_disjunctive() {
        assert_eq!(
            overlay(Some(Outcome::Exists(true)), Some(Outcome::Exists(false))),
            Some(Outcome::Exists(true))
        );
        assert_eq!(overlay(Some(Outcome::Path("/a".into())), None), Some(Outcome::Path("/a".into())));
    }
}
