//! # CallScope：显式传递的调用作用域
//!
//! ## 角色定位（What）
//! - 一次顶层仓库调用及其全部嵌套重定向共享同一个 [`CallScope`]：租户、身份、模拟标记、
//!   挂载重入集合、远端→本地路径改写栈以及联邦查询去重集合都保存在这里；
//! - 作用域随 [`RequestContext`](crate::context::RequestContext) 传入每个 Handler，挂载
//!   Handler 再把同一作用域交给目标实例，因此递归调度不依赖线程局部变量。
//!
//! ## 释放纪律（How）
//! - 所有压栈操作都返回 RAII 守卫（[`ExecutionGuard`]、[`RewriteGuard`]、[`TransactionGuard`]），
//!   在 `Drop` 中出栈；无论正常返回、`?` 提前返回还是 panic 展开都会执行。

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

use crate::path;

/// 租户标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(pub i32);

impl TenantId {
    /// 超级租户。
    pub const SUPER: TenantId = TenantId(-1234);
}

impl Default for TenantId {
    fn default() -> Self {
        Self::SUPER
    }
}

/// 重入守卫的键，按 (实例, 链接类型, 挂载点) 区分。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    pub instance: String,
    pub kind: &'static str,
    pub mount_point: String,
}

/// 远端→本地路径改写帧。
#[derive(Clone, Debug, PartialEq, Eq)]
struct RewriteFrame {
    remote_root: String,
    local_root: String,
}

#[derive(Debug, Default)]
struct ScopeFrames {
    executing: HashSet<ExecutionKey>,
    rewrites: Vec<RewriteFrame>,
    queried: HashSet<(String, String)>,
    transactions: Vec<String>,
}

#[derive(Debug)]
struct ScopeState {
    tenant: TenantId,
    identity: Option<String>,
    simulation: bool,
    frames: Mutex<ScopeFrames>,
}

/// 调用作用域，克隆后共享同一份状态。
#[derive(Clone, Debug)]
pub struct CallScope {
    state: Arc<ScopeState>,
}

impl Default for CallScope {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CallScope {
    pub fn builder() -> CallScopeBuilder {
        CallScopeBuilder::default()
    }

    pub fn tenant(&self) -> TenantId {
        self.state.tenant
    }

    pub fn identity(&self) -> Option<&str> {
        self.state.identity.as_deref()
    }

    /// 是否处于模拟模式。
    pub fn is_simulation(&self) -> bool {
        self.state.simulation
    }

    /// 尝试进入重入保护区；同键已在执行时返回 `None`。
    pub fn enter(&self, key: ExecutionKey) -> Option<ExecutionGuard> {
        let mut frames = self.state.frames.lock();
        if !frames.executing.insert(key.clone()) {
            return None;
        }
        Some(ExecutionGuard {
            scope: self.clone(),
            key,
        })
    }

    /// 压入一帧 `远端根 → 本地根` 的路径改写规则。
    pub fn push_rewrite(
        &self,
        remote_root: impl Into<String>,
        local_root: impl Into<String>,
    ) -> RewriteGuard {
        let mut frames = self.state.frames.lock();
        frames.rewrites.push(RewriteFrame {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
        });
        RewriteGuard {
            scope: self.clone(),
            depth: frames.rewrites.len(),
        }
    }

    /// 当前改写栈深度。
    pub fn rewrite_depth(&self) -> usize {
        self.state.frames.lock().rewrites.len()
    }

    /// 按改写栈由内向外把目标侧路径翻译为最外层调用方的命名空间。
    ///
    /// 不落在某帧远端根之下的路径在该帧保持不变。
    pub fn to_local_path(&self, remote: &str) -> String {
        let frames = self.state.frames.lock();
        frames
            .rewrites
            .iter()
            .rev()
            .fold(remote.to_owned(), |current, frame| {
                path::rebase(&current, &frame.remote_root, &frame.local_root).unwrap_or(current)
            })
    }

    /// 登记一次联邦查询，已登记过的 `(实例, 挂载点)` 返回 `false`。
    pub fn mark_queried(&self, instance_id: &str, mount_point: &str) -> bool {
        self.state
            .frames
            .lock()
            .queried
            .insert((instance_id.to_owned(), mount_point.to_owned()))
    }

    /// 在指定实例上开启一层事务帧，返回的守卫报告是否为最外层。
    pub fn enter_transaction(&self, instance_id: &str) -> TransactionGuard {
        let mut frames = self.state.frames.lock();
        let outermost = !frames.transactions.iter().any(|id| id == instance_id);
        frames.transactions.push(instance_id.to_owned());
        TransactionGuard {
            scope: self.clone(),
            instance_id: instance_id.to_owned(),
            outermost,
        }
    }
}

/// [`CallScope`] 构建器。
#[derive(Debug, Default)]
pub struct CallScopeBuilder {
    tenant: TenantId,
    identity: Option<String>,
    simulation: bool,
}

impl CallScopeBuilder {
    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn simulation(mut self, simulation: bool) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn build(self) -> CallScope {
        CallScope {
            state: Arc::new(ScopeState {
                tenant: self.tenant,
                identity: self.identity,
                simulation: self.simulation,
                frames: Mutex::new(ScopeFrames::default()),
            }),
        }
    }
}

/// 重入保护守卫，释放时移除执行键。
#[derive(Debug)]
pub struct ExecutionGuard {
    scope: CallScope,
    key: ExecutionKey,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.scope.state.frames.lock().executing.remove(&self.key);
    }
}

/// 路径改写守卫，释放时截断改写栈到入栈前的深度。
#[derive(Debug)]
pub struct RewriteGuard {
    scope: CallScope,
    depth: usize,
}

impl Drop for RewriteGuard {
    fn drop(&mut self) {
        let mut frames = self.scope.state.frames.lock();
        frames.rewrites.truncate(self.depth.saturating_sub(1));
    }
}

/// 事务帧守卫。
#[derive(Debug)]
pub struct TransactionGuard {
    scope: CallScope,
    instance_id: String,
    outermost: bool,
}

impl TransactionGuard {
    /// 是否为该实例在本作用域内的最外层事务。
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let mut frames = self.scope.state.frames.lock();
        if let Some(position) = frames
            .transactions
            .iter()
            .rposition(|id| *id == self.instance_id)
        {
            frames.transactions.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(mount_point: &str) -> ExecutionKey {
        ExecutionKey {
            instance: "local".to_owned(),
            kind: "mount",
            mount_point: mount_point.to_owned(),
        }
    }

    #[test]
    fn execution_guard_blocks_reentry_until_dropped() {
        let scope = CallScope::default();
        let guard = scope.enter(key("/a")).expect("首次进入应成功");
        assert!(scope.enter(key("/a")).is_none(), "同键重入必须被拒绝");
        assert!(scope.enter(key("/b")).is_some(), "不同挂载点互不影响");
        drop(guard);
        assert!(scope.enter(key("/a")).is_some(), "守卫释放后可再次进入");
    }

    #[test]
    fn rewrite_frames_translate_innermost_first() {
        let scope = CallScope::default();
        let outer = scope.push_rewrite("/services", "/apps/remote");
        let inner = scope.push_rewrite("/deep", "/services/nested");
        assert_eq!(scope.to_local_path("/deep/x"), "/apps/remote/nested/x");
        drop(inner);
        assert_eq!(scope.to_local_path("/deep/x"), "/deep/x");
        assert_eq!(scope.to_local_path("/services/y"), "/apps/remote/y");
        drop(outer);
        assert_eq!(scope.rewrite_depth(), 0);
    }

    #[test]
    fn transaction_frames_report_outermost_per_instance() {
        let scope = CallScope::default();
        let local = scope.enter_transaction("local");
        let remote = scope.enter_transaction("remote");
        let nested = scope.enter_transaction("local");
        assert!(local.is_outermost());
        assert!(remote.is_outermost());
        assert!(!nested.is_outermost());
    }

    #[test]
    fn federated_query_keys_do_not_alias() {
        let scope = CallScope::default();
        assert!(scope.mark_queried("ab", "/c"));
        assert!(scope.mark_queried("a", "b/c"));
        assert!(!scope.mark_queried("ab", "/c"));
    }
}
