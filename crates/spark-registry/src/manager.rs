//! # HandlerManager：单阶段调度表
//!
//! ## 意图（Why）
//! - 每个生命周期阶段持有一个 [`HandlerManager`]，按操作类型维护 `(Filter → 有序 Handler 集合)`
//!   绑定，并按插入顺序执行匹配的 Handler；
//! - 注册与移除可能与在途调度并发发生，调度必须始终看到一致的快照。
//!
//! ## 解析逻辑（How）
//! - 调度表存放在 [`ArcSwap`] 中，读路径 `load_full` 获得不可变快照后无锁遍历；
//! - 所有变更在 `mutation` 互斥锁内克隆当前表、修改副本、整体替换（copy-on-write），
//!   并递增纪元计数；
//! - 同一操作类型下 [`FilterKey`] 相等的绑定合并为一个，Handler 集合以指针去重。
//!
//! ## 契约（What）
//! - 在途调度不会看到其开始之后注册的 Handler，移除也不会打断正在遍历的快照；
//! - `execute` 的停止条件：闩锁已置位且（模拟模式或本阶段未开启 `evaluate_all`）。
//!
//! ## 风险与权衡（Trade-offs）
//! - 每次变更复制整张表，注册频率远低于调度频率，复制成本可接受。

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{
    context::{ExecutionStatus, Outcome, RequestContext, handler_id},
    error::{RegistryError, Result},
    filter::{Filter, FilterKey},
    handler::Handler,
    operation::{MethodSet, OperationKind},
};

/// 一个 Filter 及其绑定的有序 Handler 集合。
struct Binding {
    key: FilterKey,
    filter: Arc<dyn Filter>,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Binding {
    fn contains(&self, handler: &Arc<dyn Handler>) -> bool {
        let id = handler_id(handler);
        self.handlers.iter().any(|existing| handler_id(existing) == id)
    }
}

/// 按操作类型索引的绑定列表快照。
#[derive(Clone)]
struct DispatchTable {
    by_kind: Vec<Vec<Arc<Binding>>>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self {
            by_kind: vec![Vec::new(); OperationKind::ALL.len()],
        }
    }
}

impl DispatchTable {
    fn bindings(&self, kind: OperationKind) -> &[Arc<Binding>] {
        &self.by_kind[kind.index()]
    }
}

/// 绑定的只读描述，供诊断与测试观察调度表结构。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingSnapshot {
    pub key: FilterKey,
    pub handlers: Vec<String>,
}

/// 单阶段调度表。
///
/// # 教案式说明
/// - **意图（Why）**：作为生命周期阶段的执行单元，隔离“注册”与“调度”两条路径；
/// - **契约（What）**：
///   - `add_handler(None, ..)` 覆盖全部操作类型；
///   - 同一 Handler 对同一 Filter 键重复注册只保留一份；
///   - `remove_handler` 幂等，返回本次是否真正移除了绑定。
pub struct HandlerManager {
    phase: &'static str,
    evaluate_all: bool,
    table: ArcSwap<DispatchTable>,
    mutation: Mutex<()>,
    epoch: AtomicU64,
}

impl HandlerManager {
    /// 创建空调度表；`evaluate_all` 为真时闩锁置位后仍继续执行剩余 Handler。
    pub fn new(phase: &'static str, evaluate_all: bool) -> Self {
        Self {
            phase,
            evaluate_all,
            table: ArcSwap::from_pointee(DispatchTable::default()),
            mutation: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }

    pub fn evaluates_all(&self) -> bool {
        self.evaluate_all
    }

    /// 变更纪元，每次提交新表递增。
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// 注册绑定，追加到既有同键绑定之后。
    pub fn add_handler(
        &self,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        let _guard = self.mutation.lock();
        let key = filter.key();
        let mut table = DispatchTable::clone(&self.table.load());
        for kind in MethodSet::or_all(methods).iter() {
            let bindings = &mut table.by_kind[kind.index()];
            match bindings.iter().position(|binding| binding.key == key) {
                Some(index) if bindings[index].contains(&handler) => {}
                Some(index) => {
                    let existing = &bindings[index];
                    let mut handlers = existing.handlers.clone();
                    handlers.push(Arc::clone(&handler));
                    bindings[index] = Arc::new(Binding {
                        key: existing.key.clone(),
                        filter: Arc::clone(&existing.filter),
                        handlers,
                    });
                }
                None => bindings.push(Arc::new(Binding {
                    key: key.clone(),
                    filter: Arc::clone(&filter),
                    handlers: vec![Arc::clone(&handler)],
                })),
            }
        }
        self.commit(table, "add", handler.describe());
    }

    /// 以最高优先级注册绑定。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：对每个受影响的操作类型重建绑定列表：新绑定放在首位，随后按原顺序
    ///   追加旧绑定；与新绑定同键的旧 Handler 合并到新 Handler 之后。
    pub fn add_handler_with_priority(
        &self,
        methods: Option<MethodSet>,
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) {
        let _guard = self.mutation.lock();
        let key = filter.key();
        let id = handler_id(&handler);
        let mut table = DispatchTable::clone(&self.table.load());
        for kind in MethodSet::or_all(methods).iter() {
            let previous = std::mem::take(&mut table.by_kind[kind.index()]);
            let mut handlers = vec![Arc::clone(&handler)];
            let mut rebuilt = Vec::with_capacity(previous.len() + 1);
            for binding in previous {
                if binding.key == key {
                    handlers.extend(
                        binding
                            .handlers
                            .iter()
                            .filter(|existing| handler_id(existing) != id)
                            .cloned(),
                    );
                } else {
                    rebuilt.push(binding);
                }
            }
            rebuilt.insert(
                0,
                Arc::new(Binding {
                    key: key.clone(),
                    filter: Arc::clone(&filter),
                    handlers,
                }),
            );
            table.by_kind[kind.index()] = rebuilt;
        }
        self.commit(table, "add_with_priority", handler.describe());
    }

    /// 从全部操作类型中移除 Handler，清空后的绑定一并删除。
    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        let _guard = self.mutation.lock();
        let id = handler_id(handler);
        let current = self.table.load_full();
        let mut removed = false;
        let mut table = DispatchTable::default();
        for (index, bindings) in current.by_kind.iter().enumerate() {
            for binding in bindings {
                if !binding.contains(handler) {
                    table.by_kind[index].push(Arc::clone(binding));
                    continue;
                }
                removed = true;
                let handlers: Vec<_> = binding
                    .handlers
                    .iter()
                    .filter(|existing| handler_id(existing) != id)
                    .cloned()
                    .collect();
                if !handlers.is_empty() {
                    table.by_kind[index].push(Arc::new(Binding {
                        key: binding.key.clone(),
                        filter: Arc::clone(&binding.filter),
                        handlers,
                    }));
                }
            }
        }
        if removed {
            self.commit(table, "remove", handler.describe());
        }
        removed
    }

    /// 当前注册的全部 Handler，按首次出现顺序去重。
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        let table = self.table.load();
        let mut seen = Vec::new();
        let mut handlers = Vec::new();
        for binding in table.by_kind.iter().flatten() {
            for handler in &binding.handlers {
                let id = handler_id(handler);
                if !seen.contains(&id) {
                    seen.push(id);
                    handlers.push(Arc::clone(handler));
                }
            }
        }
        handlers
    }

    /// 指定操作类型的绑定结构。
    pub fn bindings(&self, kind: OperationKind) -> Vec<BindingSnapshot> {
        self.table
            .load()
            .bindings(kind)
            .iter()
            .map(|binding| BindingSnapshot {
                key: binding.key.clone(),
                handlers: binding
                    .handlers
                    .iter()
                    .map(|handler| handler.describe().to_owned())
                    .collect(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().by_kind.iter().all(Vec::is_empty)
    }

    fn commit(&self, table: DispatchTable, mutation: &'static str, handler: &str) {
        self.table.store(Arc::new(table));
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            phase = self.phase,
            mutation,
            handler,
            epoch,
            "registry.handler_table mutation applied"
        );
    }

    /// 执行 `kind` 类型的 Handler 链。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：
    ///   1. 取快照，按插入顺序遍历该类型的绑定；Filter 不匹配则跳过；
    ///   2. 依次调用绑定的 Handler，捕获 panic，记录首个执行状态；
    ///   3. 致命错误记录后无条件返回；其余错误在模拟模式下被吞掉并返回空结果；
    ///   4. 每个 Handler 之后检查停止条件；
    ///   5. 合并结果：值类后写覆盖，`RESOURCE_EXISTS` 取或，`EXECUTE_QUERY` 另外累积全部子路径。
    /// - **契约（What）**：返回 `None` 表示本阶段未产生结果。
    pub fn execute(&self, kind: OperationKind, ctx: &mut RequestContext) -> Result<Option<Outcome>> {
        let table = self.table.load_full();
        let bindings = table.bindings(kind);
        if bindings.is_empty() {
            return Ok(None);
        }
        let simulation = ctx.scope().is_simulation();
        let mut merged = Merge::new(kind);

        'bindings: for binding in bindings {
            let matched = match binding.filter.matches(kind, ctx) {
                Ok(matched) => matched,
                Err(err) => return self.fail(kind, simulation, err),
            };
            if !matched {
                continue;
            }
            trace!(phase = self.phase, %kind, filter = ?binding.key, "filter matched");
            for handler in &binding.handlers {
                let invoked = panic::catch_unwind(AssertUnwindSafe(|| {
                    invoke(handler.as_ref(), kind, &mut *ctx)
                }));
                let outcome = match invoked {
                    Ok(Ok(outcome)) => {
                        ctx.record_execution(handler, self.phase, ExecutionStatus::Succeeded);
                        outcome
                    }
                    Ok(Err(err)) => {
                        ctx.record_execution(
                            handler,
                            self.phase,
                            ExecutionStatus::Failed(err.to_string()),
                        );
                        return self.fail(kind, simulation, err);
                    }
                    Err(payload) => {
                        let err = RegistryError::handler_panic(&panic_message(payload.as_ref()));
                        ctx.record_execution(
                            handler,
                            self.phase,
                            ExecutionStatus::Failed(err.to_string()),
                        );
                        return self.fail(kind, simulation, err);
                    }
                };
                merged.absorb(outcome);
                if ctx.is_processing_complete() && (simulation || !self.evaluate_all) {
                    debug!(
                        phase = self.phase,
                        %kind,
                        handler = handler.describe(),
                        "processing complete, chain stopped"
                    );
                    break 'bindings;
                }
            }
        }
        Ok(merged.finish())
    }

    fn fail(
        &self,
        kind: OperationKind,
        simulation: bool,
        err: RegistryError,
    ) -> Result<Option<Outcome>> {
        if err.is_fatal() {
            error!(phase = self.phase, %kind, error = %err, "fatal failure in handler chain");
            return Err(err);
        }
        if simulation {
            debug!(
                phase = self.phase,
                %kind,
                error = %err,
                "handler failure suppressed in simulation mode"
            );
            return Ok(None);
        }
        Err(err)
    }
}

impl core::fmt::Debug for HandlerManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerManager")
            .field("phase", &self.phase)
            .field("evaluate_all", &self.evaluate_all)
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

/// 单阶段内的结果合并器。
struct Merge {
    kind: OperationKind,
    value: Option<Outcome>,
    query_children: Vec<String>,
}

impl Merge {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            value: None,
            query_children: Vec::new(),
        }
    }

    fn absorb(&mut self, outcome: Option<Outcome>) {
        let Some(outcome) = outcome else {
            return;
        };
        if let Outcome::Collection(collection) = &outcome
            && self.kind == OperationKind::ExecuteQuery
        {
            for child in collection.children() {
                if !self.query_children.contains(child) {
                    self.query_children.push(child.clone());
                }
            }
        }
        self.value = Some(match (self.value.take(), outcome) {
            (Some(Outcome::Exists(previous)), Outcome::Exists(next)) => {
                Outcome::Exists(previous || next)
            }
            (_, next) => next,
        });
    }

    fn finish(mut self) -> Option<Outcome> {
        if let Some(Outcome::Collection(collection)) = self.value.as_mut()
            && self.kind == OperationKind::ExecuteQuery
        {
            collection.set_children(self.query_children);
        }
        self.value
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

/// 将操作类型路由到 Handler 的对应方法，并把类型化返回值装入 [`Outcome`]。
fn invoke(
    handler: &dyn Handler,
    kind: OperationKind,
    ctx: &mut RequestContext,
) -> Result<Option<Outcome>> {
    use OperationKind as K;

    fn void(result: Result<()>) -> Result<Option<Outcome>> {
        result.map(|()| None)
    }

    match kind {
        K::Get => Ok(handler.get(ctx)?.map(Outcome::Resource)),
        K::Put => Ok(handler.put(ctx)?.map(Outcome::Path)),
        K::Delete => void(handler.delete(ctx)),
        K::Move => Ok(handler.move_resource(ctx)?.map(Outcome::Path)),
        K::Copy => Ok(handler.copy(ctx)?.map(Outcome::Path)),
        K::Rename => Ok(handler.rename(ctx)?.map(Outcome::Path)),
        K::Import => Ok(handler.import_resource(ctx)?.map(Outcome::Path)),
        K::PutChild => void(handler.put_child(ctx)),
        K::ImportChild => void(handler.import_child(ctx)),
        K::CreateLink => void(handler.create_link(ctx)),
        K::RemoveLink => void(handler.remove_link(ctx)),
        K::CreateVersion => void(handler.create_version(ctx)),
        K::RestoreVersion => void(handler.restore_version(ctx)),
        K::GetVersions => Ok(handler.get_versions(ctx)?.map(Outcome::Paths)),
        K::ExecuteQuery => Ok(handler.execute_query(ctx)?.map(Outcome::Collection)),
        K::SearchContent => Ok(handler.search_content(ctx)?.map(Outcome::Collection)),
        K::ResourceExists => Ok(Some(Outcome::Exists(handler.resource_exists(ctx)?))),
        K::AddAssociation => void(handler.add_association(ctx)),
        K::RemoveAssociation => void(handler.remove_association(ctx)),
        K::GetAssociations => Ok(handler.get_associations(ctx)?.map(Outcome::Associations)),
        K::GetAllAssociations => Ok(handler
            .get_all_associations(ctx)?
            .map(Outcome::Associations)),
        K::ApplyTag => void(handler.apply_tag(ctx)),
        K::GetTags => Ok(handler.get_tags(ctx)?.map(Outcome::Tags)),
        K::RemoveTag => void(handler.remove_tag(ctx)),
        K::AddComment => Ok(handler.add_comment(ctx)?.map(Outcome::Path)),
        K::EditComment => void(handler.edit_comment(ctx)),
        K::RemoveComment => void(handler.remove_comment(ctx)),
        K::GetComments => Ok(handler.get_comments(ctx)?.map(Outcome::Comments)),
        K::RateResource => void(handler.rate_resource(ctx)),
        K::GetRating => Ok(handler.get_rating(ctx)?.map(Outcome::Rating)),
        K::GetAverageRating => Ok(handler.get_average_rating(ctx)?.map(Outcome::AverageRating)),
        K::Dump => void(handler.dump(ctx)),
        K::Restore => void(handler.restore(ctx)),
        K::GetRegistryContext => Ok(handler.get_registry_context(ctx)?.map(Outcome::Context)),
        K::InvokeAspect => void(handler.invoke_aspect(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        context::Operation,
        filter::{AnyFilter, UrlMatcher},
        model::Resource,
        scope::CallScope,
    };

    struct Marker {
        name: &'static str,
        complete: bool,
        calls: AtomicUsize,
    }

    impl Marker {
        fn new(name: &'static str, complete: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                complete,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Handler for Marker {
        fn describe(&self) -> &str {
            self.name
        }

        fn get(&self, ctx: &mut RequestContext) -> Result<Option<Resource>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.complete {
                ctx.set_processing_complete(true);
            }
            Ok(Some(Resource::new().with_description(self.name)))
        }
    }

    fn get_ctx() -> RequestContext {
        RequestContext::new(
            Operation::Get {
                path: "/a".to_owned(),
            },
            CallScope::default(),
        )
    }

    #[test]
    fn latest_non_null_result_wins() {
        let manager = HandlerManager::new("default", false);
        manager.add_handler(None, Arc::new(AnyFilter), Marker::new("first", false));
        manager.add_handler(None, Arc::new(AnyFilter), Marker::new("second", false));
        let outcome = manager.execute(OperationKind::Get, &mut get_ctx()).unwrap();
        let resource = outcome.and_then(Outcome::into_resource).unwrap();
        assert_eq!(resource.description(), Some("second"));
    }

    #[test]
    fn completion_stops_chain_unless_evaluate_all() {
        let first = Marker::new("first", true);
        let second = Marker::new("second", false);
        let manager = HandlerManager::new("default", false);
        manager.add_handler(None, Arc::new(AnyFilter), first.clone());
        manager.add_handler(None, Arc::new(AnyFilter), second.clone());
        manager.execute(OperationKind::Get, &mut get_ctx()).unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 0, "闩锁置位后应停止");

        let reporting = HandlerManager::new("reporting", true);
        reporting.add_handler(None, Arc::new(AnyFilter), first.clone());
        reporting.add_handler(None, Arc::new(AnyFilter), second.clone());
        reporting.execute(OperationKind::Get, &mut get_ctx()).unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 1, "evaluate_all 阶段必须走完");
    }

    #[test]
    fn equal_filters_merge_into_one_binding() {
        let manager = HandlerManager::new("default", false);
        let h1 = Marker::new("h1", false);
        let h2 = Marker::new("h2", false);
        manager.add_handler(None, Arc::new(UrlMatcher::new("/a").unwrap()), h1.clone());
        manager.add_handler(None, Arc::new(UrlMatcher::new("/a").unwrap()), h2.clone());
        manager.add_handler(None, Arc::new(UrlMatcher::new("/a").unwrap()), h2.clone());
        let bindings = manager.bindings(OperationKind::Get);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].handlers, ["h1", "h2"]);
        manager.execute(OperationKind::Get, &mut get_ctx()).unwrap();
        assert_eq!(h2.calls.load(Ordering::SeqCst), 1, "合并后的 Handler 只执行一次");
    }

    #[test]
    fn epoch_advances_only_on_effective_mutation() {
        let manager = HandlerManager::new("default", false);
        let handler: Arc<dyn Handler> = Marker::new("h", false);
        manager.add_handler(None, Arc::new(AnyFilter), handler.clone());
        assert_eq!(manager.epoch(), 1);
        assert!(manager.remove_handler(&handler));
        assert!(!manager.remove_handler(&handler));
        assert_eq!(manager.epoch(), 2);
        assert!(manager.is_empty());
    }
}
