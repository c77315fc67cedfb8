//! # spark-registry
//!
//! ## 意图（Why）
//! - 分层、版本化的资源仓库：资源以 `/` 分隔的绝对路径寻址，写入、读取、搬移、版本、标签、
//!   评论、评分与关联等操作都先经过可插拔的 Handler 链，再回落到存储；
//! - 通过符号链接与远端挂载，把同实例的另一棵子树或另一个仓库实例的子树嫁接到本地命名空间。
//!
//! ## 结构（How）
//! - [`HandlerManager`]：单一阶段的绑定表，`ArcSwap` 写时复制，读路径不加锁；
//! - [`HandlerLifecycleManager`]：按 `default → tenant → system → user → reporting` 协议编排各阶段，
//!   事务提交或回滚后执行 `commit`/`rollback` 阶段；
//! - [`Registry`]：门面，负责路径规范化、授权、事务边界与存储回落；
//! - [`MountHandler`] 与 [`SymLinkHandler`]：链接 Handler，借助 [`CallScope`] 的改写栈与重入键
//!   完成路径翻译并保证链接环路终止。
//!
//! ## 契约（What）
//! - 调用级状态全部保存在显式传递的 [`CallScope`] 中，库内没有线程局部变量；
//! - 日志统一经 `tracing` 输出，[`observability::install_subscriber`] 提供默认的 `fmt` 订阅器。

pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod handler;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod model;
pub mod mount;
pub mod observability;
pub mod operation;
pub mod path;
pub mod registry;
pub mod scope;
pub mod simulation;
pub mod store;

pub use audit::{AuditHandler, AuditRecord, AuditRecorder, InMemoryAuditRecorder};
pub use auth::{Action, AllowAll, Authorizer};
pub use catalog::HandlerCatalog;
pub use config::{
    FilterSpec, HandlerConfig, MountConfig, OverwritePolicy, RegistryConfig, RegistrySettings,
};
pub use context::{ExecutionStatus, HandlerExecution, Operation, Outcome, RequestContext};
pub use error::{ConfigError, RegistryError, Result};
pub use filter::{AnyFilter, Filter, MediaTypeMatcher, MountFilter, UrlMatcher};
pub use handler::{Handler, MountProvider};
pub use instance::{InstanceConnector, InstanceRegistry, RegistryInstance, RemoteInstanceConfig};
pub use lifecycle::{HandlerLifecycleManager, LifecyclePhase};
pub use manager::HandlerManager;
pub use model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag, properties};
pub use mount::{LinkTarget, MountEntry, MountHandler, SymLinkHandler, SymLinkRegistry};
pub use operation::{MethodSet, OperationKind};
pub use registry::{Registry, RegistryBuilder};
pub use scope::{CallScope, CallScopeBuilder, ExecutionKey, TenantId};
pub use simulation::SimulationReport;
pub use store::{InMemoryStore, ResourceStore, TransactionBoundary};
