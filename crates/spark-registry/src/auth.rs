//! 授权协作方契约。
//!
//! 调度内核本身不做授权判断；仓库门面在构建请求上下文之前按 `(路径, 动作, 身份)` 询问
//! [`Authorizer`]，拒绝时返回 [`RegistryError::Unauthorized`](crate::RegistryError::Unauthorized)。

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;

/// 授权动作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
    Authorize,
}

impl Action {
    /// 操作类型对应的授权动作。
    pub const fn for_operation(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Delete | OperationKind::RemoveLink => Self::Delete,
            OperationKind::CreateLink | OperationKind::InvokeAspect => Self::Authorize,
            kind if kind.is_write() => Self::Write,
            _ => Self::Read,
        }
    }

    /// 搬移类操作对源路径要求的动作：复制只读取源，移动与重命名会删除源。
    pub const fn for_relocation_source(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Copy => Self::Read,
            _ => Self::Delete,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Authorize => "authorize",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 授权判断接口。
///
/// - **契约 (What)**：`identity` 为 `None` 表示匿名调用；实现必须无副作用且可并发调用。
pub trait Authorizer: Send + Sync + 'static {
    fn is_authorized(&self, path: &str, action: Action, identity: Option<&str>) -> bool;
}

/// 允许一切请求的默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_authorized(&self, _path: &str, _action: Action, _identity: Option<&str>) -> bool {
        true
    }
}

impl<F> Authorizer for F
where
    F: Fn(&str, Action, Option<&str>) -> bool + Send + Sync + 'static,
{
    fn is_authorized(&self, path: &str, action: Action, identity: Option<&str>) -> bool {
        self(path, action, identity)
    }
}
