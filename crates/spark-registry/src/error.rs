//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 仓库对外只暴露一种错误类型 [`RegistryError`]，无论失败发生在哪个阶段、哪个 Handler，
//!   调用方在顶层看到的都是同一枚举，原始原因保存在 `source` 链中；
//! - 配置加载失败单独归档为 [`ConfigError`]，通过 `From` 汇入 `RegistryError`。
//!
//! ## 分类（What）
//! - 请求类错误：`NotFound`、`InvalidPath`、`Unauthorized`、`ReadOnly`，直接返回调用方，不重试；
//! - 链路错误：`Handler`，由调度内核在捕获 panic 时包装，消息带固定前缀；
//! - 致命错误：`Fatal`，即使处于模拟模式也会被重新抛出；
//! - 协作方错误：`Storage`、`Unavailable`、`Serialization`、`Io`。

use thiserror::Error;

use crate::auth::Action;

/// 包装未受检失败时使用的消息前缀。
pub const HANDLER_CHAIN_FAILURE_PREFIX: &str =
    "An exception occurred while executing handler chain. ";

/// 仓库统一结果别名。
pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

/// 仓库核心错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可跨线程传播；
///   - [`RegistryError::is_fatal`] 为真时，调度内核会绕过模拟模式的吞错逻辑；
///   - `Handler` 变体的 `source` 保留被包装的原始错误（若存在）。
/// - **执行逻辑 (How)**：每个变体都携带可读上下文（路径、实例、动作），`Display` 由
///   `thiserror` 派生。
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 目标资源不存在。
    #[error("resource `{path}` does not exist")]
    NotFound { path: String },

    /// 路径格式非法，例如相对路径或包含 `..` 片段。
    #[error("invalid registry path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// 授权协作方拒绝了该请求。
    #[error("access denied: `{action}` on `{path}`")]
    Unauthorized { path: String, action: Action },

    /// 目标实例以只读方式挂载。
    #[error("registry instance `{instance}` is read-only")]
    ReadOnly { instance: String },

    /// Handler 链路失败的包装形态。
    #[error("{message}")]
    Handler {
        message: String,
        #[source]
        source: Option<Box<RegistryError>>,
    },

    /// 不可恢复的失败，任何模式下都不会被吞掉。
    #[error("fatal registry failure: {detail}")]
    Fatal { detail: String },

    /// 存储协作方失败。
    #[error("storage failure: {detail}")]
    Storage { detail: String },

    /// 远端实例无法连接。
    #[error("registry instance `{instance}` is unavailable: {detail}")]
    Unavailable { instance: String, detail: String },

    /// Filter 模式编译失败。
    #[error("invalid filter pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// 配置错误。
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 子树导出格式的编解码失败。
    #[error("dump serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 导出写入或导入读取失败。
    #[error("dump stream failure: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// 构造 `NotFound`。
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// 构造 `InvalidPath`。
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 构造 `Storage`。
    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
        }
    }

    /// 构造 `Fatal`。
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal {
            detail: detail.into(),
        }
    }

    /// 将 Handler 内部的 panic 载荷包装为链路错误。
    ///
    /// - **契约 (What)**：消息以 [`HANDLER_CHAIN_FAILURE_PREFIX`] 开头，后接原始描述。
    pub fn handler_panic(detail: &str) -> Self {
        Self::Handler {
            message: format!("{HANDLER_CHAIN_FAILURE_PREFIX}{detail}"),
            source: None,
        }
    }

    /// 以前缀包装已有错误，原始错误保留在 `source` 中。
    pub fn wrap(self, context: &str) -> Self {
        Self::Handler {
            message: format!("{context}{self}"),
            source: Some(Box::new(self)),
        }
    }

    /// 是否属于致命错误。
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Fatal { .. } => true,
            Self::Handler {
                source: Some(inner),
                ..
            } => inner.is_fatal(),
            _ => false,
        }
    }
}

/// 配置加载阶段的错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析。
    #[error("registry configuration is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// 配置引用了目录中不存在的 Handler。
    #[error("handler `{name}` is not present in the handler catalog")]
    UnknownHandler { name: String },

    /// 方法名无法映射为操作类型。
    #[error("unknown operation kind `{name}`")]
    UnknownOperation { name: String },

    /// 挂载声明引用了未定义的远端实例。
    #[error("mount `{path}` references undeclared instance `{instance}`")]
    UnknownInstance { path: String, instance: String },

    /// 同一实例 ID 被重复声明。
    #[error("remote instance `{id}` is declared more than once")]
    DuplicateInstance { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_fatal_stays_fatal() {
        let wrapped = RegistryError::fatal("disk gone").wrap("put failed: ");
        assert!(wrapped.is_fatal(), "包装后的致命错误仍需识别为致命");
        assert_eq!(wrapped.to_string(), "put failed: fatal registry failure: disk gone");
    }

    #[test]
    fn panic_wrapping_keeps_prefix() {
        let error = RegistryError::handler_panic("boom");
        assert!(error.to_string().starts_with(HANDLER_CHAIN_FAILURE_PREFIX));
        assert!(error.to_string().ends_with("boom"));
        assert!(!error.is_fatal());
    }
}
