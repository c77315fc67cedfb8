//! 日志订阅器安装。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主进程只需调用一次 [`install_subscriber`] 即可看到仓库调度、链接生命周期
//!   与降级路径的结构化日志；
//! - **逻辑（How）**：`tracing-subscriber` 组装 `EnvFilter + fmt` 两层并设为全局默认，过滤规则取自
//!   `RUST_LOG`，缺省为 `info`；
//! - **契约（What）**：重复调用返回 [`InstallError::AlreadyInstalled`]；外部已设置全局订阅器时返回
//!   [`InstallError::SubscriberAlreadySet`]，不会覆盖。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 订阅器安装失败。
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("registry subscriber is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber has already been set")]
    SubscriberAlreadySet,
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// 安装全局日志订阅器。
pub fn install_subscriber() -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let first = install_subscriber();
        assert!(
            matches!(first, Ok(()) | Err(InstallError::SubscriberAlreadySet)),
            "首次安装要么成功，要么发现外部订阅器: {first:?}"
        );
        assert!(install_subscriber().is_err(), "重复安装必须失败");
    }
}
