//! 按名称登记的 Handler 工厂目录，配置文件中的 `[[handler]]` 通过名称引用这里的条目。

use std::{collections::BTreeMap, sync::Arc};

use crate::{error::ConfigError, handler::Handler};

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// Handler 工厂目录。
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    factories: BTreeMap<String, HandlerFactory>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记工厂；同名条目被替换。
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// 构建器风格的 [`HandlerCatalog::register`]。
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// 以名称创建一个新的 Handler 实例。
    pub fn create(&self, name: &str) -> Result<Arc<dyn Handler>, ConfigError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownHandler {
                name: name.to_owned(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl core::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
