//! # 仓库配置
//!
//! ## 意图（Why）
//! - 实例设置、远端实例、挂载声明与 Handler 注册都可以写在一份 TOML 文件里，启动时一次性
//!   交给 [`Registry::apply_config`](crate::Registry::apply_config)。
//!
//! ## 结构（What）
//! ```toml
//! [registry]
//! instance_id = "local"
//! default_author = "admin"
//!
//! [[remote_instance]]
//! id = "instanceX"
//! root = "/"
//!
//! [[mount]]
//! path = "/apps/remote"
//! instance_id = "instanceX"
//! target_path = "/services"
//! overwrite = "virtual"
//!
//! [[handler]]
//! name = "audit"
//! phase = "reporting"
//! methods = ["PUT", "DELETE"]
//! filter = { kind = "url", pattern = "/apps/.*" }
//! ```
//!
//! ## 校验（How）
//! - 解析后检查远端实例 ID 唯一、挂载引用的实例均已声明；方法名与 Filter 正则在注册时解析。

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    filter::{AnyFilter, Filter, MediaTypeMatcher, UrlMatcher},
    instance::RemoteInstanceConfig,
    operation::{MethodSet, OperationKind},
    path,
};

fn default_instance_id() -> String {
    "local".to_owned()
}

fn default_root() -> String {
    path::ROOT.to_owned()
}

/// 本地实例设置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub instance_id: String,
    pub root: String,
    pub read_only: bool,
    pub cache_enabled: bool,
    /// 启动即进入模拟模式。
    pub simulation: bool,
    /// 写入时资源未指定作者所使用的默认作者，同时作为链接作者。
    pub default_author: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            root: default_root(),
            read_only: false,
            cache_enabled: false,
            simulation: false,
            default_author: None,
        }
    }
}

/// 挂载条目的覆盖策略。
///
/// - `true`：挂载点上已有的资源被删除，挂载条目写入（覆盖旧条目）；
/// - `false`：挂载点上已有资源时跳过该挂载；
/// - `virtual`：仅安装 Handler，不删除已有资源，也不持久化条目。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "OverwriteRepr")]
pub enum OverwritePolicy {
    True,
    #[default]
    False,
    Virtual,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OverwriteRepr {
    Flag(bool),
    Named(String),
}

impl TryFrom<OverwriteRepr> for OverwritePolicy {
    type Error = String;

    fn try_from(repr: OverwriteRepr) -> core::result::Result<Self, Self::Error> {
        match repr {
            OverwriteRepr::Flag(true) => Ok(Self::True),
            OverwriteRepr::Flag(false) => Ok(Self::False),
            OverwriteRepr::Named(name) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok(Self::True),
                "false" => Ok(Self::False),
                "virtual" => Ok(Self::Virtual),
                _ => Err(format!(
                    "overwrite must be true, false or \"virtual\", got `{name}`"
                )),
            },
        }
    }
}

/// `[[mount]]` 声明。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MountConfig {
    pub path: String,
    pub instance_id: String,
    #[serde(default = "default_root")]
    pub target_path: String,
    #[serde(default)]
    pub overwrite: OverwritePolicy,
}

/// Filter 声明。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    #[default]
    Any,
    Url {
        /// 适用于 `methods` 中全部类型的模式。
        #[serde(default)]
        pattern: Option<String>,
        /// 按方法名单独指定的模式，优先于 `pattern`。
        #[serde(default)]
        patterns: BTreeMap<String, String>,
        #[serde(default)]
        invert: bool,
    },
    MediaType {
        media_type: String,
        #[serde(default)]
        invert: bool,
    },
}

impl FilterSpec {
    /// 构建 Filter；`methods` 决定单一 `pattern` 覆盖的操作类型。
    pub fn build(&self, methods: MethodSet) -> Result<Arc<dyn Filter>> {
        match self {
            Self::Any => Ok(Arc::new(AnyFilter)),
            Self::Url {
                pattern,
                patterns,
                invert,
            } => {
                let mut matcher = match pattern {
                    Some(pattern) => UrlMatcher::for_methods(methods, pattern)?,
                    None => UrlMatcher::empty(),
                };
                for (method, pattern) in patterns {
                    matcher = matcher.with_pattern(OperationKind::parse(method)?, pattern)?;
                }
                if *invert {
                    matcher = matcher.inverted();
                }
                Ok(Arc::new(matcher))
            }
            Self::MediaType { media_type, invert } => {
                let matcher = MediaTypeMatcher::new(media_type);
                Ok(Arc::new(if *invert {
                    matcher.inverted()
                } else {
                    matcher
                }))
            }
        }
    }
}

/// `[[handler]]` 声明。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HandlerConfig {
    /// [`HandlerCatalog`](crate::HandlerCatalog) 中的名称。
    pub name: String,
    /// 生命周期阶段名，缺省为 `default`。
    #[serde(default)]
    pub phase: Option<String>,
    /// 方法名列表，空表示全部操作类型。
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub filter: FilterSpec,
    /// 是否以优先级方式插入绑定表头部。
    #[serde(default)]
    pub priority: bool,
}

impl HandlerConfig {
    pub fn method_set(&self) -> core::result::Result<Option<MethodSet>, ConfigError> {
        if self.methods.is_empty() {
            return Ok(None);
        }
        MethodSet::parse(&self.methods).map(Some)
    }
}

/// 完整的仓库配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub registry: RegistrySettings,
    pub remote_instance: Vec<RemoteInstanceConfig>,
    pub mount: Vec<MountConfig>,
    pub handler: Vec<HandlerConfig>,
}

impl RegistryConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> core::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn remote_instance(&self, id: &str) -> Option<&RemoteInstanceConfig> {
        self.remote_instance.iter().find(|instance| instance.id == id)
    }

    fn validate(&self) -> core::result::Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for instance in &self.remote_instance {
            if !seen.insert(instance.id.as_str()) {
                return Err(ConfigError::DuplicateInstance {
                    id: instance.id.clone(),
                });
            }
        }
        if let Some(mount) = self
            .mount
            .iter()
            .find(|mount| !seen.contains(mount.instance_id.as_str()))
        {
            return Err(ConfigError::UnknownInstance {
                path: mount.path.clone(),
                instance: mount.instance_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_accepts_booleans_and_virtual() {
        let parse = |value: &str| {
            RegistryConfig::from_toml_str(&format!(
                "[[remote_instance]]\nid = \"x\"\n[[mount]]\npath = \"/m\"\ninstance_id = \"x\"\noverwrite = {value}\n"
            ))
            .map(|config| config.mount[0].overwrite)
        };
        assert_eq!(parse("true").unwrap(), OverwritePolicy::True);
        assert_eq!(parse("false").unwrap(), OverwritePolicy::False);
        assert_eq!(parse("\"virtual\"").unwrap(), OverwritePolicy::Virtual);
        assert!(parse("\"sometimes\"").is_err());
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = RegistryConfig::from_toml_str("").unwrap();
        assert_eq!(config.registry.instance_id, "local");
        assert_eq!(config.registry.root, "/");
        assert!(config.mount.is_empty());
    }

    #[test]
    fn mount_must_reference_declared_instance() {
        let err = RegistryConfig::from_toml_str("[[mount]]\npath = \"/m\"\ninstance_id = \"ghost\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInstance { .. }), "未声明实例应报错: {err}");
    }

    #[test]
    fn url_filter_spec_builds_per_method_patterns() {
        let spec = FilterSpec::Url {
            pattern: None,
            patterns: BTreeMap::from([("get".to_owned(), "/a/.*".to_owned())]),
            invert: false,
        };
        assert!(spec.build(MethodSet::all()).is_ok());
        let broken = FilterSpec::Url {
            pattern: Some("(".to_owned()),
            patterns: BTreeMap::new(),
            invert: false,
        };
        assert!(broken.build(MethodSet::all()).is_err(), "非法正则必须报错");
    }
}
