//! # 链接：挂载与符号链接
//!
//! ## 角色定位（What）
//! - [`MountHandler`] 把挂载点下的操作重定向到另一个仓库实例；
//! - [`SymLinkHandler`] 把挂载点下的操作重定向到同一实例中的另一棵子树；
//! - [`MountEntry`] 是链接唯一需要跨重启保存的状态，以 `application/vnd.wso2.mount`
//!   资源的形式存放在挂载条目集合下，属性键 `path`、`target`、`author`、`subPath` 必须原样往返。
//!
//! ## 判别规则（How）
//! - 条目的 `target` 以 `/` 开头表示符号链接目标路径，否则为远端实例 ID。

mod remote;
mod symlink;

use std::sync::Arc;

use tracing::{info, warn};

pub use remote::MountHandler;
pub use symlink::{SymLinkHandler, SymLinkRegistry};

use crate::{
    error::{RegistryError, Result},
    handler::Handler,
    lifecycle::{HandlerLifecycleManager, LifecyclePhase},
    model::{MOUNT_ENTRY_COLLECTION, MOUNT_MEDIA_TYPE, Resource, properties},
    path,
    store::ResourceStore,
};

/// 链接目标。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkTarget {
    /// 同一实例内的路径。
    Path(String),
    /// 远端实例，可选实例内子路径。
    Instance {
        instance_id: String,
        sub_path: Option<String>,
    },
}

const ENTRY_PATH: &str = "path";
const ENTRY_TARGET: &str = "target";
const ENTRY_AUTHOR: &str = "author";
const ENTRY_SUB_PATH: &str = "subPath";

/// 持久化的挂载条目。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub path: String,
    pub target: String,
    pub author: Option<String>,
    pub sub_path: Option<String>,
}

impl MountEntry {
    pub fn new(path: impl Into<String>, target: &LinkTarget, author: Option<String>) -> Self {
        let (target, sub_path) = match target {
            LinkTarget::Path(target) => (target.clone(), None),
            LinkTarget::Instance {
                instance_id,
                sub_path,
            } => (instance_id.clone(), sub_path.clone()),
        };
        Self {
            path: path.into(),
            target,
            author,
            sub_path,
        }
    }

    pub fn link_target(&self) -> LinkTarget {
        if self.target.starts_with('/') {
            LinkTarget::Path(self.target.clone())
        } else {
            LinkTarget::Instance {
                instance_id: self.target.clone(),
                sub_path: self.sub_path.clone(),
            }
        }
    }

    /// 条目资源在存储中的位置；挂载点中的 `%` 与 `/` 被转义为单个路径片段。
    pub fn entry_path(mount_point: &str) -> String {
        let name = mount_point.replace('%', "%25").replace('/', "%2F");
        path::join(MOUNT_ENTRY_COLLECTION, &name)
    }

    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new()
            .with_media_type(MOUNT_MEDIA_TYPE)
            .with_property(ENTRY_PATH, self.path.clone())
            .with_property(ENTRY_TARGET, self.target.clone());
        if let Some(author) = &self.author {
            resource.set_property(ENTRY_AUTHOR, author.clone());
        }
        if let Some(sub_path) = &self.sub_path {
            resource.set_property(ENTRY_SUB_PATH, sub_path.clone());
        }
        resource
    }

    /// 从条目资源解析；媒体类型不符或缺少必需属性时返回 `None`。
    pub fn from_resource(resource: &Resource) -> Option<Self> {
        if resource.media_type() != Some(MOUNT_MEDIA_TYPE) {
            return None;
        }
        Some(Self {
            path: resource.property(ENTRY_PATH)?.to_owned(),
            target: resource.property(ENTRY_TARGET)?.to_owned(),
            author: resource.property(ENTRY_AUTHOR).map(str::to_owned),
            sub_path: resource.property(ENTRY_SUB_PATH).map(str::to_owned),
        })
    }

    pub fn persist(&self, store: &dyn ResourceStore) -> Result<()> {
        store
            .put(&Self::entry_path(&self.path), self.to_resource())
            .map(|_| ())
    }

    /// 删除条目，条目本就不存在时视为成功。
    pub fn remove(store: &dyn ResourceStore, mount_point: &str) -> Result<()> {
        match store.delete(&Self::entry_path(mount_point)) {
            Ok(()) | Err(RegistryError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// 读取全部条目，无法解析的条目记录 warn 后跳过。
    pub fn load_all(store: &dyn ResourceStore) -> Result<Vec<Self>> {
        let Some(collection) = store.get(MOUNT_ENTRY_COLLECTION)? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for child in collection.children() {
            match store.get(child)?.as_ref().and_then(Self::from_resource) {
                Some(entry) => entries.push(entry),
                None => warn!(entry = %child, "skipping malformed mount entry"),
            }
        }
        Ok(entries)
    }
}

/// 链接 Handler 写回结果时附加的元数据键。
const LINK_PROPERTIES: [&str; 7] = [
    properties::LINK,
    properties::MOUNT,
    properties::MOUNT_POINT,
    properties::TARGET_POINT,
    properties::ACTUAL_PATH,
    properties::REAL_PATH,
    properties::AUTHOR,
];

/// 去掉读取时附加的链接元数据，避免写回目标存储。
pub(crate) fn strip_link_properties(resource: &mut Resource) {
    for key in LINK_PROPERTIES {
        resource.remove_property(key);
    }
}

/// 从 `default` 阶段移除挂载在 `mount_point` 的全部链接 Handler，返回移除数量。
pub(crate) fn evict_providers(lifecycle: &HandlerLifecycleManager, mount_point: &str) -> usize {
    let stale: Vec<Arc<dyn Handler>> = lifecycle
        .handlers(LifecyclePhase::Default)
        .into_iter()
        .filter(|handler| {
            handler
                .as_mount_provider()
                .is_some_and(|provider| provider.mount_point() == mount_point)
        })
        .collect();
    let evicted = stale
        .iter()
        .filter(|handler| lifecycle.remove_handler(LifecyclePhase::Default, handler))
        .count();
    if evicted > 0 {
        info!(%mount_point, evicted, "link handlers evicted");
    }
    evicted
}

/// 生成转发值类方法：结果取自 `self.forward(ctx)`。
macro_rules! forward_value_methods {
    ($($name:ident => $accessor:ident -> $ty:ty;)*) => {
        $(
            fn $name(&self, ctx: &mut RequestContext) -> Result<Option<$ty>> {
                Ok(self.forward(ctx)?.and_then(Outcome::$accessor))
            }
        )*
    };
}

/// 生成转发无返回值方法。
macro_rules! forward_void_methods {
    ($($name:ident;)*) => {
        $(
            fn $name(&self, ctx: &mut RequestContext) -> Result<()> {
                self.forward(ctx).map(|_| ())
            }
        )*
    };
}

pub(crate) use forward_value_methods;
pub(crate) use forward_void_methods;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_through_resource() {
        let entry = MountEntry::new(
            "/apps/remote",
            &LinkTarget::Instance {
                instance_id: "instanceX".to_owned(),
                sub_path: Some("/services".to_owned()),
            },
            Some("admin".to_owned()),
        );
        let resource = entry.to_resource();
        assert_eq!(resource.property("subPath"), Some("/services"));
        assert_eq!(MountEntry::from_resource(&resource), Some(entry.clone()));
        assert_eq!(
            entry.link_target(),
            LinkTarget::Instance {
                instance_id: "instanceX".to_owned(),
                sub_path: Some("/services".to_owned()),
            }
        );
    }

    #[test]
    fn entry_path_is_a_single_segment() {
        let path = MountEntry::entry_path("/a%b/c");
        assert!(path.ends_with("/%2Fa%25b%2Fc"));
        assert_eq!(path::parent(&path).as_deref(), Some(MOUNT_ENTRY_COLLECTION));
    }

    #[test]
    fn slash_prefixed_target_is_a_symlink() {
        let entry = MountEntry::new("/m", &LinkTarget::Path("/t".to_owned()), None);
        assert_eq!(entry.link_target(), LinkTarget::Path("/t".to_owned()));
    }
}
