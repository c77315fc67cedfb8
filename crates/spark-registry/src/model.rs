//! 仓库数据模型：资源、集合、标签、评论、关联与实例描述。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 挂载条目资源的媒体类型。
pub const MOUNT_MEDIA_TYPE: &str = "application/vnd.wso2.mount";

/// 挂载条目集合路径，启动时从这里恢复全部链接。
pub const MOUNT_ENTRY_COLLECTION: &str =
    "/_system/local/repository/components/org.wso2.carbon.registry/mount";

/// 重定向结果上附加的元数据键。
pub mod properties {
    /// 资源经由链接（挂载或符号链接）访问。
    pub const LINK: &str = "registry.link";
    /// 资源来自远端实例挂载。
    pub const MOUNT: &str = "registry.mount";
    /// 本地挂载点。
    pub const MOUNT_POINT: &str = "registry.mountpoint";
    /// 目标侧根路径。
    pub const TARGET_POINT: &str = "registry.targetpoint";
    /// 目标侧实际路径。
    pub const ACTUAL_PATH: &str = "registry.actualpath";
    /// `实例:路径` 形式的真实位置。
    pub const REAL_PATH: &str = "registry.realpath";
    /// 链接创建者。
    pub const AUTHOR: &str = "registry.author";
    /// 导入来源地址。
    pub const IMPORT_SOURCE: &str = "registry.import.source";
}

/// 仓库中的资源或集合。
///
/// 集合与普通资源共用一个结构：`children` 为 `Some` 时表示集合，其中保存直接子节点的
/// 完整路径。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<String>>,
}

/// 集合与资源同构，别名仅用于提升签名可读性。
pub type Collection = Resource;

impl Resource {
    /// 新建空的普通资源，路径在写入时由仓库确定。
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建集合。
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            children: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// 以给定子路径构造集合，常用于查询结果。
    pub fn collection_of(path: impl Into<String>, children: Vec<String>) -> Self {
        Self {
            path: path.into(),
            children: Some(children),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn set_media_type(&mut self, media_type: Option<String>) {
        self.media_type = media_type;
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// 按 UTF-8 解读内容，非法字节以替换字符呈现。
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn set_author(&mut self, author: Option<String>) {
        self.author = author;
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn is_collection(&self) -> bool {
        self.children.is_some()
    }

    /// 集合的直接子路径；普通资源返回空切片。
    pub fn children(&self) -> &[String] {
        self.children.as_deref().unwrap_or_default()
    }

    pub fn set_children(&mut self, children: Vec<String>) {
        self.children = Some(children);
    }

    /// 对子路径逐一应用改写函数。
    pub fn map_children(&mut self, mut rewrite: impl FnMut(&str) -> String) {
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                *child = rewrite(child);
            }
        }
    }

    /// 去掉子节点信息，得到仅含自身元数据的副本，用于存储与导出。
    pub(crate) fn without_children(&self) -> Self {
        Self {
            children: self.children.as_ref().map(|_| Vec::new()),
            ..self.clone()
        }
    }
}

/// 标签及其在资源上的计数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub count: u32,
}

/// 资源评论。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// 评论自身路径，例如 `/a/b;comments:3`；新增前为空。
    #[serde(default)]
    pub path: String,
    /// 被评论资源路径。
    #[serde(default)]
    pub resource_path: String,
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            resource_path: String::new(),
            text: text.into(),
            author: None,
        }
    }
}

/// 两个资源之间的有向关联。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    pub source_path: String,
    pub destination_path: String,
    pub association_type: String,
}

impl Association {
    pub fn new(
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        association_type: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            association_type: association_type.into(),
        }
    }
}

/// 实例描述，`GET_REGISTRY_CONTEXT` 的返回值。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryContextInfo {
    pub instance_id: String,
    pub root: String,
    pub read_only: bool,
    pub cache_enabled: bool,
}
