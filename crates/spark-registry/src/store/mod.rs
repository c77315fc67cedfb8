//! 存储协作方契约。
//!
//! 调度内核只通过 [`ResourceStore`] 与 [`TransactionBoundary`] 两个窄接口访问持久化层；
//! [`InMemoryStore`] 是随仓库附带的参考实现，也用于测试与远端实例模拟。

mod dump;
mod memory;

use std::{
    collections::BTreeMap,
    io::{Read, Write},
};

pub use dump::DumpDocument;
pub use memory::InMemoryStore;

use crate::{
    error::Result,
    model::{Association, Collection, Comment, Resource, Tag},
};

/// 资源存储接口。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 路径均为规范化的绝对路径；写入时父集合不存在则隐式创建；
///   - `get` 对不存在的路径返回 `Ok(None)`，修改类操作对不存在的路径返回
///     [`RegistryError::NotFound`](crate::RegistryError::NotFound)；
///   - 版本路径形如 `/a;version:3`，评论路径形如 `/a;comments:7`；
///   - `dump`/`restore` 的格式对调用方不透明，只保证同一实现可往返。
pub trait ResourceStore: Send + Sync + 'static {
    fn get(&self, path: &str) -> Result<Option<Resource>>;
    fn put(&self, path: &str, resource: Resource) -> Result<String>;
    fn delete(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> Result<bool>;
    fn move_resource(&self, source: &str, target: &str) -> Result<String>;
    fn copy(&self, source: &str, target: &str) -> Result<String>;
    fn rename(&self, source: &str, target: &str) -> Result<String>;

    fn create_version(&self, path: &str) -> Result<()>;
    fn restore_version(&self, version_path: &str) -> Result<()>;
    fn versions(&self, path: &str) -> Result<Vec<String>>;

    /// 在 `path` 子树内查找属性满足全部参数的资源；参数 `mediaType` 比较媒体类型。
    fn query(&self, path: &str, params: &BTreeMap<String, String>) -> Result<Collection>;
    /// 按内容做大小写不敏感的子串检索。
    fn search(&self, keywords: &str) -> Result<Collection>;

    fn apply_tag(&self, path: &str, tag: &str, user: &str) -> Result<()>;
    fn remove_tag(&self, path: &str, tag: &str) -> Result<()>;
    fn tags(&self, path: &str) -> Result<Vec<Tag>>;

    fn add_comment(&self, path: &str, comment: Comment) -> Result<String>;
    fn edit_comment(&self, comment_path: &str, text: &str) -> Result<()>;
    fn remove_comment(&self, comment_path: &str) -> Result<()>;
    fn comments(&self, path: &str) -> Result<Vec<Comment>>;

    fn rate(&self, path: &str, user: &str, rating: u8) -> Result<()>;
    fn rating(&self, path: &str, user: &str) -> Result<u8>;
    fn average_rating(&self, path: &str) -> Result<f32>;

    fn add_association(&self, association: &Association) -> Result<()>;
    fn remove_association(&self, association: &Association) -> Result<()>;
    fn associations(&self, path: &str, association_type: &str) -> Result<Vec<Association>>;
    fn all_associations(&self, path: &str) -> Result<Vec<Association>>;

    fn dump(&self, path: &str, writer: &mut dyn Write) -> Result<()>;
    fn restore(&self, path: &str, reader: &mut dyn Read) -> Result<()>;
}

/// 事务边界。
///
/// - **契约 (What)**：调用可嵌套，`depth` 返回当前嵌套层数；只有最外层提交真正生效，
///   内层回滚使整个事务在最外层结束时回滚。
pub trait TransactionBoundary: Send + Sync + 'static {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn depth(&self) -> usize;
}
