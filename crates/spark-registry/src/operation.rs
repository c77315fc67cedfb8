//! 操作类型与方法集合。
//!
//! 每个 Handler 绑定声明自己关心的 [`OperationKind`] 子集（[`MethodSet`]）；未声明时视为全部。

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 仓库操作类型。
///
/// 枚举顺序即 [`OperationKind::ALL`] 的顺序，也是 [`MethodSet`] 位图的位序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Get,
    Put,
    Delete,
    Move,
    Copy,
    Rename,
    Import,
    PutChild,
    ImportChild,
    CreateLink,
    RemoveLink,
    CreateVersion,
    RestoreVersion,
    GetVersions,
    ExecuteQuery,
    SearchContent,
    ResourceExists,
    AddAssociation,
    RemoveAssociation,
    GetAssociations,
    GetAllAssociations,
    ApplyTag,
    GetTags,
    RemoveTag,
    AddComment,
    EditComment,
    RemoveComment,
    GetComments,
    RateResource,
    GetRating,
    GetAverageRating,
    Dump,
    Restore,
    GetRegistryContext,
    InvokeAspect,
}

impl OperationKind {
    /// 全部操作类型，按位序排列。
    pub const ALL: [OperationKind; 35] = [
        Self::Get,
        Self::Put,
        Self::Delete,
        Self::Move,
        Self::Copy,
        Self::Rename,
        Self::Import,
        Self::PutChild,
        Self::ImportChild,
        Self::CreateLink,
        Self::RemoveLink,
        Self::CreateVersion,
        Self::RestoreVersion,
        Self::GetVersions,
        Self::ExecuteQuery,
        Self::SearchContent,
        Self::ResourceExists,
        Self::AddAssociation,
        Self::RemoveAssociation,
        Self::GetAssociations,
        Self::GetAllAssociations,
        Self::ApplyTag,
        Self::GetTags,
        Self::RemoveTag,
        Self::AddComment,
        Self::EditComment,
        Self::RemoveComment,
        Self::GetComments,
        Self::RateResource,
        Self::GetRating,
        Self::GetAverageRating,
        Self::Dump,
        Self::Restore,
        Self::GetRegistryContext,
        Self::InvokeAspect,
    ];

    /// 位序下标。
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 稳定的大写名称，例如 `GET_AVERAGE_RATING`。
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Move => "MOVE",
            Self::Copy => "COPY",
            Self::Rename => "RENAME",
            Self::Import => "IMPORT",
            Self::PutChild => "PUT_CHILD",
            Self::ImportChild => "IMPORT_CHILD",
            Self::CreateLink => "CREATE_LINK",
            Self::RemoveLink => "REMOVE_LINK",
            Self::CreateVersion => "CREATE_VERSION",
            Self::RestoreVersion => "RESTORE_VERSION",
            Self::GetVersions => "GET_VERSIONS",
            Self::ExecuteQuery => "EXECUTE_QUERY",
            Self::SearchContent => "SEARCH_CONTENT",
            Self::ResourceExists => "RESOURCE_EXISTS",
            Self::AddAssociation => "ADD_ASSOCIATION",
            Self::RemoveAssociation => "REMOVE_ASSOCIATION",
            Self::GetAssociations => "GET_ASSOCIATIONS",
            Self::GetAllAssociations => "GET_ALL_ASSOCIATIONS",
            Self::ApplyTag => "APPLY_TAG",
            Self::GetTags => "GET_TAGS",
            Self::RemoveTag => "REMOVE_TAG",
            Self::AddComment => "ADD_COMMENT",
            Self::EditComment => "EDIT_COMMENT",
            Self::RemoveComment => "REMOVE_COMMENT",
            Self::GetComments => "GET_COMMENTS",
            Self::RateResource => "RATE_RESOURCE",
            Self::GetRating => "GET_RATING",
            Self::GetAverageRating => "GET_AVERAGE_RATING",
            Self::Dump => "DUMP",
            Self::Restore => "RESTORE",
            Self::GetRegistryContext => "GET_REGISTRY_CONTEXT",
            Self::InvokeAspect => "INVOKE_ASPECT",
        }
    }

    /// 解析方法名，忽略大小写与下划线，`getAverageRating` 与 `GET_AVERAGE_RATING` 等价。
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('_', "") == wanted)
            .ok_or_else(|| ConfigError::UnknownOperation {
                name: name.to_owned(),
            })
    }

    /// 是否会修改仓库状态；写操作在事务边界内执行，且在只读实例上被拒绝。
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::Put
                | Self::Delete
                | Self::Move
                | Self::Copy
                | Self::Rename
                | Self::Import
                | Self::CreateLink
                | Self::RemoveLink
                | Self::CreateVersion
                | Self::RestoreVersion
                | Self::AddAssociation
                | Self::RemoveAssociation
                | Self::ApplyTag
                | Self::RemoveTag
                | Self::AddComment
                | Self::EditComment
                | Self::RemoveComment
                | Self::RateResource
                | Self::Restore
                | Self::InvokeAspect
        )
    }

    /// 是否以源/目标路径对描述请求。
    pub const fn is_relocation(self) -> bool {
        matches!(self, Self::Move | Self::Copy | Self::Rename)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作类型集合，以 `u64` 位图表示。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodSet(u64);

impl MethodSet {
    /// 覆盖全部操作类型。
    pub const fn all() -> Self {
        Self((1u64 << OperationKind::ALL.len()) - 1)
    }

    /// 空集合。
    pub const fn empty() -> Self {
        Self(0)
    }

    /// 由给定操作类型构成的集合。
    pub fn of(kinds: &[OperationKind]) -> Self {
        kinds.iter().copied().collect()
    }

    /// `None` 视为全部操作类型。
    pub fn or_all(methods: Option<MethodSet>) -> Self {
        methods.unwrap_or_else(Self::all)
    }

    pub const fn contains(self, kind: OperationKind) -> bool {
        self.0 & (1u64 << kind.index()) != 0
    }

    pub fn insert(&mut self, kind: OperationKind) {
        self.0 |= 1u64 << kind.index();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 按位序迭代集合成员。
    pub fn iter(self) -> impl Iterator<Item = OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    /// 从方法名列表解析集合。
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        names
            .iter()
            .map(|name| OperationKind::parse(name.as_ref()))
            .collect()
    }
}

impl FromIterator<OperationKind> for MethodSet {
    fn from_iter<I: IntoIterator<Item = OperationKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
