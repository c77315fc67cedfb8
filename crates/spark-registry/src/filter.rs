//! # Filter：决定 Handler 是否介入某次请求的谓词
//!
//! ## 值相等（What）
//! - Filter 的身份由 [`FilterKey`] 决定，键由配置状态（正则、媒体类型、取反标记、挂载点）
//!   派生，而不是对象地址；同键重复注册会在调度表中合并为一个绑定；
//! - 自定义 Filter 可以使用 [`FilterKey::Named`] 声明自己的相等语义。
//!
//! ## 内置实现（How）
//! - [`UrlMatcher`]：按操作类型配置锚定正则，搬移类操作源路径或目标路径任一匹配即可；
//! - [`MediaTypeMatcher`]：比较载荷或已存储资源的媒体类型，忽略大小写；
//! - [`MountFilter`]：链接 Handler 专用，按挂载点判断请求是否落在链接子树内；
//! - [`AnyFilter`]：匹配所有请求。

use std::collections::BTreeMap;

use regex::Regex;

use crate::{
    context::{Operation, RequestContext},
    error::{RegistryError, Result},
    operation::{MethodSet, OperationKind},
    path,
};

/// Filter 的值身份。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterKey {
    /// 匹配全部请求。
    Any,
    /// 按操作类型配置的 URL 正则。
    Url {
        patterns: Vec<(OperationKind, String)>,
        invert: bool,
    },
    /// 媒体类型比较，保存小写形式。
    MediaType { media_type: String, invert: bool },
    /// 链接挂载点。
    Mount { mount_point: String },
    /// 自定义 Filter 的命名身份。
    Named(String),
}

/// 请求谓词。
pub trait Filter: Send + Sync + 'static {
    /// 值身份，决定重复注册时的合并行为。
    fn key(&self) -> FilterKey;

    /// 判断 `kind` 类型的请求是否应交给绑定的 Handler。
    ///
    /// 返回错误时按 Handler 失败处理：非模拟模式下向调用方传播。
    fn matches(&self, kind: OperationKind, ctx: &RequestContext) -> Result<bool>;
}

/// 匹配全部请求。
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyFilter;

impl Filter for AnyFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Any
    }

    fn matches(&self, _kind: OperationKind, _ctx: &RequestContext) -> Result<bool> {
        Ok(true)
    }
}

/// 基于路径正则的 Filter。
///
/// # 教案式说明
/// - **契约 (What)**：每个操作类型至多一个模式，模式整体锚定（`^(?:pattern)$`）；
///   未配置模式的操作类型永不匹配，取反标记也不改变这一点；
/// - **执行逻辑 (How)**：搬移类操作依次检查源路径与目标路径，任一命中即视为命中，
///   再与取反标记异或。
#[derive(Clone, Debug)]
pub struct UrlMatcher {
    patterns: BTreeMap<OperationKind, (String, Regex)>,
    invert: bool,
}

impl UrlMatcher {
    /// 以同一模式覆盖全部操作类型。
    pub fn new(pattern: &str) -> Result<Self> {
        Self::for_methods(MethodSet::all(), pattern)
    }

    /// 以同一模式覆盖给定操作类型。
    pub fn for_methods(methods: MethodSet, pattern: &str) -> Result<Self> {
        let compiled = compile(pattern)?;
        let patterns = methods
            .iter()
            .map(|kind| (kind, (pattern.to_owned(), compiled.clone())))
            .collect();
        Ok(Self {
            patterns,
            invert: false,
        })
    }

    /// 不含任何模式的匹配器，配合 [`UrlMatcher::with_pattern`] 使用。
    pub fn empty() -> Self {
        Self {
            patterns: BTreeMap::new(),
            invert: false,
        }
    }

    /// 为单个操作类型设置（或覆盖）模式。
    pub fn with_pattern(mut self, kind: OperationKind, pattern: &str) -> Result<Self> {
        let compiled = compile(pattern)?;
        self.patterns.insert(kind, (pattern.to_owned(), compiled));
        Ok(self)
    }

    /// 取反匹配结果。
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    fn path_matches(&self, regex: &Regex, ctx: &RequestContext) -> bool {
        if regex.is_match(ctx.path()) {
            return true;
        }
        ctx.target_path().is_some_and(|target| regex.is_match(target))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| RegistryError::Pattern {
        pattern: pattern.to_owned(),
        source,
    })
}

impl Filter for UrlMatcher {
    fn key(&self) -> FilterKey {
        FilterKey::Url {
            patterns: self
                .patterns
                .iter()
                .map(|(kind, (pattern, _))| (*kind, pattern.clone()))
                .collect(),
            invert: self.invert,
        }
    }

    fn matches(&self, kind: OperationKind, ctx: &RequestContext) -> Result<bool> {
        let Some((_, regex)) = self.patterns.get(&kind) else {
            return Ok(false);
        };
        Ok(self.path_matches(regex, ctx) != self.invert)
    }
}

/// 基于媒体类型的 Filter。
#[derive(Clone, Debug)]
pub struct MediaTypeMatcher {
    media_type: String,
    invert: bool,
}

impl MediaTypeMatcher {
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: media_type.to_ascii_lowercase(),
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// 解析请求所涉资源的媒体类型：写入类取载荷，其余查询存储。
    fn resolve(&self, kind: OperationKind, ctx: &RequestContext) -> Result<Option<String>> {
        if let Some(resource) = ctx.resource() {
            return Ok(resource.media_type().map(str::to_owned));
        }
        if matches!(
            kind,
            OperationKind::SearchContent
                | OperationKind::PutChild
                | OperationKind::ImportChild
                | OperationKind::CreateLink
                | OperationKind::RemoveLink
        ) {
            return Ok(None);
        }
        let Some(store) = ctx.store() else {
            return Ok(None);
        };
        let (base, _) = path::split_suffix(ctx.path());
        Ok(store
            .get(base)?
            .and_then(|resource| resource.media_type().map(str::to_owned)))
    }
}

impl Filter for MediaTypeMatcher {
    fn key(&self) -> FilterKey {
        FilterKey::MediaType {
            media_type: self.media_type.clone(),
            invert: self.invert,
        }
    }

    fn matches(&self, kind: OperationKind, ctx: &RequestContext) -> Result<bool> {
        match self.resolve(kind, ctx)? {
            Some(media_type) => Ok(media_type.eq_ignore_ascii_case(&self.media_type) != self.invert),
            None => Ok(false),
        }
    }
}

/// 链接 Handler 的挂载点 Filter。
///
/// - 普通操作：主路径等于挂载点或位于其下；
/// - 搬移类：源或目标任一落在挂载子树内；
/// - `EXECUTE_QUERY`：查询根是挂载点的祖先或位于挂载子树内，以便联邦查询；
/// - `SEARCH_CONTENT`：从不匹配。
#[derive(Clone, Debug)]
pub struct MountFilter {
    mount_point: String,
}

impl MountFilter {
    pub fn new(mount_point: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }
}

impl Filter for MountFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Mount {
            mount_point: self.mount_point.clone(),
        }
    }

    fn matches(&self, kind: OperationKind, ctx: &RequestContext) -> Result<bool> {
        let inside = |candidate: &str| path::is_within(candidate, &self.mount_point);
        let matched = match ctx.operation() {
            Operation::SearchContent { .. } => false,
            Operation::ExecuteQuery { path: root, .. } => {
                inside(root) || path::is_within(&self.mount_point, path::split_suffix(root).0)
            }
            operation if kind.is_relocation() => {
                inside(operation.path()) || operation.target_path().is_some_and(inside)
            }
            operation => inside(operation.path()),
        };
        Ok(matched)
    }
}
