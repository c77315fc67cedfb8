//! 仓库路径工具。
//!
//! 路径始终为绝对路径，分隔符为 `/`，根为 `/`；版本、评论等派生路径以 `;` 引出后缀
//! （如 `/a/b;version:3`），所有改写函数都会原样保留后缀。

use crate::error::{RegistryError, Result};

/// 仓库根路径。
pub const ROOT: &str = "/";

/// 规范化路径：去除重复分隔符与结尾分隔符，拒绝相对路径与 `..`。
pub fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if !trimmed.starts_with('/') {
        return Err(RegistryError::invalid_path(path, "path must be absolute"));
    }
    let (base, suffix) = split_suffix(trimmed);
    let mut normalized = String::with_capacity(base.len());
    for segment in base.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(RegistryError::invalid_path(
                    path,
                    "parent segments are not allowed",
                ));
            }
            other => {
                normalized.push('/');
                normalized.push_str(other);
            }
        }
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized.push_str(suffix);
    Ok(normalized)
}

/// 拆分出 `;` 后缀，返回 `(主体, 后缀)`，后缀包含 `;` 本身。
pub fn split_suffix(path: &str) -> (&str, &str) {
    match path.find(';') {
        Some(index) => path.split_at(index),
        None => (path, ""),
    }
}

/// 父路径；根没有父路径。
pub fn parent(path: &str) -> Option<String> {
    let (base, _) = split_suffix(path);
    if base == ROOT {
        return None;
    }
    match base.rfind('/') {
        Some(0) => Some(ROOT.to_owned()),
        Some(index) => Some(base[..index].to_owned()),
        None => None,
    }
}

/// 最后一个路径片段。
pub fn name(path: &str) -> &str {
    let (base, _) = split_suffix(path);
    base.rsplit('/').next().unwrap_or_default()
}

/// 拼接父路径与子名称。
pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{}/{child}", parent.trim_end_matches('/'))
    }
}

/// `path` 是否等于 `root` 或位于其子树内。
pub fn is_within(path: &str, root: &str) -> bool {
    let (base, _) = split_suffix(path);
    if root == ROOT {
        return base.starts_with('/');
    }
    base == root || (base.starts_with(root) && base[root.len()..].starts_with('/'))
}

/// 将 `path` 从 `from` 子树搬移到 `to` 子树，不在 `from` 内时返回 `None`。
///
/// ```
/// use spark_registry::path::rebase;
///
/// assert_eq!(rebase("/a/b/c", "/a/b", "/x").as_deref(), Some("/x/c"));
/// assert_eq!(rebase("/a/b", "/a/b", "/x").as_deref(), Some("/x"));
/// assert_eq!(rebase("/x/c;version:2", "/x", "/a/b").as_deref(), Some("/a/b/c;version:2"));
/// assert_eq!(rebase("/other", "/a/b", "/x"), None);
/// ```
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_within(path, from) {
        return None;
    }
    let (base, suffix) = split_suffix(path);
    let rest = if from == ROOT { base } else { &base[from.len()..] };
    let mut rebased = if rest.is_empty() || rest == ROOT {
        to.to_owned()
    } else if to == ROOT {
        rest.to_owned()
    } else {
        format!("{to}{rest}")
    };
    rebased.push_str(suffix);
    Some(rebased)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/a/./b;version:2").unwrap(), "/a/b;version:2");
    }

    #[test]
    fn normalize_rejects_relative_and_parent_segments() {
        assert!(normalize("a/b").is_err());
        assert!(normalize("/a/../b").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent("/a").as_deref(), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b;comments:3"), "b");
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn rebase_between_roots() {
        assert_eq!(rebase("/c", "/", "/a/b").as_deref(), Some("/a/b/c"));
        assert_eq!(rebase("/a/b/c", "/a/b", "/").as_deref(), Some("/c"));
        assert_eq!(rebase("/", "/", "/x").as_deref(), Some("/x"));
    }
}
