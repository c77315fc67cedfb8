//! 子树导出格式。
//!
//! 导出文档以相对名称组织成树，不携带绝对路径，因此可以在任意位置恢复。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{model::Resource, path};

/// 子树快照中的一个节点。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DumpDocument {
    pub name: String,
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DumpDocument>,
}

/// `root` 的全部后代键，按字典序。
pub(super) fn descendants<'a, V>(
    nodes: &'a BTreeMap<String, V>,
    root: &str,
) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = if root == path::ROOT {
        path::ROOT.to_owned()
    } else {
        format!("{root}/")
    };
    nodes
        .range(prefix.clone()..)
        .map(|(key, _)| key.as_str())
        .take_while(move |key| key.starts_with(&prefix))
        .filter(|key| *key != path::ROOT)
}

impl DumpDocument {
    /// 从扁平节点表中截取 `root` 子树；根不存在时返回 `None`。
    pub(crate) fn capture(nodes: &BTreeMap<String, Resource>, root: &str) -> Option<Self> {
        let resource = nodes.get(root)?;
        let children = descendants(nodes, root)
            .filter(|child| path::parent(child).as_deref() == Some(root))
            .filter_map(|child| Self::capture(nodes, child))
            .collect();
        let mut stored = resource.without_children();
        stored.set_path("");
        Some(Self {
            name: path::name(root).to_owned(),
            resource: stored,
            children,
        })
    }

    /// 展开为 `(绝对路径, 资源)` 列表，根节点落在 `at`，父节点先于子节点。
    pub(crate) fn flatten(self, at: &str) -> Vec<(String, Resource)> {
        let mut entries = Vec::new();
        self.flatten_into(at.to_owned(), &mut entries);
        entries
    }

    fn flatten_into(self, at: String, entries: &mut Vec<(String, Resource)>) {
        let mut resource = self.resource;
        resource.set_path(at.clone());
        entries.push((at.clone(), resource));
        for child in self.children {
            let child_path = path::join(&at, &child.name);
            child.flatten_into(child_path, entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_then_flatten_relocates_subtree() {
        let mut nodes = BTreeMap::new();
        nodes.insert("/a".to_owned(), Resource::collection("/a"));
        nodes.insert("/a/b".to_owned(), Resource::new().with_content("b"));
        nodes.insert("/a/c".to_owned(), Resource::collection("/a/c"));
        nodes.insert("/a/c/d".to_owned(), Resource::new().with_content("d"));
        nodes.insert("/ab".to_owned(), Resource::new().with_content("sibling"));

        let document = DumpDocument::capture(&nodes, "/a").expect("子树应存在");
        let flattened = document.flatten("/x/y");
        let paths: Vec<_> = flattened.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, ["/x/y", "/x/y/b", "/x/y/c", "/x/y/c/d"]);
        assert_eq!(flattened[3].1.content(), b"d");
    }
}
