//! 内存版资源存储。
//!
//! # 教案式说明
//! - **意图（Why）**：为调度内核、挂载测试与远端实例模拟提供一个完整、可快照的存储实现；
//! - **逻辑（How）**：全部状态保存在一个可克隆的 [`StoreState`] 中，外层 `RwLock` 保护；
//!   事务在最外层 `begin` 时克隆整份状态作为快照，最外层回滚时整体换回；
//! - **风险（Trade-offs）**：事务状态属于整个存储而非单个线程，并发写入方会共享同一事务，
//!   因此只适合单写者场景。

use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Read, Write},
};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    ResourceStore, TransactionBoundary,
    dump::{DumpDocument, descendants},
};
use crate::{
    error::{RegistryError, Result},
    model::{Association, Collection, Comment, Resource, Tag},
    path,
};

const VERSION_SUFFIX: &str = ";version:";
const COMMENT_SUFFIX: &str = ";comments:";

#[derive(Clone, Debug, Default)]
struct StoreState {
    nodes: BTreeMap<String, Resource>,
    versions: BTreeMap<String, Vec<Resource>>,
    tags: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    comments: BTreeMap<String, Vec<Comment>>,
    ratings: BTreeMap<String, BTreeMap<String, u8>>,
    associations: Vec<Association>,
    next_comment: u64,
}

#[derive(Debug, Default)]
struct TransactionState {
    depth: usize,
    snapshot: Option<StoreState>,
    rollback_only: bool,
}

/// 内存存储，同时实现 [`ResourceStore`] 与 [`TransactionBoundary`]。
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    transaction: Mutex<TransactionState>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// 仅含根集合的空存储。
    pub fn new() -> Self {
        let mut state = StoreState::default();
        state
            .nodes
            .insert(path::ROOT.to_owned(), Resource::collection(path::ROOT));
        Self {
            state: RwLock::new(state),
            transaction: Mutex::new(TransactionState::default()),
        }
    }

    /// 已存储的节点数（含根）。
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

fn parse_index(suffix: &str, marker: &str) -> Option<usize> {
    suffix.strip_prefix(marker)?.parse().ok()
}

fn move_entry<V>(map: &mut BTreeMap<String, V>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_owned(), value);
    }
}

fn relocated(candidate: &str, source: &str, target: &str) -> String {
    path::rebase(candidate, source, target).unwrap_or_else(|| candidate.to_owned())
}

impl StoreState {
    fn node(&self, path: &str) -> Result<&Resource> {
        self.nodes
            .get(path)
            .ok_or_else(|| RegistryError::not_found(path))
    }

    fn require(&self, path: &str) -> Result<()> {
        self.node(path).map(|_| ())
    }

    /// 节点视图：集合附带直接子路径。
    fn view(&self, path: &str) -> Option<Resource> {
        let mut resource = self.nodes.get(path)?.clone();
        if resource.is_collection() {
            let children = descendants(&self.nodes, path)
                .filter(|child| path::parent(child).as_deref() == Some(path))
                .map(str::to_owned)
                .collect();
            resource.set_children(children);
        }
        Some(resource)
    }

    fn subtree(&self, root: &str) -> Vec<String> {
        let mut keys = vec![root.to_owned()];
        keys.extend(descendants(&self.nodes, root).map(str::to_owned));
        keys
    }

    fn ensure_parents(&mut self, path: &str) -> Result<()> {
        let Some(parent) = path::parent(path) else {
            return Ok(());
        };
        match self.nodes.get(&parent) {
            Some(existing) if existing.is_collection() => Ok(()),
            Some(_) => Err(RegistryError::invalid_path(
                path,
                format!("parent `{parent}` is not a collection"),
            )),
            None => {
                self.ensure_parents(&parent)?;
                self.nodes
                    .insert(parent.clone(), Resource::collection(parent));
                Ok(())
            }
        }
    }

    fn remove_subtree(&mut self, root: &str) {
        for key in self.subtree(root) {
            self.nodes.remove(&key);
            self.versions.remove(&key);
            self.tags.remove(&key);
            self.comments.remove(&key);
            self.ratings.remove(&key);
        }
        self.associations.retain(|association| {
            !path::is_within(&association.source_path, root)
                && !path::is_within(&association.destination_path, root)
        });
    }

    fn relocate(&mut self, source: &str, target: &str, keep_source: bool) -> Result<String> {
        if source == path::ROOT {
            return Err(RegistryError::invalid_path(
                source,
                "the root collection cannot be relocated",
            ));
        }
        self.require(source)?;
        if self.nodes.contains_key(target) {
            return Err(RegistryError::invalid_path(target, "target already exists"));
        }
        if path::is_within(target, source) {
            return Err(RegistryError::invalid_path(
                target,
                "target lies inside the source subtree",
            ));
        }
        self.ensure_parents(target)?;
        for key in self.subtree(source) {
            let destination = relocated(&key, source, target);
            let Some(node) = self.nodes.get(&key) else {
                continue;
            };
            let mut copy = node.clone();
            copy.set_path(destination.clone());
            self.nodes.insert(destination.clone(), copy);
            if keep_source {
                continue;
            }
            self.nodes.remove(&key);
            move_entry(&mut self.tags, &key, &destination);
            move_entry(&mut self.ratings, &key, &destination);
            if let Some(mut versions) = self.versions.remove(&key) {
                for version in versions.iter_mut() {
                    version.set_path(destination.clone());
                }
                self.versions.insert(destination.clone(), versions);
            }
            if let Some(mut comments) = self.comments.remove(&key) {
                for comment in comments.iter_mut() {
                    comment.path = relocated(&comment.path, source, target);
                    comment.resource_path = destination.clone();
                }
                self.comments.insert(destination.clone(), comments);
            }
        }
        if !keep_source {
            for association in self.associations.iter_mut() {
                association.source_path = relocated(&association.source_path, source, target);
                association.destination_path =
                    relocated(&association.destination_path, source, target);
            }
        }
        Ok(target.to_owned())
    }

    fn comment_mut(&mut self, comment_path: &str) -> Result<&mut Comment> {
        let (base, _) = path::split_suffix(comment_path);
        self.comments
            .get_mut(base)
            .and_then(|comments| comments.iter_mut().find(|c| c.path == comment_path))
            .ok_or_else(|| RegistryError::not_found(comment_path))
    }
}

impl ResourceStore for InMemoryStore {
    fn get(&self, path: &str) -> Result<Option<Resource>> {
        let state = self.state.read();
        let (base, suffix) = path::split_suffix(path);
        if suffix.is_empty() {
            return Ok(state.view(base));
        }
        if let Some(index) = parse_index(suffix, VERSION_SUFFIX) {
            return Ok(state
                .versions
                .get(base)
                .and_then(|versions| versions.get(index.checked_sub(1)?))
                .map(|version| {
                    let mut version = version.clone();
                    version.set_path(path);
                    version
                }));
        }
        if parse_index(suffix, COMMENT_SUFFIX).is_some() {
            return Ok(state
                .comments
                .get(base)
                .and_then(|comments| comments.iter().find(|c| c.path == path))
                .map(|comment| {
                    let mut resource = Resource::new().with_content(comment.text.clone());
                    resource.set_path(path);
                    resource.set_author(comment.author.clone());
                    resource
                }));
        }
        Ok(None)
    }

    fn put(&self, path: &str, resource: Resource) -> Result<String> {
        if !path::split_suffix(path).1.is_empty() {
            return Err(RegistryError::invalid_path(path, "derived paths are read-only"));
        }
        let mut state = self.state.write();
        if let Some(existing) = state.nodes.get(path)
            && existing.is_collection()
            && !resource.is_collection()
            && descendants(&state.nodes, path).next().is_some()
        {
            return Err(RegistryError::invalid_path(
                path,
                "a non-empty collection cannot be replaced by a resource",
            ));
        }
        state.ensure_parents(path)?;
        let mut stored = resource.without_children();
        stored.set_path(path);
        state.nodes.insert(path.to_owned(), stored);
        debug!(path, "resource stored");
        Ok(path.to_owned())
    }

    fn delete(&self, path: &str) -> Result<()> {
        if path == path::ROOT {
            return Err(RegistryError::invalid_path(
                path,
                "the root collection cannot be deleted",
            ));
        }
        let mut state = self.state.write();
        state.require(path)?;
        state.remove_subtree(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path)?.is_some())
    }

    fn move_resource(&self, source: &str, target: &str) -> Result<String> {
        self.state.write().relocate(source, target, false)
    }

    fn copy(&self, source: &str, target: &str) -> Result<String> {
        self.state.write().relocate(source, target, true)
    }

    fn rename(&self, source: &str, target: &str) -> Result<String> {
        self.state.write().relocate(source, target, false)
    }

    fn create_version(&self, path: &str) -> Result<()> {
        let mut state = self.state.write();
        let snapshot = state.node(path)?.without_children();
        state
            .versions
            .entry(path.to_owned())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    fn restore_version(&self, version_path: &str) -> Result<()> {
        let (base, suffix) = path::split_suffix(version_path);
        let index = parse_index(suffix, VERSION_SUFFIX).ok_or_else(|| {
            RegistryError::invalid_path(version_path, "not a version path")
        })?;
        let mut state = self.state.write();
        let version = state
            .versions
            .get(base)
            .and_then(|versions| versions.get(index.checked_sub(1)?))
            .cloned()
            .ok_or_else(|| RegistryError::not_found(version_path))?;
        state.ensure_parents(base)?;
        state.nodes.insert(base.to_owned(), version);
        Ok(())
    }

    fn versions(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        state.require(path)?;
        let count = state.versions.get(path).map_or(0, Vec::len);
        Ok((1..=count)
            .map(|index| format!("{path}{VERSION_SUFFIX}{index}"))
            .collect())
    }

    fn query(&self, path: &str, params: &BTreeMap<String, String>) -> Result<Collection> {
        let state = self.state.read();
        let matches = descendants(&state.nodes, path)
            .filter(|candidate| {
                let Some(resource) = state.nodes.get(*candidate) else {
                    return false;
                };
                params.iter().all(|(key, expected)| {
                    if key == "mediaType" {
                        resource
                            .media_type()
                            .is_some_and(|media_type| media_type.eq_ignore_ascii_case(expected))
                    } else {
                        resource.property(key) == Some(expected.as_str())
                    }
                })
            })
            .map(str::to_owned)
            .collect();
        Ok(Resource::collection_of(path, matches))
    }

    fn search(&self, keywords: &str) -> Result<Collection> {
        let needle = keywords.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Resource::collection_of(path::ROOT, Vec::new()));
        }
        let state = self.state.read();
        let matches = state
            .nodes
            .iter()
            .filter(|(_, resource)| !resource.is_collection())
            .filter(|(_, resource)| resource.content_text().to_lowercase().contains(&needle))
            .map(|(path, _)| path.clone())
            .collect();
        Ok(Resource::collection_of(path::ROOT, matches))
    }

    fn apply_tag(&self, path: &str, tag: &str, user: &str) -> Result<()> {
        let mut state = self.state.write();
        state.require(path)?;
        state
            .tags
            .entry(path.to_owned())
            .or_default()
            .entry(tag.to_owned())
            .or_default()
            .insert(user.to_owned());
        Ok(())
    }

    fn remove_tag(&self, path: &str, tag: &str) -> Result<()> {
        let mut state = self.state.write();
        state.require(path)?;
        if let Some(tags) = state.tags.get_mut(path) {
            tags.remove(tag);
        }
        Ok(())
    }

    fn tags(&self, path: &str) -> Result<Vec<Tag>> {
        let state = self.state.read();
        Ok(state
            .tags
            .get(path)
            .map(|tags| {
                tags.iter()
                    .map(|(name, users)| Tag {
                        name: name.clone(),
                        count: u32::try_from(users.len()).unwrap_or(u32::MAX),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn add_comment(&self, path: &str, mut comment: Comment) -> Result<String> {
        let mut state = self.state.write();
        state.require(path)?;
        state.next_comment += 1;
        let comment_path = format!("{path}{COMMENT_SUFFIX}{}", state.next_comment);
        comment.path = comment_path.clone();
        comment.resource_path = path.to_owned();
        state
            .comments
            .entry(path.to_owned())
            .or_default()
            .push(comment);
        Ok(comment_path)
    }

    fn edit_comment(&self, comment_path: &str, text: &str) -> Result<()> {
        let mut state = self.state.write();
        state.comment_mut(comment_path)?.text = text.to_owned();
        Ok(())
    }

    fn remove_comment(&self, comment_path: &str) -> Result<()> {
        let mut state = self.state.write();
        state.comment_mut(comment_path)?;
        let (base, _) = path::split_suffix(comment_path);
        if let Some(comments) = state.comments.get_mut(base) {
            comments.retain(|comment| comment.path != comment_path);
        }
        Ok(())
    }

    fn comments(&self, path: &str) -> Result<Vec<Comment>> {
        Ok(self
            .state
            .read()
            .comments
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    fn rate(&self, path: &str, user: &str, rating: u8) -> Result<()> {
        if rating > 5 {
            return Err(RegistryError::invalid_path(
                path,
                format!("rating {rating} is outside 0..=5"),
            ));
        }
        let mut state = self.state.write();
        state.require(path)?;
        state
            .ratings
            .entry(path.to_owned())
            .or_default()
            .insert(user.to_owned(), rating);
        Ok(())
    }

    fn rating(&self, path: &str, user: &str) -> Result<u8> {
        let state = self.state.read();
        Ok(state
            .ratings
            .get(path)
            .and_then(|ratings| ratings.get(user).copied())
            .unwrap_or(0))
    }

    fn average_rating(&self, path: &str) -> Result<f32> {
        let state = self.state.read();
        let Some(ratings) = state.ratings.get(path).filter(|ratings| !ratings.is_empty()) else {
            return Ok(0.0);
        };
        let total: u32 = ratings.values().map(|rating| u32::from(*rating)).sum();
        Ok(total as f32 / ratings.len() as f32)
    }

    fn add_association(&self, association: &Association) -> Result<()> {
        let mut state = self.state.write();
        state.require(&association.source_path)?;
        if !state.associations.contains(association) {
            state.associations.push(association.clone());
        }
        Ok(())
    }

    fn remove_association(&self, association: &Association) -> Result<()> {
        self.state
            .write()
            .associations
            .retain(|existing| existing != association);
        Ok(())
    }

    fn associations(&self, path: &str, association_type: &str) -> Result<Vec<Association>> {
        Ok(self
            .state
            .read()
            .associations
            .iter()
            .filter(|a| a.source_path == path && a.association_type == association_type)
            .cloned()
            .collect())
    }

    fn all_associations(&self, path: &str) -> Result<Vec<Association>> {
        Ok(self
            .state
            .read()
            .associations
            .iter()
            .filter(|a| a.source_path == path || a.destination_path == path)
            .cloned()
            .collect())
    }

    fn dump(&self, path: &str, writer: &mut dyn Write) -> Result<()> {
        let document = {
            let state = self.state.read();
            DumpDocument::capture(&state.nodes, path).ok_or_else(|| RegistryError::not_found(path))?
        };
        serde_json::to_writer(writer, &document)?;
        Ok(())
    }

    fn restore(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let document: DumpDocument = serde_json::from_reader(reader)?;
        let mut state = self.state.write();
        if path != path::ROOT && state.nodes.contains_key(path) {
            state.remove_subtree(path);
        }
        state.ensure_parents(path)?;
        for (entry_path, resource) in document.flatten(path) {
            state.nodes.insert(entry_path, resource);
        }
        debug!(path, "subtree restored");
        Ok(())
    }
}

impl TransactionBoundary for InMemoryStore {
    fn begin(&self) -> Result<()> {
        let mut transaction = self.transaction.lock();
        if transaction.depth == 0 {
            transaction.snapshot = Some(self.state.read().clone());
            transaction.rollback_only = false;
        }
        transaction.depth += 1;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut transaction = self.transaction.lock();
        if transaction.depth == 0 {
            return Err(RegistryError::storage("commit without an active transaction"));
        }
        transaction.depth -= 1;
        if transaction.depth > 0 {
            return Ok(());
        }
        let snapshot = transaction.snapshot.take();
        if std::mem::take(&mut transaction.rollback_only) {
            if let Some(snapshot) = snapshot {
                *self.state.write() = snapshot;
            }
            return Err(RegistryError::storage(
                "transaction was marked rollback-only by a nested rollback",
            ));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut transaction = self.transaction.lock();
        if transaction.depth == 0 {
            return Err(RegistryError::storage("rollback without an active transaction"));
        }
        transaction.depth -= 1;
        if transaction.depth > 0 {
            transaction.rollback_only = true;
            return Ok(());
        }
        transaction.rollback_only = false;
        if let Some(snapshot) = transaction.snapshot.take() {
            *self.state.write() = snapshot;
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.transaction.lock().depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_creates_parent_collections() {
        let store = InMemoryStore::new();
        store.put("/a/b/c", Resource::new().with_content("x")).unwrap();
        let parent = store.get("/a/b").unwrap().expect("父集合应被隐式创建");
        assert!(parent.is_collection());
        assert_eq!(parent.children(), ["/a/b/c"]);
        let root = store.get("/").unwrap().unwrap();
        assert_eq!(root.children(), ["/a"]);
    }

    #[test]
    fn move_carries_metadata_and_copy_does_not_remove_source() {
        let store = InMemoryStore::new();
        store.put("/a/x", Resource::new().with_content("x")).unwrap();
        store.apply_tag("/a/x", "blue", "alice").unwrap();
        store.copy("/a", "/b").unwrap();
        assert!(store.exists("/a/x").unwrap());
        assert!(store.exists("/b/x").unwrap());
        store.move_resource("/a", "/c").unwrap();
        assert!(!store.exists("/a/x").unwrap());
        assert_eq!(store.tags("/c/x").unwrap()[0].name, "blue");
        assert!(store.move_resource("/c", "/c/inner").is_err(), "不能搬入自身子树");
    }

    #[test]
    fn versions_restore_previous_content() {
        let store = InMemoryStore::new();
        store.put("/doc", Resource::new().with_content("v1")).unwrap();
        store.create_version("/doc").unwrap();
        store.put("/doc", Resource::new().with_content("v2")).unwrap();
        let versions = store.versions("/doc").unwrap();
        assert_eq!(versions, ["/doc;version:1"]);
        assert_eq!(store.get(&versions[0]).unwrap().unwrap().content(), b"v1");
        store.restore_version(&versions[0]).unwrap();
        assert_eq!(store.get("/doc").unwrap().unwrap().content(), b"v1");
    }

    #[test]
    fn outermost_rollback_restores_snapshot() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        store.put("/a", Resource::new()).unwrap();
        store.begin().unwrap();
        store.put("/b", Resource::new()).unwrap();
        store.commit().unwrap();
        assert_eq!(store.depth(), 1);
        store.rollback().unwrap();
        assert!(!store.exists("/a").unwrap());
        assert!(!store.exists("/b").unwrap());
    }

    #[test]
    fn nested_rollback_poisons_outer_commit() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        store.put("/a", Resource::new()).unwrap();
        store.begin().unwrap();
        store.rollback().unwrap();
        assert!(store.commit().is_err());
        assert!(!store.exists("/a").unwrap());
    }

    #[test]
    fn dump_and_restore_round_trip_to_new_location() {
        let store = InMemoryStore::new();
        store
            .put("/src/x", Resource::new().with_content("payload").with_property("k", "v"))
            .unwrap();
        let mut buffer = Vec::new();
        store.dump("/src", &mut buffer).unwrap();
        store.restore("/dst/copy", &mut buffer.as_slice()).unwrap();
        let restored = store.get("/dst/copy/x").unwrap().expect("恢复后的资源应存在");
        assert_eq!(restored.content(), b"payload");
        assert_eq!(restored.property("k"), Some("v"));
    }

    #[test]
    fn query_filters_by_properties_and_media_type() {
        let store = InMemoryStore::new();
        store
            .put("/q/a", Resource::new().with_media_type("text/plain").with_property("env", "prod"))
            .unwrap();
        store
            .put("/q/b", Resource::new().with_media_type("text/xml").with_property("env", "prod"))
            .unwrap();
        let mut params = BTreeMap::new();
        params.insert("env".to_owned(), "prod".to_owned());
        assert_eq!(store.query("/q", &params).unwrap().children().len(), 2);
        params.insert("mediaType".to_owned(), "TEXT/PLAIN".to_owned());
        assert_eq!(store.query("/q", &params).unwrap().children(), ["/q/a"]);
    }
}
