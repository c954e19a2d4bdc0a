//! In-memory resource tree behind the mock DAV server.
//!
//! Keys are decoded absolute paths without a trailing slash (`/` is the
//! root). A node's parent must exist and be a collection.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Plain,
    Calendar,
    AddressBook,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Collection {
        kind: CollectionKind,
        display_name: Option<String>,
        description: Option<String>,
    },
    File {
        content: Vec<u8>,
        content_type: String,
        etag: String,
    },
}

impl Node {
    pub fn plain_collection() -> Self {
        Node::Collection {
            kind: CollectionKind::Plain,
            display_name: None,
            description: None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Node::Collection { .. })
    }

    pub fn etag(&self) -> Option<&str> {
        match self {
            Node::File { etag, .. } => Some(etag),
            Node::Collection { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    /// Missing parent, or parent is not a collection.
    Conflict,
    AlreadyExists,
    PreconditionFailed,
}

#[derive(Debug, Clone)]
pub struct Store {
    nodes: BTreeMap<String, Node>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a request path into a store key.
pub fn normalize_key(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

pub fn parent_of(key: &str) -> Option<&str> {
    if key == "/" {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&key[..i]),
        None => None,
    }
}

fn is_under(key: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        key != "/"
    } else {
        key.len() > ancestor.len()
            && key.starts_with(ancestor)
            && key.as_bytes()[ancestor.len()] == b'/'
    }
}

fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4().simple())
}

impl Store {
    /// A store holding only the root collection.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::plain_collection());
        Self { nodes }
    }

    /// Home sets for user `alice` with one calendar and one address book.
    pub fn with_fixtures() -> Self {
        let mut store = Self::new();
        for path in ["/calendars", "/calendars/alice", "/addressbooks", "/addressbooks/alice", "/files"] {
            store.nodes.insert(path.to_string(), Node::plain_collection());
        }
        store.nodes.insert(
            "/calendars/alice/personal".to_string(),
            Node::Collection {
                kind: CollectionKind::Calendar,
                display_name: Some("Personal".to_string()),
                description: Some("Personal events".to_string()),
            },
        );
        store.nodes.insert(
            "/addressbooks/alice/contacts".to_string(),
            Node::Collection {
                kind: CollectionKind::AddressBook,
                display_name: Some("Contacts".to_string()),
                description: Some("Work & family".to_string()),
            },
        );
        store
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Immediate children of `key`, in key order.
    pub fn children<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (&'a str, &'a Node)> + 'a {
        self.descendants(key)
            .filter(move |(k, _)| parent_of(k) == Some(key))
    }

    /// Every node below `key`, in key order.
    pub fn descendants<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (&'a str, &'a Node)> + 'a {
        self.nodes
            .iter()
            .filter(move |(k, _)| is_under(k, key))
            .map(|(k, n)| (k.as_str(), n))
    }

    fn require_parent(&self, key: &str) -> Result<(), StoreError> {
        let parent = parent_of(key).ok_or(StoreError::Conflict)?;
        match self.nodes.get(parent) {
            Some(node) if node.is_collection() => Ok(()),
            _ => Err(StoreError::Conflict),
        }
    }

    /// Create or replace a file. Returns whether it was created and its new etag.
    pub fn put_file(
        &mut self,
        key: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<(bool, String), StoreError> {
        self.require_parent(key)?;
        let created = match self.nodes.get(key) {
            Some(node) if node.is_collection() => return Err(StoreError::Conflict),
            Some(_) => false,
            None => true,
        };
        let etag = new_etag();
        self.nodes.insert(
            key.to_string(),
            Node::File {
                content,
                content_type: content_type.to_string(),
                etag: etag.clone(),
            },
        );
        Ok((created, etag))
    }

    pub fn make_collection(&mut self, key: &str, node: Node) -> Result<(), StoreError> {
        if self.nodes.contains_key(key) {
            return Err(StoreError::AlreadyExists);
        }
        self.require_parent(key)?;
        self.nodes.insert(key.to_string(), node);
        Ok(())
    }

    /// Remove `key` and everything below it.
    pub fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if key == "/" {
            return Err(StoreError::Conflict);
        }
        if self.nodes.remove(key).is_none() {
            return Err(StoreError::NotFound);
        }
        self.nodes.retain(|k, _| !is_under(k, key));
        Ok(())
    }

    /// Copy (or move, when `keep_source` is false) a subtree. Returns whether
    /// the destination was newly created.
    pub fn transfer(
        &mut self,
        from: &str,
        to: &str,
        overwrite: bool,
        keep_source: bool,
    ) -> Result<bool, StoreError> {
        if !self.nodes.contains_key(from) {
            return Err(StoreError::NotFound);
        }
        if from == to || is_under(to, from) {
            return Err(StoreError::Conflict);
        }
        self.require_parent(to)?;
        let existed = self.nodes.contains_key(to);
        if existed {
            if !overwrite {
                return Err(StoreError::PreconditionFailed);
            }
            self.remove(to)?;
        }

        let subtree: Vec<(String, Node)> = self
            .nodes
            .iter()
            .filter(|(k, _)| k.as_str() == from || is_under(k, from))
            .map(|(k, n)| (format!("{to}{}", &k[from.len()..]), n.clone()))
            .collect();
        if !keep_source {
            self.remove(from)?;
        }
        self.nodes.extend(subtree);
        Ok(!existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_decoded_and_trimmed() {
        assert_eq!(normalize_key("/"), "/");
        assert_eq!(normalize_key(""), "/");
        assert_eq!(normalize_key("/My%20Calendar/"), "/My Calendar");
        assert_eq!(normalize_key("//a///b/"), "/a/b");
    }

    #[test]
    fn parents() {
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/a/b"), Some("/a"));
    }

    #[test]
    fn put_requires_collection_parent() {
        let mut store = Store::new();
        assert_eq!(store.put_file("/missing/a.txt", Vec::new(), "text/plain"), Err(StoreError::Conflict));
        let (created, etag) = store.put_file("/a.txt", b"x".to_vec(), "text/plain").unwrap();
        assert!(created);
        assert!(etag.starts_with('"'));
        let (created, second) = store.put_file("/a.txt", b"y".to_vec(), "text/plain").unwrap();
        assert!(!created);
        assert_ne!(etag, second);
        assert_eq!(store.put_file("/a.txt/b", Vec::new(), "text/plain"), Err(StoreError::Conflict));
    }

    #[test]
    fn children_are_immediate_only() {
        let store = Store::with_fixtures();
        let names: Vec<&str> = store.children("/calendars").map(|(k, _)| k).collect();
        assert_eq!(names, vec!["/calendars/alice"]);
        assert_eq!(store.descendants("/calendars").count(), 2);
    }

    #[test]
    fn move_and_copy_subtrees() {
        let mut store = Store::new();
        store.make_collection("/a", Node::plain_collection()).unwrap();
        store.put_file("/a/f.txt", b"1".to_vec(), "text/plain").unwrap();

        assert!(store.transfer("/a", "/b", false, true).unwrap());
        assert!(store.get("/a/f.txt").is_some());
        assert!(store.get("/b/f.txt").is_some());

        assert_eq!(store.transfer("/a", "/b", false, false), Err(StoreError::PreconditionFailed));
        assert!(!store.transfer("/a", "/b", true, false).unwrap());
        assert!(store.get("/a").is_none());
        assert!(store.get("/b/f.txt").is_some());
    }

    #[test]
    fn remove_drops_descendants() {
        let mut store = Store::with_fixtures();
        store.remove("/calendars").unwrap();
        assert!(store.get("/calendars/alice/personal").is_none());
        assert_eq!(store.remove("/calendars"), Err(StoreError::NotFound));
        assert_eq!(store.remove("/"), Err(StoreError::Conflict));
    }
}
