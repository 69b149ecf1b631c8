//! Inode numbers for a path-addressed filesystem.
//!
//! The kernel addresses entries by inode; the VFS layer by path. Numbers are
//! handed out on first lookup and kept until the entry is removed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
struct Inner {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(ROOT_INO, "/".to_string());
        by_path.insert("/".to_string(), ROOT_INO);
        Self {
            inner: Mutex::new(Inner {
                by_ino,
                by_path,
                next: ROOT_INO + 1,
            }),
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.lock().by_ino.get(&ino).cloned()
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn ino_of(&self, path: &str) -> u64 {
        let mut inner = self.lock();
        if let Some(ino) = inner.by_path.get(path) {
            return *ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.by_ino.insert(ino, path.to_string());
        inner.by_path.insert(path.to_string(), ino);
        ino
    }

    pub fn forget_path(&self, path: &str) {
        let mut inner = self.lock();
        if let Some(ino) = inner.by_path.remove(path) {
            inner.by_ino.remove(&ino);
        }
    }

    /// Move `from` and everything below it to `to`, keeping inode numbers.
    pub fn rename(&self, from: &str, to: &str) {
        let mut inner = self.lock();
        let below = format!("{from}/");
        let moved: Vec<(String, u64)> = inner
            .by_path
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&below))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        // a replaced destination loses its inode
        if let Some(old) = inner.by_path.remove(to) {
            inner.by_ino.remove(&old);
        }
        for (old_path, ino) in moved {
            inner.by_path.remove(&old_path);
            let new_path = format!("{to}{}", &old_path[from.len()..]);
            inner.by_ino.insert(ino, new_path.clone());
            inner.by_path.insert(new_path, ino);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mount path of `name` inside directory `parent`.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Mount path of the directory containing `path`.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(n) => &path[..n],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_allocation() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INO).as_deref(), Some("/"));
        let a = table.ino_of("/a");
        assert_eq!(a, 2);
        assert_eq!(table.ino_of("/a"), a);
        assert_eq!(table.ino_of("/b"), 3);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let table = InodeTable::new();
        let dir = table.ino_of("/d");
        let child = table.ino_of("/d/x");
        let sibling = table.ino_of("/dx");
        table.rename("/d", "/e");
        assert_eq!(table.path_of(dir).as_deref(), Some("/e"));
        assert_eq!(table.path_of(child).as_deref(), Some("/e/x"));
        assert_eq!(table.path_of(sibling).as_deref(), Some("/dx"));
        assert_eq!(table.ino_of("/e/x"), child);
    }

    #[test]
    fn test_forget() {
        let table = InodeTable::new();
        let ino = table.ino_of("/gone");
        table.forget_path("/gone");
        assert!(table.path_of(ino).is_none());
        assert_ne!(table.ino_of("/gone"), ino);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
    }
}
