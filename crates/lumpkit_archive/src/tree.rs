//! Hierarchical namespace of entries.
//!
//! Paths use `/` as separator and are relative to the root, which has the empty path. Entries and
//! directories in one directory share a namespace, and both keep their insertion order.
//!
//! Every mutation made while the tree is not muted marks the tree modified, flags each directory between
//! the root and the mutation point, moves the touched entry to [`EntryState::Modified`] (new entries stay
//! [`EntryState::New`]) and announces a [`ChangeEvent`].

use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::entry::{Entry, EntryState, Properties, PropertyValue};
use crate::error::{Error, Result};
use crate::events::{Announcer, ChangeEvent, ChangeKind, ChangeObserver, SubscriptionId};

/// One level of the namespace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
    name: String,
    entries: IndexMap<String, Entry>,
    dirs: IndexMap<String, Directory>,
    modified: bool,
}

impl Directory {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Name of the directory, empty for the root
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries directly inside this directory, in order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Sub-directories directly inside this directory, in order
    pub fn dirs(&self) -> impl Iterator<Item = &Directory> {
        self.dirs.values()
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn dir(&self, name: &str) -> Option<&Directory> {
        self.dirs.get(name)
    }

    /// Whether anything in or below this directory changed since the last save
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Number of entries in this directory and all directories below it
    pub fn entry_count(&self) -> usize {
        self.entries.len() + self.dirs.values().map(Directory::entry_count).sum::<usize>()
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.dirs.contains_key(name)
    }

    fn collect<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Entry)>) {
        for (name, entry) in &self.entries {
            out.push((join(prefix, name), entry));
        }
        for (name, dir) in &self.dirs {
            dir.collect(&join(prefix, name), out);
        }
    }

    fn collect_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Entry)>) {
        for (name, entry) in self.entries.iter_mut() {
            out.push((join(prefix, name), entry));
        }
        for (name, dir) in self.dirs.iter_mut() {
            let prefix = join(prefix, name);
            dir.collect_mut(&prefix, out);
        }
    }

    fn mark_saved(&mut self) {
        self.modified = false;
        for entry in self.entries.values_mut() {
            entry.set_state(EntryState::Unmodified);
        }
        for dir in self.dirs.values_mut() {
            dir.mark_saved();
        }
    }
}

/// Join a directory path and a name
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split a path into its parent directory and final name
pub fn split(path: &str) -> (&str, &str) {
    let path = path.trim_matches('/');
    path.rsplit_once('/').unwrap_or(("", path))
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// An archive's namespace together with its change tracking
#[derive(Debug, Default)]
pub struct EntryTree {
    root: Directory,
    properties: Properties,
    announcer: Announcer,
    modified: bool,
}

impl EntryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    /// Total number of entries in the tree
    pub fn len(&self) -> usize {
        self.root.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the tree changed since it was read or last saved
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_muted(&self) -> bool {
        self.announcer.is_muted()
    }

    /// Set the muted flag, returning the previous value
    pub(crate) fn set_muted(&mut self, muted: bool) -> bool {
        self.announcer.set_muted(muted)
    }

    /// Suppress change tracking and notifications until the returned guard is dropped.
    ///
    /// The previous muted state is restored on drop, so guards nest.
    pub fn mute(&mut self) -> Muted<'_> {
        let previous = self.set_muted(true);
        Muted {
            tree: self,
            previous,
        }
    }

    /// Archive-level properties, such as the WAD kind
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
        if !self.is_muted() {
            self.modified = true;
        }
    }

    /// Take over the contents of `other`, keeping this tree's observers and muted state
    pub(crate) fn replace_contents(&mut self, other: EntryTree) {
        self.root = other.root;
        self.properties = other.properties;
        self.modified = other.modified;
    }

    pub fn subscribe(&mut self, observer: impl ChangeObserver + 'static) -> SubscriptionId {
        self.announcer.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.announcer.unsubscribe(id)
    }

    /// Send an event to observers, unless muted
    pub fn announce(&mut self, kind: ChangeKind, path: impl Into<String>) {
        self.announcer.announce(ChangeEvent::new(kind, path));
    }

    pub fn dir(&self, path: &str) -> Option<&Directory> {
        components(path).try_fold(&self.root, |dir, name| dir.dirs.get(name))
    }

    fn dir_mut(&mut self, path: &str) -> Option<&mut Directory> {
        components(path).try_fold(&mut self.root, |dir, name| dir.dirs.get_mut(name))
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        let (dir, name) = split(path);
        self.dir(dir)?.entries.get(name)
    }

    /// Mutable access to an entry.
    ///
    /// Changes made through this reference are not tracked; use the tree's mutation methods for edits that
    /// should mark the tree modified.
    pub fn entry_mut(&mut self, path: &str) -> Option<&mut Entry> {
        let (dir, name) = split(path);
        self.dir_mut(dir)?.entries.get_mut(name)
    }

    /// Entries directly inside `dir`, in order
    pub fn list_entries(&self, dir: &str) -> Result<Vec<&Entry>> {
        Ok(self
            .dir(dir)
            .ok_or_else(|| Error::not_found(dir))?
            .entries()
            .collect())
    }

    /// Every entry with its full path, depth first: a directory's entries come before its sub-directories
    pub fn flatten(&self) -> Vec<(String, &Entry)> {
        let mut out = Vec::with_capacity(self.len());
        self.root.collect("", &mut out);
        out
    }

    /// Like [`EntryTree::flatten`], with mutable access. Changes are not tracked.
    pub fn flatten_mut(&mut self) -> Vec<(String, &mut Entry)> {
        let mut out = Vec::new();
        self.root.collect_mut("", &mut out);
        out
    }

    /// Full paths of every entry, in [`EntryTree::flatten`] order
    pub fn paths(&self) -> Vec<String> {
        self.flatten().into_iter().map(|(path, _)| path).collect()
    }

    /// Remove everything, keeping observers
    pub fn clear(&mut self) {
        self.root = Directory::default();
        self.properties.clear();
        self.modified = false;
    }

    /// Create a directory and any missing parents
    #[instrument(skip(self), err)]
    pub fn create_dir(&mut self, path: &str) -> Result<()> {
        let mut current = String::new();
        for name in components(path) {
            let parent = self
                .dir_mut(&current)
                .ok_or_else(|| Error::not_found(current.clone()))?;
            if parent.entries.contains_key(name) {
                return Err(Error::DuplicateName {
                    path: current,
                    name: name.to_owned(),
                });
            }

            let created = !parent.dirs.contains_key(name);
            if created {
                parent.dirs.insert(name.to_owned(), Directory::new(name));
            }

            let next = join(&current, name);
            let parent_path = std::mem::replace(&mut current, next);
            if created {
                self.touch(&parent_path, ChangeKind::DirectoryAdded, current.clone());
            }
        }
        Ok(())
    }

    /// Remove a directory with everything below it
    #[instrument(skip(self), err)]
    pub fn remove_dir(&mut self, path: &str) -> Result<Directory> {
        let (parent, name) = split(path);
        let removed = self
            .dir_mut(parent)
            .and_then(|dir| dir.dirs.shift_remove(name))
            .ok_or_else(|| Error::not_found(path))?;
        self.touch(parent, ChangeKind::DirectoryRemoved, path.trim_matches('/'));
        Ok(removed)
    }

    /// Append an entry to the directory at `dir`
    #[instrument(skip(self, entry), fields(name = entry.name()), err)]
    pub fn add_entry(&mut self, dir: &str, mut entry: Entry) -> Result<()> {
        validate_name(entry.name())?;
        let muted = self.is_muted();

        let parent = self.dir_mut(dir).ok_or_else(|| Error::not_found(dir))?;
        if parent.contains(entry.name()) {
            return Err(Error::DuplicateName {
                path: dir.to_owned(),
                name: entry.name().to_owned(),
            });
        }

        if !muted {
            entry.set_state(EntryState::New);
        }
        let path = join(dir.trim_matches('/'), entry.name());
        parent.entries.insert(entry.name().to_owned(), entry);

        self.touch(dir, ChangeKind::EntryAdded, path);
        Ok(())
    }

    /// Take an entry out of the tree. The returned entry is marked [`EntryState::Deleted`].
    #[instrument(skip(self), err)]
    pub fn remove_entry(&mut self, path: &str) -> Result<Entry> {
        let (dir, name) = split(path);
        let mut entry = self
            .dir_mut(dir)
            .and_then(|d| d.entries.shift_remove(name))
            .ok_or_else(|| Error::not_found(path))?;
        entry.set_state(EntryState::Deleted);

        self.touch(dir, ChangeKind::EntryRemoved, path.trim_matches('/'));
        Ok(entry)
    }

    /// Rename an entry in place, keeping its position
    #[instrument(skip(self), err)]
    pub fn rename_entry(&mut self, path: &str, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let muted = self.is_muted();
        let (dir, name) = split(path);

        let parent = self.dir_mut(dir).ok_or_else(|| Error::not_found(path))?;
        let index = parent
            .entries
            .get_index_of(name)
            .ok_or_else(|| Error::not_found(path))?;
        if name == new_name {
            return Ok(());
        }
        if parent.contains(new_name) {
            return Err(Error::DuplicateName {
                path: dir.to_owned(),
                name: new_name.to_owned(),
            });
        }

        if let Some(mut entry) = parent.entries.shift_remove(name) {
            entry.rename(new_name.to_owned());
            mark_modified(&mut entry, muted);
            parent.entries.shift_insert(index, new_name.to_owned(), entry);
        }

        debug!(from = name, to = new_name, "renamed entry");
        self.touch(
            dir,
            ChangeKind::EntryRenamed(join(dir, name)),
            join(dir, new_name),
        );
        Ok(())
    }

    /// Move an entry to the end of another directory
    #[instrument(skip(self), err)]
    pub fn move_entry(&mut self, path: &str, dest_dir: &str) -> Result<()> {
        let muted = self.is_muted();
        let (dir, name) = split(path);
        if self.entry(path).is_none() {
            return Err(Error::not_found(path));
        }

        let dest = self
            .dir_mut(dest_dir)
            .ok_or_else(|| Error::not_found(dest_dir))?;
        if components(dir).eq(components(dest_dir)) {
            return Ok(());
        }
        if dest.contains(name) {
            return Err(Error::DuplicateName {
                path: dest_dir.to_owned(),
                name: name.to_owned(),
            });
        }

        let mut entry = self
            .dir_mut(dir)
            .and_then(|d| d.entries.shift_remove(name))
            .ok_or_else(|| Error::not_found(path))?;
        mark_modified(&mut entry, muted);
        if let Some(dest) = self.dir_mut(dest_dir) {
            dest.entries.insert(name.to_owned(), entry);
        }

        // Both ends of the move count as modified
        self.touch(dir, ChangeKind::EntryMoved(join(dir, name)), String::new());
        let new_path = join(dest_dir.trim_matches('/'), name);
        self.touch(
            dest_dir,
            ChangeKind::EntryMoved(join(dir, name)),
            new_path,
        );
        Ok(())
    }

    /// Replace an entry's payload
    #[instrument(skip(self, data), fields(size = data.len()), err)]
    pub fn set_entry_data(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let muted = self.is_muted();
        let entry = self.entry_mut(path).ok_or_else(|| Error::not_found(path))?;
        entry.import(data);
        mark_modified(entry, muted);

        let (dir, _) = split(path);
        self.touch(dir, ChangeKind::EntryData, path.trim_matches('/'));
        Ok(())
    }

    /// Reset all modification tracking after the tree was written to its backing store
    pub fn mark_saved(&mut self) {
        self.root.mark_saved();
        self.modified = false;
    }

    /// Record a change below `dir` and announce it
    fn touch(&mut self, dir: &str, kind: ChangeKind, path: impl Into<String>) {
        if self.is_muted() {
            return;
        }

        self.modified = true;
        self.root.modified = true;
        let mut current = &mut self.root;
        for name in components(dir) {
            match current.dirs.get_mut(name) {
                Some(next) => {
                    next.modified = true;
                    current = next;
                }
                None => break,
            }
        }

        let path = path.into();
        if !path.is_empty() {
            self.announce(kind, path);
        }
    }
}

fn mark_modified(entry: &mut Entry, muted: bool) {
    if !muted && entry.state() == EntryState::Unmodified {
        entry.set_state(EntryState::Modified);
    }
}

/// Guard returned by [`EntryTree::mute`]
#[derive(Debug)]
pub struct Muted<'a> {
    tree: &'a mut EntryTree,
    previous: bool,
}

impl Deref for Muted<'_> {
    type Target = EntryTree;

    fn deref(&self) -> &Self::Target {
        self.tree
    }
}

impl DerefMut for Muted<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tree
    }
}

impl Drop for Muted<'_> {
    fn drop(&mut self) {
        self.tree.set_muted(self.previous);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::entry::{Entry, EntryState};
    use crate::error::{Error, Result};
    use crate::events::{ChangeEvent, ChangeKind};
    use crate::tree::{split, EntryTree};

    fn recorded(tree: &mut EntryTree) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tree.subscribe(move |e: &ChangeEvent| sink.lock().unwrap().push(e.clone()));
        events
    }

    #[test]
    fn split_paths() {
        assert_eq!(split("A.TXT"), ("", "A.TXT"));
        assert_eq!(split("sounds/A.WAV"), ("sounds", "A.WAV"));
        assert_eq!(split("/maps/e1/MAP.BIN/"), ("maps/e1", "MAP.BIN"));
    }

    #[traced_test]
    #[test]
    fn add_and_flatten_in_order() -> Result<()> {
        let mut tree = EntryTree::new();
        tree.add_entry("", Entry::new("B", vec![2]))?;
        tree.create_dir("sounds")?;
        tree.add_entry("sounds", Entry::new("S1", vec![3]))?;
        tree.add_entry("", Entry::new("A", vec![1]))?;

        assert_eq!(tree.paths(), vec!["B", "A", "sounds/S1"]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.entry("sounds/S1").map(Entry::size), Some(1));
        assert_eq!(
            tree.list_entries("")?
                .iter()
                .map(|e| e.name())
                .collect::<Vec<_>>(),
            vec!["B", "A"]
        );

        Ok(())
    }

    #[test]
    fn names_are_unique_per_directory() -> Result<()> {
        let mut tree = EntryTree::new();
        tree.add_entry("", Entry::new("A", vec![]))?;
        tree.create_dir("D")?;

        assert!(matches!(
            tree.add_entry("", Entry::new("A", vec![])),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            tree.add_entry("", Entry::new("D", vec![])),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            tree.create_dir("A/B"),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            tree.add_entry("", Entry::new("X/Y", vec![])),
            Err(Error::InvalidName(_))
        ));

        // Same name in another directory is fine
        tree.add_entry("D", Entry::new("A", vec![]))?;
        Ok(())
    }

    #[test]
    fn rename_keeps_position() -> Result<()> {
        let mut tree = EntryTree::new();
        for name in ["A", "B", "C"] {
            tree.add_entry("", Entry::new(name, vec![]))?;
        }
        tree.mark_saved();

        tree.rename_entry("B", "Z")?;
        assert_eq!(tree.paths(), vec!["A", "Z", "C"]);
        assert_eq!(tree.entry("Z").map(Entry::state), Some(EntryState::Modified));
        assert!(matches!(
            tree.rename_entry("A", "C"),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            tree.rename_entry("B", "Q"),
            Err(Error::EntryNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn move_between_directories() -> Result<()> {
        let mut tree = EntryTree::new();
        tree.create_dir("a/b")?;
        tree.create_dir("c")?;
        tree.add_entry("a/b", Entry::new("X", vec![1, 2]))?;
        tree.mark_saved();

        tree.move_entry("a/b/X", "c")?;
        assert_eq!(tree.paths(), vec!["c/X"]);
        assert_eq!(tree.entry("c/X").map(Entry::state), Some(EntryState::Modified));
        assert!(tree.dir("a/b").is_some_and(|d| d.is_modified()));
        assert!(tree.dir("c").is_some_and(|d| d.is_modified()));

        assert!(matches!(
            tree.move_entry("c/X", "nowhere"),
            Err(Error::EntryNotFound(_))
        ));
        assert_eq!(tree.paths(), vec!["c/X"]);
        Ok(())
    }

    #[test]
    fn modification_propagates_to_root() -> Result<()> {
        let mut tree = EntryTree::new();
        tree.create_dir("a/b")?;
        tree.create_dir("other")?;
        tree.add_entry("a/b", Entry::unloaded("X", 0))?;
        tree.mark_saved();
        assert!(!tree.is_modified());

        tree.set_entry_data("a/b/X", vec![9, 9])?;

        assert!(tree.is_modified());
        assert!(tree.root().is_modified());
        assert!(tree.dir("a").is_some_and(|d| d.is_modified()));
        assert!(tree.dir("a/b").is_some_and(|d| d.is_modified()));
        assert!(tree.dir("other").is_some_and(|d| !d.is_modified()));
        assert_eq!(tree.entry("a/b/X").map(Entry::size), Some(2));
        Ok(())
    }

    #[test]
    fn remove_marks_deleted() -> Result<()> {
        let mut tree = EntryTree::new();
        tree.add_entry("", Entry::new("A", vec![1]))?;
        let removed = tree.remove_entry("A")?;

        assert_eq!(removed.state(), EntryState::Deleted);
        assert!(tree.is_empty());
        Ok(())
    }

    #[traced_test]
    #[test]
    fn events_are_announced() -> Result<()> {
        let mut tree = EntryTree::new();
        let events = recorded(&mut tree);

        tree.create_dir("d")?;
        tree.add_entry("d", Entry::new("A", vec![]))?;
        tree.rename_entry("d/A", "B")?;
        tree.remove_entry("d/B")?;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ChangeEvent::new(ChangeKind::DirectoryAdded, "d"),
                ChangeEvent::new(ChangeKind::EntryAdded, "d/A"),
                ChangeEvent::new(ChangeKind::EntryRenamed("d/A".into()), "d/B"),
                ChangeEvent::new(ChangeKind::EntryRemoved, "d/B"),
            ]
        );
        Ok(())
    }

    #[test]
    fn muted_mutations_are_silent_and_clean() -> Result<()> {
        let mut tree = EntryTree::new();
        let events = recorded(&mut tree);

        {
            let mut muted = tree.mute();
            muted.add_entry("", Entry::unloaded("A", 4))?;
            muted.set_entry_data("A", vec![1, 2, 3, 4])?;
            assert!(muted.is_muted());
        }

        assert!(!tree.is_muted());
        assert!(!tree.is_modified());
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(tree.entry("A").map(Entry::state), Some(EntryState::Unmodified));

        tree.remove_entry("A")?;
        assert_eq!(events.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn mute_guards_nest() {
        let mut tree = EntryTree::new();
        {
            let mut outer = tree.mute();
            {
                let inner = outer.mute();
                assert!(inner.is_muted());
            }
            assert!(outer.is_muted());
        }
        assert!(!tree.is_muted());
    }

    #[test]
    fn mute_is_restored_on_error() {
        fn failing(tree: &mut EntryTree) -> Result<()> {
            let mut muted = tree.mute();
            muted.remove_entry("missing")?;
            Ok(())
        }

        let mut tree = EntryTree::new();
        assert!(failing(&mut tree).is_err());
        assert!(!tree.is_muted());
    }
}
