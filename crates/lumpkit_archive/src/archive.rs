//! The archive façade: an entry tree bound to a codec and a backing store.

use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bon::Builder;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::detect::Detector;
use crate::entry::{Entry, EntryState, PropertyValue, OFFSET};
use crate::error::{Error, Result};
use crate::events::{ChangeKind, ChangeObserver, SubscriptionId};
use crate::format::{Codec, Encoded, FormatDescriptor, Monitor, ReadContext, Registry};
use crate::store::{BackingStore, FileStore, MemoryStore};
use crate::tree::EntryTree;

/// Options for how an archive is opened
///
/// ```
/// use lumpkit_archive::OpenOptions;
///
/// let options = OpenOptions::builder().format("wad").load_data(true).build();
/// assert_eq!(options.format.as_deref(), Some("wad"));
/// ```
#[derive(Debug, Clone, Default, Builder)]
pub struct OpenOptions {
    /// Codec id to use instead of probing the data
    #[builder(into)]
    pub format: Option<String>,

    /// Keep payloads in memory after the type detection pass
    #[builder(default)]
    pub load_data: bool,

    /// Rules used to type entries
    #[builder(default)]
    pub detector: Arc<Detector>,

    /// Codecs available for lookup and probing
    #[builder(default)]
    pub registry: Registry,
}

/// Read `data` into a fresh tree with the codec selected by `options`
#[instrument(skip_all, fields(len = data.len(), format = options.format.as_deref()), err)]
fn decode(
    data: &[u8],
    options: &OpenOptions,
    monitor: &mut Monitor,
) -> Result<(EntryTree, Arc<dyn Codec>)> {
    let codec = match options.format.as_deref() {
        Some(id) => options
            .registry
            .by_id(id)
            .ok_or_else(|| Error::UnsupportedFormat(id.to_owned()))?,
        None => options.registry.detect(data).ok_or(Error::UnknownFormat)?,
    };

    let mut tree = EntryTree::new();
    let mut context = ReadContext {
        detector: &options.detector,
        load_data: options.load_data,
        monitor,
    };
    codec.read(data, &mut tree, &mut context)?;
    tree.mark_saved();

    info!(format = codec.id(), entries = tree.len(), "read archive");
    Ok((tree, codec))
}

/// An open archive
///
/// ```
/// # fn doit() -> lumpkit_archive::error::Result<()> {
/// use lumpkit_archive::{Archive, Entry, OpenOptions};
///
/// let mut archive = Archive::create_format("chasm_bin")?;
/// archive.add_entry("", Entry::new("HELLO.TXT", b"Hello World".to_vec()))?;
///
/// let codec = archive.codec().clone();
/// let encoded = archive.export(codec.as_ref())?;
/// let mut reopened = Archive::open_bytes(encoded.data, &OpenOptions::default())?;
/// assert_eq!(reopened.entry_data("HELLO.TXT")?, b"Hello World");
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug)]
pub struct Archive {
    tree: EntryTree,
    codec: Arc<dyn Codec>,
    store: Option<Box<dyn BackingStore>>,
    path: Option<PathBuf>,
    options: OpenOptions,
}

impl Archive {
    /// Create an empty archive bound to `codec`, without a backing store
    pub fn create(codec: Arc<dyn Codec>) -> Self {
        let options = OpenOptions {
            format: Some(codec.id().to_owned()),
            ..Default::default()
        };
        Self {
            tree: EntryTree::new(),
            codec,
            store: None,
            path: None,
            options,
        }
    }

    /// Create an empty archive for one of the built-in formats
    pub fn create_format(id: &str) -> Result<Self> {
        let codec = Registry::builtin()
            .by_id(id)
            .ok_or_else(|| Error::UnsupportedFormat(id.to_owned()))?;
        Ok(Self::create(codec))
    }

    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        Self::open_with(path, options, &mut Monitor::default())
    }

    /// Open the archive at `path`, reporting progress to `monitor`
    #[instrument(skip_all, fields(path = ?path.as_ref()), err)]
    pub fn open_with(
        path: impl AsRef<Path>,
        options: &OpenOptions,
        monitor: &mut Monitor,
    ) -> Result<Self> {
        let path = path.as_ref();
        let store = FileStore::open(path)?;
        let data = std::fs::read(path)?;
        let (tree, codec) = decode(&data, options, monitor)?;

        let mut archive = Self {
            tree,
            codec,
            store: Some(Box::new(store)),
            path: Some(path.to_path_buf()),
            options: options.clone(),
        };
        archive.tree.announce(ChangeKind::Opened, "");
        Ok(archive)
    }

    pub fn open_bytes(data: Vec<u8>, options: &OpenOptions) -> Result<Self> {
        Self::open_bytes_with(data, options, &mut Monitor::default())
    }

    /// Open an archive held in memory. The buffer becomes the backing store.
    #[instrument(skip_all, fields(len = data.len()), err)]
    pub fn open_bytes_with(
        data: Vec<u8>,
        options: &OpenOptions,
        monitor: &mut Monitor,
    ) -> Result<Self> {
        let (tree, codec) = decode(&data, options, monitor)?;

        let mut archive = Self {
            tree,
            codec,
            store: Some(Box::new(MemoryStore::new(data))),
            path: None,
            options: options.clone(),
        };
        archive.tree.announce(ChangeKind::Opened, "");
        Ok(archive)
    }

    /// Replace the contents of this archive with the archive at `path`, keeping observers
    pub fn reopen(&mut self, path: impl AsRef<Path>, monitor: &mut Monitor) -> Result<()> {
        let options = OpenOptions {
            format: None,
            ..self.options.clone()
        };
        self.load_file(path.as_ref(), options, monitor, ChangeKind::Opened)
    }

    /// Read the backing file again after it was changed externally.
    ///
    /// All unsaved changes are discarded. Observers stay subscribed.
    pub fn rescan(&mut self) -> Result<()> {
        self.rescan_with(&mut Monitor::default())
    }

    pub fn rescan_with(&mut self, monitor: &mut Monitor) -> Result<()> {
        let path = self.path.clone().ok_or(Error::NoPath)?;
        let options = OpenOptions {
            format: Some(self.codec.id().to_owned()),
            ..self.options.clone()
        };
        self.load_file(&path, options, monitor, ChangeKind::Rescanned)
    }

    #[instrument(skip(self, options, monitor), err)]
    fn load_file(
        &mut self,
        path: &Path,
        options: OpenOptions,
        monitor: &mut Monitor,
        kind: ChangeKind,
    ) -> Result<()> {
        let store = FileStore::open(path)?;
        let data = std::fs::read(path)?;
        let (tree, codec) = decode(&data, &options, monitor)?;

        self.tree.replace_contents(tree);
        self.codec = codec;
        self.store = Some(Box::new(store));
        self.path = Some(path.to_path_buf());
        self.options = options;
        self.tree.announce(kind, "");
        Ok(())
    }

    /// Write the archive back to the file it was opened from
    pub fn save(&mut self) -> Result<Vec<Error>> {
        let path = self.path.clone().ok_or(Error::NoPath)?;
        self.save_as(path)
    }

    /// Write the archive to `path` with the bound codec and make that file the backing store.
    ///
    /// The file is replaced atomically. Returns the non-fatal warnings produced by the codec.
    #[instrument(skip_all, fields(path = ?path.as_ref()), err)]
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<Vec<Error>> {
        let path = path.as_ref();
        self.load_all()?;
        let encoded = self.codec.write(&self.tree)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&encoded.data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        self.store = Some(Box::new(FileStore::open(path)?));
        self.path = Some(path.to_path_buf());
        for (entry_path, offset) in &encoded.offsets {
            if let Some(entry) = self.tree.entry_mut(entry_path) {
                entry.set_property(OFFSET, *offset);
            }
        }
        self.tree.mark_saved();
        self.tree.announce(ChangeKind::Saved, "");

        info!(
            bytes = encoded.data.len(),
            warnings = encoded.warnings.len(),
            "saved archive"
        );
        Ok(encoded.warnings)
    }

    /// Encode the current tree with another codec.
    ///
    /// Neither the bound codec nor any entry state changes, although payloads are loaded.
    #[instrument(skip_all, fields(format = codec.id()), err)]
    pub fn export(&mut self, codec: &dyn Codec) -> Result<Encoded> {
        self.load_all()?;
        codec.write(&self.tree)
    }

    /// Release the archive and its backing store
    pub fn close(self) {
        debug!(path = ?self.path, "closing archive");
    }

    pub fn format(&self) -> &FormatDescriptor {
        self.codec.descriptor()
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// The file backing this archive, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tree(&self) -> &EntryTree {
        &self.tree
    }

    pub fn is_modified(&self) -> bool {
        self.tree.is_modified()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.tree.property(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.tree.set_property(key, value);
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.tree.entry(path)
    }

    /// Entries directly inside `dir`, in order
    pub fn list_entries(&self, dir: &str) -> Result<Vec<&Entry>> {
        self.tree.list_entries(dir)
    }

    /// Every entry with its full path, in write order
    pub fn entries(&self) -> Vec<(String, &Entry)> {
        self.tree.flatten()
    }

    fn check_dirs(&self, dir: &str) -> Result<()> {
        if !dir.trim_matches('/').is_empty() && !self.format().capabilities.supports_dirs {
            return Err(Error::Unsupported {
                format: self.codec.id(),
                operation: "directories",
            });
        }
        Ok(())
    }

    /// Add an entry to `dir`, typing it if it holds data
    pub fn add_entry(&mut self, dir: &str, mut entry: Entry) -> Result<()> {
        self.check_dirs(dir)?;
        self.options.detector.detect_entry(&mut entry);
        self.tree.add_entry(dir, entry)
    }

    pub fn remove_entry(&mut self, path: &str) -> Result<Entry> {
        self.tree.remove_entry(path)
    }

    pub fn rename_entry(&mut self, path: &str, new_name: &str) -> Result<()> {
        self.tree.rename_entry(path, new_name)
    }

    pub fn move_entry(&mut self, path: &str, dest_dir: &str) -> Result<()> {
        self.check_dirs(dest_dir)?;
        self.tree.move_entry(path, dest_dir)
    }

    pub fn create_dir(&mut self, path: &str) -> Result<()> {
        self.check_dirs(path)?;
        self.tree.create_dir(path)
    }

    /// The payload of an entry, loading it from the backing store first if needed
    pub fn entry_data(&mut self, path: &str) -> Result<&[u8]> {
        self.load_entry(path)?;
        self.tree
            .entry(path)
            .and_then(Entry::data)
            .ok_or_else(|| Error::NotLoaded(path.to_owned()))
    }

    /// Replace the payload of an entry and detect its type again
    pub fn set_entry_data(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.tree.set_entry_data(path, data.into())?;
        if let Some(entry) = self.tree.entry_mut(path) {
            self.options.detector.detect_entry(entry);
        }
        Ok(())
    }

    /// Make sure the payload of an entry is in memory. Loading a loaded entry does nothing.
    #[instrument(skip(self), err)]
    pub fn load_entry(&mut self, path: &str) -> Result<()> {
        let entry = self
            .tree
            .entry_mut(path)
            .ok_or_else(|| Error::not_found(path))?;
        if entry.is_loaded() {
            return Ok(());
        }
        if entry.size() == 0 {
            entry.mark_loaded();
            return Ok(());
        }

        let store = self.store.as_deref_mut().ok_or(Error::NoBackingStore)?;
        if store.is_stale()? {
            return Err(Error::StaleBackingStore);
        }
        self.codec.load_entry_payload(entry, store)
    }

    /// Load every unloaded entry
    pub fn load_all(&mut self) -> Result<()> {
        for path in self.tree.paths() {
            self.load_entry(&path)?;
        }
        Ok(())
    }

    /// Drop the payload of an unmodified entry, returning the bytes released.
    ///
    /// Fails with [`Error::StaleBackingStore`] when the file changed since it was read, as the payload could
    /// not be loaded again.
    pub fn unload_entry(&mut self, path: &str) -> Result<usize> {
        let stale = match self.store.as_deref() {
            Some(store) => Some(store.is_stale()?),
            None => None,
        };
        let entry = self
            .tree
            .entry_mut(path)
            .ok_or_else(|| Error::not_found(path))?;
        if stale.is_none() || entry.state() != EntryState::Unmodified {
            return Err(Error::Unsupported {
                format: self.codec.id(),
                operation: "unloading entries that are not saved",
            });
        }
        if stale == Some(true) {
            return Err(Error::StaleBackingStore);
        }
        Ok(entry.unload())
    }

    /// Drop the payload of every entry that can be loaded again, returning the bytes released.
    ///
    /// Nothing is unloaded while the backing store is stale.
    pub fn unload_unmodified(&mut self) -> usize {
        match self.store.as_deref().map(|store| store.is_stale()) {
            Some(Ok(false)) => {}
            Some(Ok(true)) | Some(Err(_)) => {
                warn!("backing store changed, keeping payloads in memory");
                return 0;
            }
            None => return 0,
        }

        let released = self
            .tree
            .flatten_mut()
            .into_iter()
            .filter(|(_, entry)| entry.is_loaded() && entry.state() == EntryState::Unmodified)
            .map(|(_, entry)| entry.unload())
            .sum();
        debug!(released, "unloaded unmodified entries");
        released
    }

    /// Number of payload bytes currently held in memory
    pub fn loaded_bytes(&self) -> u64 {
        self.tree
            .flatten()
            .iter()
            .filter_map(|(_, entry)| entry.data())
            .map(|data| data.len() as u64)
            .sum()
    }

    pub fn subscribe(&mut self, observer: impl ChangeObserver + 'static) -> SubscriptionId {
        self.tree.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.tree.unsubscribe(id)
    }

    pub fn is_muted(&self) -> bool {
        self.tree.is_muted()
    }

    /// Mute the archive until the returned guard is dropped.
    ///
    /// Changes made through the guard neither mark the archive modified nor notify observers.
    pub fn bulk_update(&mut self) -> BulkUpdate<'_> {
        let previous = self.tree.set_muted(true);
        BulkUpdate {
            archive: self,
            previous,
        }
    }
}

/// Guard returned by [`Archive::bulk_update`]
#[derive(Debug)]
pub struct BulkUpdate<'a> {
    archive: &'a mut Archive,
    previous: bool,
}

impl Deref for BulkUpdate<'_> {
    type Target = Archive;

    fn deref(&self) -> &Self::Target {
        self.archive
    }
}

impl DerefMut for BulkUpdate<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.archive
    }
}

impl Drop for BulkUpdate<'_> {
    fn drop(&mut self) {
        self.archive.tree.set_muted(self.previous);
    }
}
