//! Container formats and the contract they implement.
//!
//! Every format is a [`Codec`]: it recognises its own data, fills an [`EntryTree`] from a buffer, writes a
//! tree back into a fresh buffer and fetches single payloads from a [`BackingStore`]. Codecs are kept in a
//! [`Registry`] and looked up by id or by probing.

pub mod chasm_bin;
pub mod wad;

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, instrument, trace, warn};

use crate::detect::Detector;
use crate::entry::{Entry, OFFSET};
use crate::error::{Error, Result};
use crate::store::BackingStore;
use crate::tree::EntryTree;

pub use chasm_bin::ChasmBin;
pub use wad::Wad;

/// What a format is able to store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest number of entries the format can hold
    pub max_entries: Option<usize>,
    /// Longest entry name in bytes
    pub max_name_len: Option<usize>,
    /// Whether entries can live in directories
    pub supports_dirs: bool,
    /// Whether the directory table has a fixed size regardless of the entry count
    pub fixed_table: bool,
}

/// Static description of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Stable identifier, used to select the format explicitly
    pub id: &'static str,
    /// Human readable name
    pub name: &'static str,
    /// Default file extension, without the dot
    pub extension: &'static str,
    pub capabilities: Capabilities,
}

/// The result of writing a tree
#[derive(Debug, Default)]
pub struct Encoded {
    /// The container bytes
    pub data: Vec<u8>,
    /// New payload offset of every entry, by path
    pub offsets: Vec<(String, u64)>,
    /// Non-fatal problems, such as truncated names
    pub warnings: Vec<Error>,
}

/// Shared flag used to cancel a long running read
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

type ProgressFn = dyn FnMut(f32) + Send;

/// Progress reporting and cancellation for a read
#[derive(Default)]
pub struct Monitor {
    progress: Option<Box<ProgressFn>>,
    cancel: CancelToken,
    last: f32,
}

impl Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .field("last", &self.last)
            .finish()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `progress` with the completed fraction as the read advances
    pub fn with_progress(mut self, progress: impl FnMut(f32) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Report progress. The value is clamped to `[0, 1]` and never decreases.
    pub fn report(&mut self, fraction: f32) {
        let fraction = if fraction.is_nan() {
            self.last
        } else {
            fraction.clamp(self.last, 1.0)
        };
        self.last = fraction;
        if let Some(progress) = self.progress.as_mut() {
            progress(fraction);
        }
    }

    /// Fail with [`Error::Cancelled`] once the token was triggered
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Everything a codec needs besides the bytes while reading
#[derive(Debug)]
pub struct ReadContext<'a> {
    pub detector: &'a Detector,
    /// Keep payloads in memory after the detection pass
    pub load_data: bool,
    pub monitor: &'a mut Monitor,
}

/// A container format
pub trait Codec: Send + Sync + Debug {
    fn descriptor(&self) -> &FormatDescriptor;

    /// Whether `data` looks like this format. Never fails.
    fn probe(&self, data: &[u8]) -> bool;

    /// Replace the contents of `tree` with the entries in `data`.
    ///
    /// Either every entry is read or the tree is left empty.
    fn read(&self, data: &[u8], tree: &mut EntryTree, context: &mut ReadContext<'_>) -> Result<()>;

    /// Serialize `tree` into a new buffer. Every entry with a non-zero size must be loaded.
    fn write(&self, tree: &EntryTree) -> Result<Encoded>;

    /// Fetch the payload of an unloaded entry from `store`, using its offset property
    fn load_entry_payload(&self, entry: &mut Entry, store: &mut dyn BackingStore) -> Result<()> {
        load_from_store(entry, store)
    }

    fn id(&self) -> &'static str {
        self.descriptor().id
    }
}

/// Offset based payload loading shared by the built-in codecs
#[instrument(skip_all, fields(name = entry.name()), err)]
pub fn load_from_store(entry: &mut Entry, store: &mut dyn BackingStore) -> Result<()> {
    if entry.is_loaded() {
        return Ok(());
    }
    if entry.size() == 0 {
        entry.mark_loaded();
        return Ok(());
    }

    let offset = entry.offset().ok_or_else(|| Error::MissingProperty {
        entry: entry.name().to_owned(),
        key: OFFSET,
    })?;
    let len = entry.size() as usize;

    let data = store.read_at(offset, len)?;
    trace!(offset, len, "loaded payload");
    entry.import(data);
    Ok(())
}

/// One row of a parsed directory table
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableEntry {
    /// Stored name bytes, exactly as found in the table
    pub raw_name: Vec<u8>,
    /// The stored name as text
    pub name: String,
    pub size: u64,
    pub offset: u64,
}

/// Fill `tree` from a validated table, muted, leaving it empty on failure
pub(crate) fn populate(
    tree: &mut EntryTree,
    data: &[u8],
    table: Vec<TableEntry>,
    context: &mut ReadContext<'_>,
    fixup: impl Fn(&mut Entry),
) -> Result<()> {
    tree.clear();
    let result = populate_muted(tree, data, table, context, fixup);
    if result.is_err() {
        tree.clear();
    }
    result
}

fn populate_muted(
    tree: &mut EntryTree,
    data: &[u8],
    table: Vec<TableEntry>,
    context: &mut ReadContext<'_>,
    fixup: impl Fn(&mut Entry),
) -> Result<()> {
    let mut tree = tree.mute();
    let total = table.len();

    for (index, record) in table.into_iter().enumerate() {
        context.monitor.check_cancelled()?;

        let base = tree_name(&record.name);
        let mut name = base.clone();
        let mut n = 0;
        while tree.entry(&name).is_some() {
            n += 1;
            name = format!("{base}~{n}");
        }

        let mut entry = Entry::unloaded(name, record.size);
        entry.set_property(OFFSET, record.offset);
        if entry.name().as_bytes() != record.raw_name {
            debug!(name = record.name.as_str(), renamed = entry.name(), "entry name changed");
        }
        entry.set_disk_name(record.raw_name);

        let payload = usize::try_from(record.offset)
            .ok()
            .and_then(|start| data.get(start..start.checked_add(record.size as usize)?))
            .ok_or_else(|| Error::CorruptEntry {
                index,
                name: record.name.clone(),
                reason: "data runs past the end of the archive".to_owned(),
            })?;
        entry.import(payload.to_vec());
        context.detector.detect_entry(&mut entry);
        fixup(&mut entry);
        if !context.load_data && entry.size() > 0 {
            entry.unload();
        }

        tree.add_entry("", entry)?;
        context.monitor.report((index + 1) as f32 / total as f32);
    }

    context.monitor.report(1.0);
    Ok(())
}

/// Make a stored name usable as a tree name
fn tree_name(name: &str) -> String {
    if name.is_empty() {
        return "UNNAMED".to_owned();
    }
    name.replace('/', "_")
}

/// Payload bytes of an entry that is about to be written
pub(crate) fn payload<'a>(path: &str, entry: &'a Entry) -> Result<&'a [u8]> {
    match entry.data() {
        Some(data) => Ok(data),
        None if entry.size() == 0 => Ok(&[]),
        None => Err(Error::NotLoaded(path.to_owned())),
    }
}

/// Cut a name down to `max` bytes, recording a warning when it had to change.
///
/// UTF-8 names are cut at a character boundary, any other bytes are cut at `max`.
pub(crate) fn fit_name<'a>(name: &'a [u8], max: usize, warnings: &mut Vec<Error>) -> &'a [u8] {
    if name.len() <= max {
        return name;
    }

    let end = match std::str::from_utf8(name) {
        Ok(text) => (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0),
        Err(_) => max,
    };
    let truncated = &name[..end];
    let (name, short) = (decode_name(name), decode_name(truncated));
    warn!(name = name.as_str(), truncated = short.as_str(), "entry name too long, truncating");
    warnings.push(Error::NameTooLong {
        name,
        truncated: short,
    });
    truncated
}

/// The bytes of a fixed-size name field: up to `len` bytes, ending early at the first NUL
pub(crate) fn name_field(field: &[u8], len: usize) -> &[u8] {
    let field = &field[..len.min(field.len())];
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Stored names as text. Bytes that are not UTF-8 are read as Latin-1, so distinct names stay distinct.
pub(crate) fn decode_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_owned(),
        Err(_) => raw.iter().map(|b| char::from(*b)).collect(),
    }
}

/// Set of known codecs, probed in registration order
#[derive(Debug, Clone)]
pub struct Registry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl Default for Registry {
    /// A registry holding the built-in codecs
    fn default() -> Self {
        Registry::empty().with(ChasmBin).with(Wad)
    }
}

impl Registry {
    pub fn empty() -> Self {
        Registry { codecs: Vec::new() }
    }

    /// Shared registry with the built-in codecs
    pub fn builtin() -> &'static Registry {
        static BUILTIN: OnceLock<Registry> = OnceLock::new();
        BUILTIN.get_or_init(Registry::default)
    }

    pub fn register(&mut self, codec: impl Codec + 'static) {
        debug!(id = codec.id(), "registering codec");
        self.codecs.push(Arc::new(codec));
    }

    pub fn with(mut self, codec: impl Codec + 'static) -> Self {
        self.register(codec);
        self
    }

    pub fn codecs(&self) -> impl Iterator<Item = &Arc<dyn Codec>> {
        self.codecs.iter()
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.iter().find(|c| c.id() == id).cloned()
    }

    /// First codec whose probe accepts `data`
    pub fn detect(&self, data: &[u8]) -> Option<Arc<dyn Codec>> {
        let found = self.codecs.iter().find(|c| c.probe(data)).cloned();
        trace!(format = ?found.as_ref().map(|c| c.id()), "probed");
        found
    }
}
