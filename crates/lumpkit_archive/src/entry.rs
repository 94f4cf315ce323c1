//! The unit of storage inside an archive.

use std::fmt::{self, Debug};

use derive_more::derive::Display;
use indexmap::IndexMap;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::detect::TypeId;

/// Property key holding the absolute offset of an entry's payload in its backing store
pub const OFFSET: &str = "Offset";

/// Whether the payload bytes of an entry are held in memory
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum LoadState {
    /// Only the size and metadata are known, the payload lives in the backing store
    #[default]
    Unloaded,
    /// The payload is in memory
    Loaded,
}

/// Modification state of an entry relative to its backing store
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum EntryState {
    /// Matches the backing store
    #[default]
    Unmodified,
    /// Renamed, moved or edited since it was read
    Modified,
    /// Created since the archive was read
    New,
    /// Removed from its tree
    Deleted,
}

/// A value in an entry's extended property bag
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum PropertyValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// Extended properties attached to an entry, in insertion order
pub type Properties = IndexMap<String, PropertyValue>;

/// A named binary payload stored in an archive
#[derive(Clone, PartialEq)]
pub struct Entry {
    name: String,
    size: u64,
    data: Vec<u8>,
    load_state: LoadState,
    state: EntryState,
    kind: Option<TypeId>,
    properties: Properties,
    /// Stored name bytes, when they differ from the tree name
    disk_name: Option<Vec<u8>>,
}

impl Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("load_state", &self.load_state)
            .field("state", &self.state)
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .field("disk_name", &self.disk_name)
            .finish_non_exhaustive()
    }
}

impl Entry {
    /// Create a new entry holding `data`.
    ///
    /// Entries created by callers start out [`EntryState::New`] and [`LoadState::Loaded`].
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            data,
            load_state: LoadState::Loaded,
            state: EntryState::New,
            kind: None,
            properties: Properties::new(),
            disk_name: None,
        }
    }

    /// Create an entry whose payload still lives in the backing store.
    ///
    /// This is how codecs create entries while reading a directory table.
    pub fn unloaded(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            data: Vec::new(),
            load_state: LoadState::Unloaded,
            state: EntryState::Unmodified,
            kind: None,
            properties: Properties::new(),
            disk_name: None,
        }
    }

    /// Get the name of the entry
    ///
    /// # Warnings
    ///
    /// The name comes straight from the container. Check it before using it as a path on disk, it may
    /// contain separators or `..` components.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the payload in bytes, authoritative even when unloaded
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }

    /// The detected type, if detection has run
    pub fn kind(&self) -> Option<&TypeId> {
        self.kind.as_ref()
    }

    pub fn set_kind(&mut self, kind: TypeId) {
        self.kind = Some(kind);
    }

    /// The payload, or `None` while unloaded
    pub fn data(&self) -> Option<&[u8]> {
        self.is_loaded().then_some(self.data.as_slice())
    }

    /// Mutable access to a loaded payload, for in-place repairs that keep the size
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_loaded() {
            Some(self.data.as_mut_slice())
        } else {
            None
        }
    }

    /// Install payload bytes read from a backing store.
    ///
    /// Marks the entry loaded and updates its size, but does not count as a modification.
    pub fn import(&mut self, data: Vec<u8>) {
        self.size = data.len() as u64;
        self.data = data;
        self.load_state = LoadState::Loaded;
    }

    /// Mark a zero-sized entry as loaded without touching any store
    pub(crate) fn mark_loaded(&mut self) {
        self.load_state = LoadState::Loaded;
    }

    /// Drop the payload bytes, keeping size, type and properties. Returns the number of bytes released.
    pub fn unload(&mut self) -> usize {
        let released = self.data.len();
        self.data = Vec::new();
        self.load_state = LoadState::Unloaded;
        released
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.disk_name = None;
        self.name = name;
    }

    /// The exact name bytes to store in a container: the on-disk name if one was recorded, otherwise the
    /// tree name
    pub fn disk_name(&self) -> &[u8] {
        self.disk_name.as_deref().unwrap_or(self.name.as_bytes())
    }

    /// Record the name bytes this entry had on disk. Renaming the entry forgets them.
    pub fn set_disk_name(&mut self, name: impl Into<Vec<u8>>) {
        let name = name.into();
        self.disk_name = (name != self.name.as_bytes()).then_some(name);
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.shift_remove(key)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The payload offset recorded in the [`OFFSET`] property
    pub fn offset(&self) -> Option<u64> {
        self.property(OFFSET)
            .and_then(PropertyValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
    }

    /// CRC-32 (ISO-HDLC) of the loaded payload
    pub fn crc32(&self) -> Option<u32> {
        self.data()
            .map(|data| crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(data))
    }

    /// A detached summary of this entry
    pub fn info(&self, path: impl Into<String>) -> EntryInfo {
        EntryInfo {
            path: path.into(),
            name: self.name.clone(),
            size: self.size,
            kind: self.kind.clone(),
            state: self.state,
            load_state: self.load_state,
            properties: self.properties.clone(),
        }
    }
}

/// Structure describing an entry without its payload, for listings and tooling
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct EntryInfo {
    /// Full path of the entry in its tree
    pub path: String,
    /// Name of the entry
    pub name: String,
    /// Size of the payload
    pub size: u64,
    /// Detected type
    pub kind: Option<TypeId>,
    /// Modification state
    pub state: EntryState,
    /// Whether the payload is in memory
    pub load_state: LoadState,
    /// Extended properties
    pub properties: Properties,
}
