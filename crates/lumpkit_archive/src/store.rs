//! Backing storage that unloaded entries fetch their payloads from.

use std::fmt::Debug;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{instrument, trace};

/// Random access source of payload bytes
pub trait BackingStore: Send + Debug {
    /// Read exactly `len` bytes starting at `offset`
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Whether the underlying data changed since the store was created
    fn is_stale(&self) -> io::Result<bool>;
}

/// Identity of a file's contents at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl Fingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// A store reading from a file on disk
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    fingerprint: Fingerprint,
}

impl FileStore {
    #[instrument(err)]
    pub fn open(path: impl AsRef<Path> + Debug) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let fingerprint = Fingerprint::of(&path)?;
        Ok(Self {
            path,
            file,
            fingerprint,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        trace!(path = ?self.path, offset, len, "reading");
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn is_stale(&self) -> io::Result<bool> {
        match Fingerprint::of(&self.path) {
            Ok(current) => Ok(current != self.fingerprint),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// A store over an in-memory copy of the container
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn get_ref(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| self.data.get(range))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{len} bytes at {offset} are past the end of the store"),
                )
            })
    }

    fn is_stale(&self) -> io::Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Write};

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use crate::store::{BackingStore, FileStore, MemoryStore};

    #[test]
    fn memory_store_bounds() -> io::Result<()> {
        let mut store = MemoryStore::new(vec![1, 2, 3, 4]);

        assert_eq!(store.read_at(1, 2)?, vec![2, 3]);
        assert_eq!(store.read_at(4, 0)?, Vec::<u8>::new());
        assert_eq!(
            store.read_at(3, 2).map_err(|e| e.kind()),
            Err(io::ErrorKind::UnexpectedEof)
        );
        assert!(store.read_at(u64::MAX, 2).is_err());
        assert!(!store.is_stale()?);
        Ok(())
    }

    #[test]
    fn file_store_reads_and_detects_changes() -> io::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"0123456789")?;
        file.flush()?;

        let mut store = FileStore::open(file.path())?;
        assert_eq!(store.read_at(3, 4)?, b"3456".to_vec());
        assert!(!store.is_stale()?);

        file.write_all(b"more")?;
        file.flush()?;
        assert!(store.is_stale()?);
        Ok(())
    }
}
