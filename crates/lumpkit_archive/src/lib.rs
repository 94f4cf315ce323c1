//! This library reads, edits and writes game data archives: containers of named binary entries such as the
//! **BIN** files of *Chasm: The Rift* and the **WAD** files of Doom engine games.
//!
//! An [`Archive`] holds an [`EntryTree`] bound to a format [`Codec`] and to the backing store it was read
//! from. Entries are read lazily: opening an archive only parses its directory table and types every entry,
//! payloads are fetched from the backing store on first access and can be released again while they are
//! unmodified.
//!
//! # Chasm BIN Archive Format
//!
//! | Offset (bytes) | Field        | Description                                   |
//! |----------------|--------------|-----------------------------------------------|
//! | 0x0000         | Magic number | 4 bytes: 0x43536964 ("CSid")                  |
//! | 0x0004         | Entry count  | 2 bytes: Number of records, at most 2048      |
//! | 0x0006         | Records      | 21 bytes per record                           |
//!
//! Each record has the following structure:
//!
//! | Offset (bytes) | Field       | Description                                             |
//! |----------------|-------------|---------------------------------------------------------|
//! | 0x0000         | Name length | 1 byte: Number of meaningful bytes in the name field    |
//! | 0x0001         | Name        | 12 bytes: The name, padded with zeroes                  |
//! | 0x000D         | Size        | 4 bytes: Size of the payload                            |
//! | 0x0011         | Offset      | 4 bytes: Offset of the payload from the start of file   |
//!
//! - **Name**: ends at the declared length or the first NUL byte, whichever comes first.
//! - **Offset**: archives written by this library reserve room for all 2048 records, so the first payload
//!   starts at `6 + 21 × 2048 = 43014`. Readers accept any table size.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.bin`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Wave files**: sounds whose `fmt ` chunk claims 18 bytes are patched to 16 bytes when loaded
//!
//! # Example
//!
//! ```no_run
//! # fn doit() -> lumpkit_archive::error::Result<()> {
//! use lumpkit_archive::{Archive, OpenOptions};
//!
//! let mut archive = Archive::open("CSOUNDS.BIN", &OpenOptions::default())?;
//! for (path, entry) in archive.entries() {
//!     println!("{path}: {} bytes, {:?}", entry.size(), entry.kind());
//! }
//!
//! let data = archive.entry_data("GUN.WAV")?.to_vec();
//! archive.add_entry("", lumpkit_archive::Entry::new("GUN2.WAV", data))?;
//! archive.save()?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cursor;
pub mod detect;
pub mod entry;
pub mod error;
pub mod events;
pub mod format;
pub mod store;
pub mod tree;

pub use archive::{Archive, BulkUpdate, OpenOptions};
pub use detect::{Detector, TypeId};
pub use entry::{Entry, EntryInfo, EntryState, LoadState, PropertyValue};
pub use events::{ChangeEvent, ChangeKind, SubscriptionId};
pub use format::{CancelToken, Codec, Encoded, Monitor, Registry};
pub use tree::EntryTree;
