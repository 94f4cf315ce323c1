//! Chasm: The Rift `.bin` archives.
//!
//! | Offset (bytes) | Field        | Description                                   |
//! |----------------|--------------|-----------------------------------------------|
//! | 0x0000         | Magic number | 4 bytes: "CSid"                               |
//! | 0x0004         | Entry count  | 2 bytes: number of records, at most 2048      |
//! | 0x0006         | Records      | 21 bytes per entry                            |
//!
//! Each record holds a Pascal style name (a length byte followed by a 12 byte field), the payload size and
//! the absolute payload offset, both `u32` little endian. Archives written by this codec always reserve
//! room for 2048 records, so payloads start at byte 43014.

use std::io;

use binrw::{BinRead, BinWrite};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error, instrument};

use crate::cursor::BinaryCursor;
use crate::detect::TypeId;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::format::{
    decode_name, fit_name, load_from_store, name_field, payload, populate, Capabilities, Codec, Encoded,
    FormatDescriptor, ReadContext, TableEntry,
};
use crate::store::BackingStore;
use crate::tree::EntryTree;

const ID: &str = "chasm_bin";

pub const MAGIC: &[u8; 4] = b"CSid";
pub const HEADER_SIZE: usize = 6;
pub const RECORD_SIZE: usize = 21;
pub const NAME_LEN: usize = 12;
pub const MAX_ENTRIES: usize = 2048;

/// Size of the header plus a full record table, where written payloads begin
pub const TABLE_SIZE: usize = HEADER_SIZE + RECORD_SIZE * MAX_ENTRIES;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    id: ID,
    name: "Chasm: The Rift BIN",
    extension: "bin",
    capabilities: Capabilities {
        max_entries: Some(MAX_ENTRIES),
        max_name_len: Some(NAME_LEN),
        supports_dirs: false,
        fixed_table: true,
    },
};

/// Chasm BIN header
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(magic = b"CSid", little)]
pub struct ChasmHeader {
    /// The number of records in the table
    pub entries: u16,
}

/// Chasm BIN directory record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ChasmRecord {
    /// Declared length of the name
    pub name_len: u8,

    /// The name, padded with zeroes
    pub name: [u8; NAME_LEN],

    /// The size of the payload
    pub size: u32,

    /// The offset of the payload from the start of the file
    pub offset: u32,
}

impl ChasmRecord {
    fn new(name: &[u8], size: u32, offset: u32) -> Self {
        let mut field = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        field[..len].copy_from_slice(&name[..len]);
        Self {
            name_len: len as u8,
            name: field,
            size,
            offset,
        }
    }

    /// The stored name bytes, ending at the declared length or the first NUL
    pub fn raw_name(&self) -> &[u8] {
        name_field(&self.name, self.name_len as usize)
    }

    pub fn name(&self) -> String {
        decode_name(self.raw_name())
    }
}

/// Codec for Chasm: The Rift BIN archives
#[derive(Debug, Default, Clone, Copy)]
pub struct ChasmBin;

impl ChasmBin {
    /// Parse and validate the whole record table
    fn read_table(data: &[u8]) -> Result<Vec<TableEntry>> {
        if data.len() < HEADER_SIZE {
            return Err(Error::invalid_header(
                ID,
                format!("need {HEADER_SIZE} bytes, got {}", data.len()),
            ));
        }

        let header = ChasmHeader::read(&mut io::Cursor::new(&data[..HEADER_SIZE]))
            .map_err(|_| Error::invalid_header(ID, "missing CSid magic"))?;
        let count = header.entries as usize;
        if count > MAX_ENTRIES {
            return Err(Error::invalid_header(
                ID,
                format!("{count} entries, at most {MAX_ENTRIES} are supported"),
            ));
        }

        let table_end = HEADER_SIZE + RECORD_SIZE * count;
        if table_end > data.len() {
            return Err(Error::CorruptEntry {
                index: (data.len() - HEADER_SIZE) / RECORD_SIZE,
                name: String::new(),
                reason: format!(
                    "record table needs {table_end} bytes, archive has {}",
                    data.len()
                ),
            });
        }

        let mut cursor = BinaryCursor::new(data[HEADER_SIZE..table_end].to_vec());
        (0..count)
            .map(|index| {
                let record = ChasmRecord::read(&mut io::Cursor::new(cursor.read(RECORD_SIZE)?))?;
                let name = record.name();
                let end = u64::from(record.offset) + u64::from(record.size);
                if end > data.len() as u64 {
                    return Err(Error::CorruptEntry {
                        index,
                        name,
                        reason: format!(
                            "data at {}..{end} is past the end of the archive ({} bytes)",
                            record.offset,
                            data.len()
                        ),
                    });
                }

                Ok(TableEntry {
                    raw_name: record.raw_name().to_vec(),
                    name,
                    size: record.size.into(),
                    offset: record.offset.into(),
                })
            })
            .collect()
    }
}

/// Repair wave files whose `fmt ` chunk claims 18 bytes where the game expects 16.
///
/// Returns whether the payload was changed.
pub fn fix_broken_wave(entry: &mut Entry) -> bool {
    if entry.kind() != Some(&TypeId::WAV) || entry.size() < 44 {
        return false;
    }
    let Some(data) = entry.data_mut() else {
        return false;
    };
    if LittleEndian::read_u32(&data[0x10..0x14]) != 0x12 {
        return false;
    }

    LittleEndian::write_u32(&mut data[0x10..0x14], 0x10);
    debug!(name = entry.name(), "fixed wave format chunk size");
    true
}

impl Codec for ChasmBin {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, data: &[u8]) -> bool {
        if data.len() < HEADER_SIZE || &data[..4] != MAGIC {
            return false;
        }
        let count = LittleEndian::read_u16(&data[4..6]) as usize;
        count <= MAX_ENTRIES && HEADER_SIZE + RECORD_SIZE * count <= data.len()
    }

    #[instrument(skip_all, fields(len = data.len()), err)]
    fn read(&self, data: &[u8], tree: &mut EntryTree, context: &mut ReadContext<'_>) -> Result<()> {
        tree.clear();
        let table = Self::read_table(data).inspect_err(|e| error!(%e, "rejected archive"))?;
        debug!(entries = table.len(), "read record table");

        populate(tree, data, table, context, |entry| {
            fix_broken_wave(entry);
        })
    }

    #[instrument(skip_all, fields(entries = tree.len()), err)]
    fn write(&self, tree: &EntryTree) -> Result<Encoded> {
        let entries = tree.flatten();
        if entries.len() > MAX_ENTRIES {
            return Err(Error::TooManyEntries {
                format: ID,
                count: entries.len(),
                max: MAX_ENTRIES,
            });
        }

        let payloads = entries
            .iter()
            .map(|(path, entry)| Ok((path.as_str(), entry.disk_name(), payload(path, entry)?)))
            .collect::<Result<Vec<_>>>()?;
        let total = TABLE_SIZE + payloads.iter().map(|(_, _, data)| data.len()).sum::<usize>();
        if u32::try_from(total).is_err() {
            return Err(Error::Unsupported {
                format: ID,
                operation: "archives larger than 4 GiB",
            });
        }

        let mut encoded = Encoded::default();
        let mut cursor = BinaryCursor::zeroed(total);

        let mut header = io::Cursor::new(Vec::with_capacity(HEADER_SIZE));
        ChasmHeader {
            entries: payloads.len() as u16,
        }
        .write(&mut header)?;
        cursor.write(header.get_ref())?;

        let mut offset = TABLE_SIZE;
        for (path, name, data) in &payloads {
            let name = fit_name(name, NAME_LEN, &mut encoded.warnings);
            let mut record = io::Cursor::new(Vec::with_capacity(RECORD_SIZE));
            ChasmRecord::new(name, data.len() as u32, offset as u32).write(&mut record)?;
            cursor.write(record.get_ref())?;

            encoded.offsets.push((path.to_string(), offset as u64));
            offset += data.len();
        }

        cursor.seek(TABLE_SIZE)?;
        for (_, _, data) in &payloads {
            cursor.write(data)?;
        }

        encoded.data = cursor.into_inner();
        Ok(encoded)
    }

    fn load_entry_payload(&self, entry: &mut Entry, store: &mut dyn BackingStore) -> Result<()> {
        let was_loaded = entry.is_loaded();
        load_from_store(entry, store)?;
        if !was_loaded {
            fix_broken_wave(entry);
        }
        Ok(())
    }
}
