//! Doom engine WAD archives.
//!
//! | Offset (bytes) | Field            | Description                                 |
//! |----------------|------------------|---------------------------------------------|
//! | 0x0000         | Magic number     | 4 bytes: "IWAD" or "PWAD"                   |
//! | 0x0004         | Lump count       | 4 bytes: signed number of directory records |
//! | 0x0008         | Directory offset | 4 bytes: signed offset of the directory     |
//!
//! The directory holds one 16 byte record per lump: signed offset, signed size and an 8 byte name padded
//! with zeroes. Written archives keep the payloads right after the header and the directory at the end.

use std::io;

use binrw::{BinRead, BinWrite};
use tracing::{debug, error, instrument};

use crate::cursor::BinaryCursor;
use crate::error::{Error, Result};
use crate::format::{
    decode_name, fit_name, name_field, payload, populate, Capabilities, Codec, Encoded, FormatDescriptor,
    ReadContext, TableEntry,
};
use crate::tree::EntryTree;

const ID: &str = "wad";

pub const HEADER_SIZE: usize = 12;
pub const RECORD_SIZE: usize = 16;
pub const NAME_LEN: usize = 8;

/// Archive property holding the magic of the archive, `IWAD` or `PWAD`
pub const WAD_KIND: &str = "WadKind";

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    id: ID,
    name: "Doom WAD",
    extension: "wad",
    capabilities: Capabilities {
        max_entries: Some(i32::MAX as usize),
        max_name_len: Some(NAME_LEN),
        supports_dirs: false,
        fixed_table: false,
    },
};

/// WAD header
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct WadHeader {
    /// `IWAD` for game data, `PWAD` for patches
    pub magic: [u8; 4],

    /// The number of lumps
    pub lumps: i32,

    /// The offset of the directory from the start of the file
    pub directory: i32,
}

/// WAD directory record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct WadRecord {
    pub offset: i32,
    pub size: i32,
    pub name: [u8; NAME_LEN],
}

/// Codec for Doom IWAD and PWAD archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Wad;

fn is_wad_magic(magic: &[u8]) -> bool {
    magic == b"IWAD" || magic == b"PWAD"
}

impl Wad {
    fn read_header(data: &[u8]) -> Result<(WadHeader, usize, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::invalid_header(
                ID,
                format!("need {HEADER_SIZE} bytes, got {}", data.len()),
            ));
        }

        let header = WadHeader::read(&mut io::Cursor::new(&data[..HEADER_SIZE]))?;
        if !is_wad_magic(&header.magic) {
            return Err(Error::invalid_header(ID, "missing IWAD or PWAD magic"));
        }
        match (
            usize::try_from(header.lumps),
            usize::try_from(header.directory),
        ) {
            (Ok(lumps), Ok(directory)) => Ok((header, lumps, directory)),
            _ => Err(Error::invalid_header(
                ID,
                format!(
                    "negative lump count {} or directory offset {}",
                    header.lumps, header.directory
                ),
            )),
        }
    }

    /// Parse and validate the whole directory
    fn read_table(data: &[u8]) -> Result<(WadHeader, Vec<TableEntry>)> {
        let (header, lumps, directory) = Self::read_header(data)?;

        let table_end = lumps
            .checked_mul(RECORD_SIZE)
            .and_then(|len| len.checked_add(directory))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::CorruptEntry {
                index: data.len().saturating_sub(directory) / RECORD_SIZE,
                name: String::new(),
                reason: format!(
                    "directory of {lumps} lumps at {directory} is past the end of the archive ({} bytes)",
                    data.len()
                ),
            })?;

        let mut cursor = BinaryCursor::new(data[directory..table_end].to_vec());
        let table = (0..lumps)
            .map(|index| {
                let record = WadRecord::read(&mut io::Cursor::new(cursor.read(RECORD_SIZE)?))?;
                let raw_name = name_field(&record.name, NAME_LEN).to_vec();
                let name = decode_name(&raw_name);
                let corrupt = |reason: String| Error::CorruptEntry {
                    index,
                    name: name.clone(),
                    reason,
                };

                let (Ok(offset), Ok(size)) =
                    (u64::try_from(record.offset), u64::try_from(record.size))
                else {
                    return Err(corrupt(format!(
                        "negative offset {} or size {}",
                        record.offset, record.size
                    )));
                };
                if offset + size > data.len() as u64 {
                    return Err(corrupt(format!(
                        "data at {offset}..{} is past the end of the archive ({} bytes)",
                        offset + size,
                        data.len()
                    )));
                }

                Ok(TableEntry {
                    raw_name,
                    name,
                    size,
                    offset,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((header, table))
    }
}

impl Codec for Wad {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, data: &[u8]) -> bool {
        Self::read_header(data).is_ok_and(|(_, lumps, directory)| {
            lumps
                .checked_mul(RECORD_SIZE)
                .and_then(|len| len.checked_add(directory))
                .is_some_and(|end| end <= data.len())
        })
    }

    #[instrument(skip_all, fields(len = data.len()), err)]
    fn read(&self, data: &[u8], tree: &mut EntryTree, context: &mut ReadContext<'_>) -> Result<()> {
        tree.clear();
        let (header, table) =
            Self::read_table(data).inspect_err(|e| error!(%e, "rejected archive"))?;
        debug!(lumps = table.len(), "read directory");

        populate(tree, data, table, context, |_| {})?;
        let kind = String::from_utf8_lossy(&header.magic).into_owned();
        tree.mute().set_property(WAD_KIND, kind);
        Ok(())
    }

    #[instrument(skip_all, fields(entries = tree.len()), err)]
    fn write(&self, tree: &EntryTree) -> Result<Encoded> {
        let entries = tree.flatten();
        let lumps = i32::try_from(entries.len()).map_err(|_| Error::TooManyEntries {
            format: ID,
            count: entries.len(),
            max: i32::MAX as usize,
        })?;

        let payloads = entries
            .iter()
            .map(|(path, entry)| Ok((path.as_str(), entry.disk_name(), payload(path, entry)?)))
            .collect::<Result<Vec<_>>>()?;
        let directory = HEADER_SIZE + payloads.iter().map(|(_, _, data)| data.len()).sum::<usize>();
        let total = directory + RECORD_SIZE * payloads.len();
        if i32::try_from(total).is_err() {
            return Err(Error::Unsupported {
                format: ID,
                operation: "archives larger than 2 GiB",
            });
        }

        let magic = match tree.property(WAD_KIND).and_then(|v| v.as_str()) {
            Some("IWAD") => *b"IWAD",
            _ => *b"PWAD",
        };

        let mut encoded = Encoded::default();
        let mut cursor = BinaryCursor::zeroed(total);

        let mut header = io::Cursor::new(Vec::with_capacity(HEADER_SIZE));
        WadHeader {
            magic,
            lumps,
            directory: directory as i32,
        }
        .write(&mut header)?;
        cursor.write(header.get_ref())?;

        let mut records = Vec::with_capacity(payloads.len());
        for (path, name, data) in &payloads {
            let offset = cursor.position();
            cursor.write(data)?;

            let name = fit_name(name, NAME_LEN, &mut encoded.warnings);
            let mut field = [0u8; NAME_LEN];
            field[..name.len()].copy_from_slice(name);
            records.push(WadRecord {
                offset: offset as i32,
                size: data.len() as i32,
                name: field,
            });
            encoded.offsets.push((path.to_string(), offset as u64));
        }

        let mut table = io::Cursor::new(Vec::with_capacity(RECORD_SIZE * records.len()));
        records.write_le(&mut table)?;
        cursor.write(table.get_ref())?;

        encoded.data = cursor.into_inner();
        Ok(encoded)
    }
}
