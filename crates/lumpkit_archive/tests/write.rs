use lumpkit_archive::error::{Error, Result};
use lumpkit_archive::format::chasm_bin::{ChasmBin, MAX_ENTRIES, TABLE_SIZE};
use lumpkit_archive::format::wad::{Wad, WAD_KIND};
use lumpkit_archive::{Archive, Codec, Entry, EntryState, OpenOptions};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn filled(count: usize) -> Result<Archive> {
    let mut archive = Archive::create_format("chasm_bin")?;
    {
        let mut bulk = archive.bulk_update();
        for i in 0..count {
            bulk.add_entry("", Entry::new(format!("E{i:05}"), vec![i as u8]))?;
        }
    }
    Ok(archive)
}

#[test]
fn capacity_is_enforced() -> Result<()> {
    let mut full = filled(MAX_ENTRIES)?;
    let encoded = full.export(&ChasmBin)?;
    assert_eq!(encoded.data.len(), TABLE_SIZE + MAX_ENTRIES);

    let mut over = filled(MAX_ENTRIES + 1)?;
    assert!(matches!(
        over.export(&ChasmBin),
        Err(Error::TooManyEntries { count: 2049, max: 2048, .. })
    ));
    Ok(())
}

#[test]
fn too_many_entries_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("FULL.BIN");

    let mut over = filled(MAX_ENTRIES + 1)?;
    assert!(over.save_as(&path).is_err());
    assert!(!path.exists());
    Ok(())
}

#[traced_test]
#[test]
fn long_names_are_truncated_with_a_warning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("NAMES.BIN");

    let mut archive = Archive::create_format("chasm_bin")?;
    archive.add_entry("", Entry::new("LONGFILENAME.TXT", b"text".to_vec()))?;
    archive.add_entry("", Entry::new("SHORT.TXT", b"more".to_vec()))?;

    let warnings = archive.save_as(&path)?;
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        Error::NameTooLong { truncated, .. } if truncated == "LONGFILENAME"
    ));
    assert!(logs_contain("entry name too long"));

    let reopened = Archive::open(&path, &OpenOptions::default())?;
    let names = reopened
        .entries()
        .into_iter()
        .map(|(path, _)| path)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["LONGFILENAME", "SHORT.TXT"]);
    Ok(())
}

#[test]
fn save_updates_offsets_and_states() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("NEW.BIN");

    let mut archive = Archive::create_format("chasm_bin")?;
    archive.add_entry("", Entry::new("A.TXT", b"alpha".to_vec()))?;
    archive.add_entry("", Entry::new("B.TXT", b"beta".to_vec()))?;
    assert!(archive.is_modified());

    archive.save_as(&path)?;

    assert!(!archive.is_modified());
    assert_eq!(archive.path(), Some(path.as_path()));
    assert_eq!(archive.entry("A.TXT").and_then(Entry::offset), Some(43014));
    assert_eq!(archive.entry("B.TXT").and_then(Entry::offset), Some(43019));
    assert_eq!(archive.entry("B.TXT").map(Entry::state), Some(EntryState::Unmodified));

    // Saved entries can be released and fetched again from the new file
    assert_eq!(archive.unload_unmodified(), 9);
    assert_eq!(archive.entry_data("B.TXT")?, b"beta");
    assert_eq!(std::fs::read(&path)?.len(), TABLE_SIZE + 9);
    Ok(())
}

#[test]
fn resave_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("EDIT.BIN");

    let mut archive = Archive::create_format("chasm_bin")?;
    archive.add_entry("", Entry::new("A.TXT", b"alpha".to_vec()))?;
    archive.add_entry("", Entry::new("B.TXT", b"beta".to_vec()))?;
    archive.save_as(&path)?;
    archive.unload_unmodified();

    let mut archive = Archive::open(&path, &OpenOptions::default())?;
    archive.remove_entry("A.TXT")?;
    archive.set_entry_data("B.TXT", b"BETA!".to_vec())?;
    archive.add_entry("", Entry::new("C.TXT", b"gamma".to_vec()))?;
    archive.save()?;

    let mut reopened = Archive::open(&path, &OpenOptions::default())?;
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.entry_data("B.TXT")?, b"BETA!");
    assert_eq!(reopened.entry_data("C.TXT")?, b"gamma");
    Ok(())
}

#[test]
fn wad_round_trip_keeps_kind() -> Result<()> {
    let mut archive = Archive::create_format("wad")?;
    archive.set_property(WAD_KIND, "IWAD");
    archive.add_entry("", Entry::new("MAP01", Vec::new()))?;
    archive.add_entry("", Entry::new("THINGS", vec![0x01, 0x00, 0x02, 0x00]))?;

    let encoded = archive.export(&Wad)?;
    assert_eq!(&encoded.data[..4], b"IWAD");

    let mut reread = Archive::open_bytes(encoded.data, &OpenOptions::default())?;
    assert_eq!(reread.format().id, "wad");
    assert_eq!(
        reread.property(WAD_KIND).and_then(|v| v.as_str()),
        Some("IWAD")
    );
    assert_eq!(reread.entry_data("THINGS")?, &[0x01, 0x00, 0x02, 0x00]);
    Ok(())
}

#[test]
fn export_between_formats() -> Result<()> {
    let mut archive = Archive::create_format("chasm_bin")?;
    archive.add_entry("", Entry::new("SCRIPT.TXT", b"print".to_vec()))?;
    archive.add_entry("", Entry::new("GUN.RAW", vec![0xFF; 3]))?;

    let wad = archive.export(&Wad)?;
    assert_eq!(wad.warnings.len(), 1);
    assert_eq!(archive.codec().id(), "chasm_bin");
    assert_eq!(archive.entry("GUN.RAW").map(Entry::state), Some(EntryState::New));

    let mut converted = Archive::open_bytes(wad.data, &OpenOptions::default())?;
    let names = converted
        .entries()
        .into_iter()
        .map(|(p, _)| p)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["SCRIPT.T", "GUN.RAW"]);
    assert_eq!(converted.entry_data("GUN.RAW")?, &[0xFF; 3]);
    Ok(())
}

#[test]
fn wad_probe_does_not_claim_chasm_data() -> Result<()> {
    let mut archive = Archive::create_format("chasm_bin")?;
    archive.add_entry("", Entry::new("A", vec![1]))?;
    let encoded = archive.export(&ChasmBin)?;

    assert!(ChasmBin.probe(&encoded.data));
    assert!(!Wad.probe(&encoded.data));
    Ok(())
}
