//! Error handling tests.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;
use xda::{Archive, ArchiveError, DocumentConfig, Ecs, ItemSource};

fn test_archive(dir: &TempDir) -> Archive {
    let mut archive = Archive::new();
    archive.create_default(dir.path().join("test.xda")).unwrap();
    archive
}

fn patch(path: &std::path::Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

// --- No Document ---

#[test]
fn test_operations_without_document() {
    let mut archive = Archive::new();

    assert!(matches!(archive.delete_item("\\a"), Err(ArchiveError::NoDocument)));
    assert!(matches!(
        archive.save_as("/tmp/never.xda", 4, true, true),
        Err(ArchiveError::NoDocument)
    ));
    assert!(matches!(archive.has_item("\\a"), Err(ArchiveError::NoDocument)));
    assert!(matches!(archive.verify(), Err(ArchiveError::NoDocument)));
    assert!(matches!(
        archive.bits_param(),
        Err(ArchiveError::NotInitialized("header"))
    ));
    assert!(matches!(
        archive.major_version(),
        Err(ArchiveError::NotInitialized(_))
    ));
}

#[test]
fn test_operations_after_close() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    archive.close().unwrap();

    assert!(!archive.is_open());
    assert!(matches!(
        archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()),
        Err(ArchiveError::NoDocument)
    ));
}

// --- Operator Sequences ---

#[test]
fn test_mutation_of_missing_item() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);

    assert!(matches!(
        archive.append_item("\\a", b"x".to_vec(), Ecs::raw()),
        Err(ArchiveError::ItemNotFound(_))
    ));
    assert!(matches!(
        archive.replace_item("\\a", b"x".to_vec(), Ecs::raw()),
        Err(ArchiveError::ItemNotFound(_))
    ));
    assert!(matches!(
        archive.delete_item("\\a"),
        Err(ArchiveError::ItemNotFound(_))
    ));
    assert!(!archive.document().unwrap().has_pending_changes());
}

#[test]
fn test_invalid_sequences_leave_state_alone() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);

    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    assert!(matches!(
        archive.insert_item("\\a", b"y".to_vec(), Ecs::raw()),
        Err(ArchiveError::InvalidOperation { .. })
    ));

    archive.delete_item("\\a").unwrap();
    assert!(matches!(
        archive.delete_item("\\a"),
        Err(ArchiveError::InvalidOperation { .. })
    ));
    assert!(matches!(
        archive.append_item("\\a", b"z".to_vec(), Ecs::raw()),
        Err(ArchiveError::InvalidOperation { .. })
    ));
    assert!(matches!(
        archive.replace_item("\\a", b"z".to_vec(), Ecs::raw()),
        Err(ArchiveError::InvalidOperation { .. })
    ));

    // Insert then delete in one session writes no entry, only the header
    assert!(archive.save_default().unwrap().is_none());
    assert_eq!(archive.entry_count().unwrap(), 0);
    assert_eq!(fs::metadata(dir.path().join("test.xda")).unwrap().len(), 22 + 4);

    archive.close().unwrap();
    archive.open(dir.path().join("test.xda")).unwrap();
    assert_eq!(archive.entry_count().unwrap(), 0);
    assert!(archive.all_logically_existing_paths().unwrap().is_empty());
}

#[test]
fn test_invalid_sequence_after_reopen() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();
    archive.close().unwrap();
    archive.open(dir.path().join("test.xda")).unwrap();

    assert!(matches!(
        archive.insert_item("\\a", b"y".to_vec(), Ecs::raw()),
        Err(ArchiveError::InvalidOperation { .. })
    ));
}

// --- Paths And Sources ---

#[test]
fn test_invalid_item_paths() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    let long = format!("\\{}", "a".repeat(300));

    for path in ["", "a.txt", "\\a\\\\b", "\\a:b", "\\a?", long.as_str()] {
        assert!(
            matches!(
                archive.insert_item(path, b"x".to_vec(), Ecs::raw()),
                Err(ArchiveError::InvalidPath(_))
            ),
            "{:?} should be rejected",
            path
        );
    }
}

#[test]
fn test_file_source_must_exist() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ItemSource::file(dir.path().join("missing.bin")),
        Err(ArchiveError::InvalidFilePath(_))
    ));
    assert!(matches!(
        ItemSource::file(dir.path()),
        Err(ArchiveError::InvalidFilePath(_))
    ));
}

#[test]
fn test_open_missing_file() {
    let dir = TempDir::new().unwrap();
    let mut archive = Archive::new();
    assert!(matches!(
        archive.open(dir.path().join("missing.xda")),
        Err(ArchiveError::InvalidFilePath(_))
    ));
}

#[test]
fn test_save_as_onto_open_file() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();

    assert!(matches!(
        archive.save_as(dir.path().join("test.xda"), 4, true, true),
        Err(ArchiveError::InvalidFilePath(_))
    ));
    assert_eq!(archive.extract("\\a").unwrap(), b"x");
}

// --- Header ---

#[test]
fn test_invalid_bits_param() {
    let dir = TempDir::new().unwrap();
    let mut archive = Archive::new();
    for bits in [1u8, 3, 16] {
        assert!(matches!(
            archive.create(dir.path().join("bad.xda"), bits),
            Err(ArchiveError::InvalidBitsParam(b)) if b == bits
        ));
    }
}

#[test]
fn test_invalid_name_table_type() {
    let dir = TempDir::new().unwrap();
    let config = DocumentConfig {
        name_table_type: 0x03,
        ..Default::default()
    };
    let mut archive = Archive::with_config(config);
    assert!(matches!(
        archive.create(dir.path().join("bad.xda"), 4),
        Err(ArchiveError::InvalidNameTableType(0x03))
    ));
}

#[test]
fn test_invalid_rights_info() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.xda");
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();
    archive.close().unwrap();

    patch(&path, 0, b"@XDB");
    assert!(matches!(
        archive.open(&path),
        Err(ArchiveError::InvalidRightsInfo)
    ));
}

#[test]
fn test_empty_file_is_not_an_archive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.xda");
    fs::write(&path, b"").unwrap();

    let mut archive = Archive::new();
    assert!(archive.open(&path).is_err());
    assert!(!archive.is_open());
}

// --- Chain Damage ---

#[test]
fn test_entry_count_short_of_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.xda");
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();
    archive.append_item("\\a", b"y".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();
    let second = archive.entries().unwrap()[1].position;
    archive.close().unwrap();

    // Claim a single entry; its next link then points past the chain end
    patch(&path, 16, &1u32.to_le_bytes());
    assert!(matches!(
        archive.open(&path),
        Err(ArchiveError::InvalidNextField(next)) if next == second
    ));
}

#[test]
fn test_damaged_entry_class_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.xda");
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    let first = archive.save_default().unwrap().unwrap().position;
    archive.close().unwrap();

    patch(&path, first, b"XXXX");
    assert!(matches!(
        archive.open(&path),
        Err(ArchiveError::InvalidEntryClassType(pos)) if pos == first
    ));
}

#[test]
fn test_damaged_backing_store_class_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.xda");
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    let bs_offset = archive.save_default().unwrap().unwrap().bs_offset;
    archive.close().unwrap();

    patch(&path, bs_offset, b"XXXX");
    assert!(matches!(
        archive.open(&path),
        Err(ArchiveError::InvalidBackingStoreClassType(pos)) if pos == bs_offset
    ));
}

// --- Extraction ---

#[test]
fn test_extract_deleted_and_missing() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    archive.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.delete_item("\\a").unwrap();

    assert!(matches!(
        archive.extract("\\a"),
        Err(ArchiveError::CannotExtract(_))
    ));
    assert!(matches!(
        archive.extract("\\b"),
        Err(ArchiveError::ItemNotFound(_))
    ));
}

#[test]
fn test_malformed_paths_on_reads() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);
    archive.insert_item("\\dir\\a.txt", b"x".to_vec(), Ecs::raw()).unwrap();
    archive.save_default().unwrap();

    for path in ["a.txt", "\\dir\\", "dir\\a.txt", ""] {
        assert!(
            matches!(archive.extract(path), Err(ArchiveError::InvalidPath(_))),
            "{:?} should be rejected on extract",
            path
        );
        assert!(
            matches!(archive.has_item(path), Err(ArchiveError::InvalidPath(_))),
            "{:?} should be rejected on lookup",
            path
        );
    }

    // Well-formed but absent paths stay distinct from malformed ones
    assert!(matches!(
        archive.extract("\\dir\\b.txt"),
        Err(ArchiveError::ItemNotFound(_))
    ));
    assert!(!archive.has_item("\\dir\\b.txt").unwrap());
}

#[test]
fn test_invalid_ecs() {
    assert!(matches!(Ecs::new(vec![]), Err(ArchiveError::InvalidEcs(_))));
    assert!(matches!(
        Ecs::new(vec![0xFF, 0x02]),
        Err(ArchiveError::InvalidEcs(_))
    ));
    assert!(matches!(
        Ecs::new(vec![0x02; 20].into_iter().chain([0xFF]).collect::<Vec<_>>()),
        Err(ArchiveError::InvalidEcs(_))
    ));
}

#[test]
fn test_strict_codecs() {
    let dir = TempDir::new().unwrap();
    let config = DocumentConfig {
        strict_codecs: true,
        ..Default::default()
    };
    let mut archive = Archive::with_config(config);
    archive.create_default(dir.path().join("test.xda")).unwrap();

    let unknown = Ecs::new(vec![0x7A, 0xFF]).unwrap();
    assert!(matches!(
        archive.insert_item("\\a", b"x".to_vec(), unknown),
        Err(ArchiveError::UnknownCodec(0x7A))
    ));
}

#[test]
fn test_lenient_codecs_pass_unknown_tags_through() {
    let dir = TempDir::new().unwrap();
    let mut archive = test_archive(&dir);

    let unknown = Ecs::new(vec![0x7A, 0xFF]).unwrap();
    archive.insert_item("\\a", b"as-is".to_vec(), unknown).unwrap();
    archive.save_default().unwrap();
    assert_eq!(archive.extract("\\a").unwrap(), b"as-is");
}

// --- Locking ---

#[test]
fn test_second_handle_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.xda");
    let mut first = test_archive(&dir);
    first.insert_item("\\a", b"x".to_vec(), Ecs::raw()).unwrap();
    first.save_default().unwrap();

    let mut second = Archive::new();
    assert!(matches!(second.open(&path), Err(ArchiveError::Locked)));

    first.close().unwrap();
    second.open(&path).unwrap();
    assert_eq!(second.extract("\\a").unwrap(), b"x");
}
