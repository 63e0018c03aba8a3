//! End-to-end image sessions: load, patch, relocate, save

use rompatch_rs::{
    ByteCursor, ExecutableRegion, FileSlot, NarcArchive, OffsetTable, PlatformLayout, RomError,
    RomImage,
};
use tempfile::TempDir;

/// Route library logs to the test harness (RUST_LOG=debug to see them)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const FREE: u8 = 0xFF;
const BASE: u32 = 0x0200_0000;
const ANCHOR: &[u8] = b"[SDK+TEST]";

const EXE_OFFSET: usize = 0x200;
const EXE_LEN: usize = 0x200;
const SLOT_OFFSET: usize = 0x800;
const FREE_START: usize = 0xC00;
const IMAGE_LEN: usize = 0x1000;

/// Header, executable, one archive slot and trailing unused space
fn build_image() -> (Vec<u8>, PlatformLayout, NarcArchive) {
    let mut data = vec![0u8; IMAGE_LEN];
    data.write_u32_le(0x2C, EXE_LEN as u32).unwrap();

    // Executable: pointer table after the anchor, ITCM 0x100..0x140,
    // destination table at 0x1C0
    let exe = &mut data[EXE_OFFSET..EXE_OFFSET + EXE_LEN];
    for (i, byte) in exe.iter_mut().enumerate() {
        *byte = (i % 13) as u8;
    }
    exe[0x40..0x4A].copy_from_slice(ANCHOR);
    exe.write_u32_le(0x4A, BASE + 0x1C0).unwrap();
    exe.write_u32_le(0x4E, BASE + EXE_LEN as u32).unwrap();
    exe.write_u32_le(0x52, BASE + 0x100).unwrap();
    exe.write_u32_le(0x1C0, 0x01FF_8000).unwrap();
    exe.write_u32_le(0x1C4, 0x40).unwrap();

    let narc = NarcArchive::new(vec![vec![1; 16], vec![2; 8], vec![3; 4]]);
    let encoded = narc.to_bytes();
    data[SLOT_OFFSET..SLOT_OFFSET + encoded.len()].copy_from_slice(&encoded);
    data[FREE_START..].fill(FREE);

    let mut executable = ExecutableRegion::new(EXE_OFFSET, EXE_LEN);
    executable.load_address = BASE;
    executable.size_field = Some(0x2C);
    executable.tcm_anchor = Some(hex::encode(ANCHOR));

    let layout = PlatformLayout::new(FREE)
        .with_executable(executable)
        .with_slot("narc", FileSlot::new(SLOT_OFFSET, encoded.len()))
        .with_free_space_start(FREE_START);

    (data, layout, narc)
}

#[test]
fn test_save_and_reload() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("game.nds");
    let (data, layout, _) = build_image();
    std::fs::write(&path, &data).unwrap();

    let mut rom = RomImage::load(&path, layout.clone()).unwrap();
    assert_eq!(rom.source(), Some(path.as_path()));
    let offset = rom.allocate_and_write(b"PATCH!", FREE_START).unwrap();
    rom.save(&path).unwrap();

    assert!(!dir.path().join("game.nds.tmp").exists());
    let reloaded = RomImage::load(&path, layout).unwrap();
    assert_eq!(reloaded.read_bytes(offset, 6).unwrap(), b"PATCH!");
    assert_eq!(reloaded.as_bytes(), rom.as_bytes());
}

#[test]
fn test_failed_save_keeps_original() {
    let dir = TempDir::new().unwrap();
    let (data, layout, _) = build_image();
    let rom = RomImage::from_bytes(data, layout).unwrap();

    let missing = dir.path().join("no-such-dir").join("game.nds");
    assert!(matches!(rom.save(&missing), Err(RomError::Io(_))));
    assert!(!missing.exists());
}

#[test]
fn test_layout_rejects_small_image() {
    let (data, layout, _) = build_image();
    let result = RomImage::from_bytes(data[..0x300].to_vec(), layout);
    assert!(matches!(result, Err(RomError::InvalidLayout(_))));
}

#[test]
fn test_write_archive_in_place_frees_tail() {
    let (data, layout, mut narc) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();
    let old = rom.layout().slot("narc").unwrap();

    narc.set(0, vec![9; 4]).unwrap();
    let slot = rom.write_archive("narc", &narc).unwrap();

    assert_eq!(slot.offset, old.offset);
    assert_eq!(slot.length, old.length - 12);
    assert_eq!(rom.read_archive("narc").unwrap(), narc);
    assert!(rom
        .read_bytes(slot.end(), 12)
        .unwrap()
        .iter()
        .all(|&b| b == FREE));
    assert_eq!(rom.diagnostics().free_bytes, 12);
}

#[test]
fn test_write_archive_moves_when_grown() {
    init_tracing();
    let (data, layout, mut narc) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();
    let old = rom.layout().slot("narc").unwrap();

    narc.set(2, vec![7; 64]).unwrap();
    let slot = rom.write_archive("narc", &narc).unwrap();

    assert!(slot.offset >= FREE_START);
    assert_eq!(slot.offset % 4, 0);
    assert_eq!(rom.layout().slot("narc").unwrap(), slot);
    assert_eq!(rom.read_archive("narc").unwrap().get(2).unwrap(), &[7; 64]);

    // Old slot is sentinel-filled and reusable
    assert!(rom
        .read_bytes(old.offset, old.length)
        .unwrap()
        .iter()
        .all(|&b| b == FREE));
    assert_eq!(rom.allocate(8, FREE_START).unwrap(), old.offset);
}

#[test]
fn test_unknown_slot() {
    let (data, layout, narc) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();
    assert!(matches!(
        rom.write_archive("missing", &narc),
        Err(RomError::UnknownSlot(_))
    ));
}

#[test]
fn test_relocation_shifts_layout() {
    init_tracing();
    let (data, layout, narc) = build_image();
    let mut rom = RomImage::from_bytes(data.clone(), layout).unwrap();

    let outcome = rom.extend_executable(0x20).unwrap().unwrap();
    assert_eq!(outcome.gap_offset, 0x140);
    assert_eq!(rom.len(), IMAGE_LEN + 0x20);

    // Header size field and executable region
    assert_eq!(rom.as_bytes().read_u32_le(0x2C).unwrap() as usize, EXE_LEN + 0x20);
    let exe = rom.layout().executable.clone().unwrap();
    assert_eq!(exe.length, EXE_LEN + 0x20);

    // Everything after the executable moved
    assert_eq!(rom.layout().slot("narc").unwrap().offset, SLOT_OFFSET + 0x20);
    assert_eq!(rom.layout().free_space_start, FREE_START + 0x20);
    assert_eq!(rom.read_archive("narc").unwrap(), narc);
    assert_eq!(
        &rom.as_bytes()[EXE_OFFSET + EXE_LEN + 0x20..],
        &data[EXE_OFFSET + EXE_LEN..]
    );

    // Executable pointers inside the grown region
    let grown = rom.read_bytes(EXE_OFFSET, exe.length).unwrap();
    assert_eq!(grown.read_u32_le(0x4A).unwrap(), BASE + 0x1E0);
    assert_eq!(grown.read_u32_le(0x4E).unwrap(), BASE + EXE_LEN as u32 + 0x20);
    assert_eq!(grown.read_u32_le(0x1E4).unwrap(), 0x60);
}

#[test]
fn test_relocation_runs_once() {
    let (data, layout, _) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();

    rom.extend_executable(0x20).unwrap();
    let once = rom.as_bytes().to_vec();
    assert!(rom.extend_executable(0x20).unwrap().is_none());
    assert_eq!(rom.as_bytes(), once.as_slice());
    assert!(rom.diagnostics().executable_extended);
}

#[test]
fn test_relocation_repeat_after_allocation_is_noop() {
    let (data, layout, _) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();

    rom.extend_executable(0x20).unwrap().unwrap();
    let offset = rom.allocate_and_write(&[1, 2, 3, 4], FREE_START + 0x20).unwrap();
    let before = rom.as_bytes().to_vec();

    assert!(rom.extend_executable(0x20).unwrap().is_none());
    assert_eq!(rom.as_bytes(), before.as_slice());
    assert_eq!(rom.read_bytes(offset, 4).unwrap(), &[1, 2, 3, 4]);
}

#[test]
fn test_relocation_rewrites_header_offsets() {
    const FILE_TABLE: usize = 0xA00;
    let (mut data, layout, narc) = build_image();
    let slot = layout.slot("narc").unwrap();

    // Header offset past the executable, plus a two-entry file table: one
    // file after the executable, one before it
    data.write_u32_le(0x30, SLOT_OFFSET as u32).unwrap();
    data.write_u32_le(0x48, FILE_TABLE as u32).unwrap();
    data.write_u32_le(0x4C, 16).unwrap();
    data.write_u32_le(FILE_TABLE, slot.offset as u32).unwrap();
    data.write_u32_le(FILE_TABLE + 4, slot.end() as u32).unwrap();
    data.write_u32_le(FILE_TABLE + 8, 0x100).unwrap();
    data.write_u32_le(FILE_TABLE + 12, 0x140).unwrap();

    let layout = layout
        .with_offset_field(0x30)
        .with_offset_field(0x48)
        .with_offset_table(OffsetTable {
            offset_field: 0x48,
            length_field: 0x4C,
        });
    let mut rom = RomImage::from_bytes(data, layout).unwrap();
    rom.extend_executable(0x20).unwrap().unwrap();
    let bytes = rom.as_bytes();

    assert_eq!(bytes.read_u32_le(0x30).unwrap() as usize, SLOT_OFFSET + 0x20);
    assert_eq!(bytes.read_u32_le(0x4C).unwrap(), 16);

    let table = bytes.read_u32_le(0x48).unwrap() as usize;
    assert_eq!(table, FILE_TABLE + 0x20);
    let start = bytes.read_u32_le(table).unwrap() as usize;
    let end = bytes.read_u32_le(table + 4).unwrap() as usize;
    assert_eq!(NarcArchive::from_bytes(&bytes[start..end]).unwrap(), narc);
    assert_eq!(bytes.read_u32_le(table + 8).unwrap(), 0x100);
    assert_eq!(bytes.read_u32_le(table + 12).unwrap(), 0x140);
}

#[test]
fn test_relocation_rejects_table_inside_executable() {
    let (mut data, layout, _) = build_image();
    data.write_u32_le(0x48, (EXE_OFFSET + 0x10) as u32).unwrap();
    data.write_u32_le(0x4C, 8).unwrap();
    let layout = layout.with_offset_table(OffsetTable {
        offset_field: 0x48,
        length_field: 0x4C,
    });

    let mut rom = RomImage::from_bytes(data.clone(), layout).unwrap();
    assert!(matches!(
        rom.extend_executable(0x20),
        Err(RomError::InvalidLayout(_))
    ));
    assert_eq!(rom.as_bytes(), data.as_slice());
    assert!(!rom.is_executable_extended());
}

#[test]
fn test_relocation_after_free_refused() {
    let (data, layout, _) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();
    rom.free_space(FREE_START, 4).unwrap();

    assert!(matches!(
        rom.extend_executable(0x20),
        Err(RomError::SessionOrder(_))
    ));
}

#[test]
fn test_stale_free_range_falls_through() {
    init_tracing();
    let (data, layout, _) = build_image();
    let mut rom = RomImage::from_bytes(data, layout).unwrap();

    rom.free_space(0x100, 0x40).unwrap();
    // Another path overwrites the freed range without telling the allocator
    rom.write_bytes(0x110, &[0xAB]).unwrap();

    let offset = rom.allocate(0x20, FREE_START).unwrap();
    assert!(offset >= FREE_START);
    assert_eq!(rom.diagnostics().free_ranges, 0);
}
