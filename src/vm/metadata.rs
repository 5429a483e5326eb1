//! Metadata ISO generation for `--data`.
//!
//! The payload is packed as the single file `config` of a minimal ISO 9660
//! (level 1) image written to `<state>/data.iso`. The guest mounts the CD-ROM
//! and reads the file; nothing else about the image is meaningful.
//!
//! ## Layout (2048-byte sectors)
//!
//! ```text
//! 0..16   system area (zeroed)
//! 16      primary volume descriptor
//! 17      volume descriptor set terminator
//! 18      type-L path table (little endian)
//! 19      type-M path table (big endian)
//! 20      root directory extent
//! 21..    file data
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::error::{LaunchError, Result};

/// File name of the generated image inside the state directory.
pub const METADATA_ISO: &str = "data.iso";
/// Volume identifier of the generated image.
pub const VOLUME_ID: &str = "CONFIG";

const SECTOR: usize = 2048;
const PVD_SECTOR: usize = 16;
const TERMINATOR_SECTOR: usize = 17;
const L_PATH_TABLE_SECTOR: usize = 18;
const M_PATH_TABLE_SECTOR: usize = 19;
const ROOT_SECTOR: usize = 20;
const DATA_SECTOR: usize = 21;

const PATH_TABLE_SIZE: u32 = 10;
const FILE_IDENTIFIER: &[u8] = b"CONFIG.;1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Interpret `--data`: a path to an existing regular file yields its
/// contents, a string that names nothing is taken as the literal payload.
/// Any other existing path (directory, device, socket) is rejected.
pub fn load_payload(data: &str) -> Result<Vec<u8>> {
    let path = Path::new(data);
    let metadata_err = |source| LaunchError::Metadata {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => std::fs::read(path).map_err(metadata_err),
        Ok(_) => Err(metadata_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "--data names an existing path that is not a regular file",
        ))),
        // Nothing there (or a literal too long to be a path name).
        Err(_) => Ok(data.as_bytes().to_vec()),
    }
}

/// Write `payload` as `<state_dir>/data.iso` and return the image path.
pub fn write_metadata_iso(state_dir: &Path, payload: &[u8]) -> Result<PathBuf> {
    let path = state_dir.join(METADATA_ISO);
    let image = build_iso(payload, Utc::now()).map_err(|source| LaunchError::Metadata {
        path: path.clone(),
        source,
    })?;

    std::fs::write(&path, &image).map_err(|source| LaunchError::Metadata {
        path: path.clone(),
        source,
    })?;

    info!(
        path = %path.display(),
        payload_bytes = payload.len(),
        "wrote metadata ISO"
    );
    Ok(path)
}

// ---------------------------------------------------------------------------
// ISO 9660 encoding
// ---------------------------------------------------------------------------

/// Encode `payload` as a single-file ISO 9660 image.
///
/// Fails with `InvalidInput` when the payload does not fit the 32-bit size
/// fields of the format.
pub fn build_iso(payload: &[u8], created: DateTime<Utc>) -> io::Result<Vec<u8>> {
    let (file_size, total_sectors) = iso_sizes(payload.len()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes is too large for ISO 9660", payload.len()),
        )
    })?;
    let mut image = vec![0u8; total_sectors as usize * SECTOR];

    let recorded = recording_date(&created);

    write_primary_descriptor(
        sector_mut(&mut image, PVD_SECTOR),
        total_sectors,
        &recorded,
        &created,
    );

    let terminator = sector_mut(&mut image, TERMINATOR_SECTOR);
    terminator[0] = 255;
    terminator[1..6].copy_from_slice(b"CD001");
    terminator[6] = 1;

    write_path_table(sector_mut(&mut image, L_PATH_TABLE_SECTOR), false);
    write_path_table(sector_mut(&mut image, M_PATH_TABLE_SECTOR), true);

    let root = sector_mut(&mut image, ROOT_SECTOR);
    let mut offset = 0;
    for record in [
        directory_record(ROOT_SECTOR as u32, SECTOR as u32, 2, &[0x00], &recorded),
        directory_record(ROOT_SECTOR as u32, SECTOR as u32, 2, &[0x01], &recorded),
        directory_record(
            DATA_SECTOR as u32,
            file_size,
            0,
            FILE_IDENTIFIER,
            &recorded,
        ),
    ] {
        root[offset..offset + record.len()].copy_from_slice(&record);
        offset += record.len();
    }

    let data_start = DATA_SECTOR * SECTOR;
    image[data_start..data_start + payload.len()].copy_from_slice(payload);

    Ok(image)
}

/// File size and total sector count for a payload of `len` bytes, if both
/// fit in 32 bits.
fn iso_sizes(len: usize) -> Option<(u32, u32)> {
    let file_size = u32::try_from(len).ok()?;
    let total_sectors = u32::try_from(DATA_SECTOR + len.div_ceil(SECTOR)).ok()?;
    Some((file_size, total_sectors))
}

fn sector_mut(image: &mut [u8], index: usize) -> &mut [u8] {
    &mut image[index * SECTOR..(index + 1) * SECTOR]
}

fn write_primary_descriptor(
    pvd: &mut [u8],
    total_sectors: u32,
    recorded: &[u8; 7],
    created: &DateTime<Utc>,
) {
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1;
    pad(&mut pvd[8..40], b"");
    pad(&mut pvd[40..72], VOLUME_ID.as_bytes());
    both_u32(&mut pvd[80..88], total_sectors);
    both_u16(&mut pvd[120..124], 1);
    both_u16(&mut pvd[124..128], 1);
    both_u16(&mut pvd[128..132], SECTOR as u16);
    both_u32(&mut pvd[132..140], PATH_TABLE_SIZE);
    pvd[140..144].copy_from_slice(&(L_PATH_TABLE_SECTOR as u32).to_le_bytes());
    pvd[148..152].copy_from_slice(&(M_PATH_TABLE_SECTOR as u32).to_be_bytes());

    let root = directory_record(ROOT_SECTOR as u32, SECTOR as u32, 2, &[0x00], recorded);
    pvd[156..156 + root.len()].copy_from_slice(&root);

    // volume set, publisher, preparer, application, copyright/abstract/biblio
    pad(&mut pvd[190..813], b"");

    let stamp = descriptor_date(created);
    pvd[813..830].copy_from_slice(&stamp);
    pvd[830..847].copy_from_slice(&stamp);
    pvd[847..864].copy_from_slice(&unset_date());
    pvd[864..881].copy_from_slice(&unset_date());
    pvd[881] = 1;
}

fn write_path_table(table: &mut [u8], big_endian: bool) {
    table[0] = 1;
    let extent = ROOT_SECTOR as u32;
    if big_endian {
        table[2..6].copy_from_slice(&extent.to_be_bytes());
        table[6..8].copy_from_slice(&1u16.to_be_bytes());
    } else {
        table[2..6].copy_from_slice(&extent.to_le_bytes());
        table[6..8].copy_from_slice(&1u16.to_le_bytes());
    }
}

fn directory_record(
    extent: u32,
    size: u32,
    flags: u8,
    identifier: &[u8],
    recorded: &[u8; 7],
) -> Vec<u8> {
    let len = 33 + identifier.len() + (identifier.len() + 1) % 2;
    let mut record = vec![0u8; len];
    record[0] = len as u8;
    both_u32(&mut record[2..10], extent);
    both_u32(&mut record[10..18], size);
    record[18..25].copy_from_slice(recorded);
    record[25] = flags;
    both_u16(&mut record[28..32], 1);
    record[32] = identifier.len() as u8;
    record[33..33 + identifier.len()].copy_from_slice(identifier);
    record
}

fn both_u32(field: &mut [u8], value: u32) {
    field[..4].copy_from_slice(&value.to_le_bytes());
    field[4..8].copy_from_slice(&value.to_be_bytes());
}

fn both_u16(field: &mut [u8], value: u16) {
    field[..2].copy_from_slice(&value.to_le_bytes());
    field[2..4].copy_from_slice(&value.to_be_bytes());
}

fn pad(field: &mut [u8], text: &[u8]) {
    field.fill(b' ');
    field[..text.len()].copy_from_slice(text);
}

fn recording_date(t: &DateTime<Utc>) -> [u8; 7] {
    [
        (t.year() - 1900).clamp(0, 255) as u8,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
        0,
    ]
}

fn descriptor_date(t: &DateTime<Utc>) -> [u8; 17] {
    let mut date = [0u8; 17];
    let digits = t.format("%Y%m%d%H%M%S00").to_string();
    date[..16].copy_from_slice(&digits.as_bytes()[..16]);
    date
}

fn unset_date() -> [u8; 17] {
    let mut date = [b'0'; 17];
    date[16] = 0;
    date
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap()
    }

    fn le_u32(bytes: &[u8]) -> u32 {
        u32::from_le_bytes(bytes[..4].try_into().unwrap())
    }

    #[test]
    fn descriptors_carry_signatures() {
        let image = build_iso(b"hello", fixed_time()).unwrap();

        let pvd = &image[PVD_SECTOR * SECTOR..];
        assert_eq!(pvd[0], 1);
        assert_eq!(&pvd[1..6], b"CD001");
        assert_eq!(&pvd[40..46], b"CONFIG");
        assert_eq!(&pvd[813..829], b"2026011510300000");

        let terminator = &image[TERMINATOR_SECTOR * SECTOR..];
        assert_eq!(terminator[0], 255);
        assert_eq!(&terminator[1..6], b"CD001");
    }

    #[test]
    fn volume_size_matches_image_length() {
        let payload = vec![0xabu8; SECTOR + 1];
        let image = build_iso(&payload, fixed_time()).unwrap();

        assert_eq!(image.len(), (DATA_SECTOR + 2) * SECTOR);
        let pvd = &image[PVD_SECTOR * SECTOR..];
        assert_eq!(le_u32(&pvd[80..]) as usize, DATA_SECTOR + 2);
        assert_eq!(&pvd[84..88], &((DATA_SECTOR + 2) as u32).to_be_bytes());
    }

    #[test]
    fn payload_is_stored_after_root_directory() {
        let payload = br#"{"hostname":"guest"}"#;
        let image = build_iso(payload, fixed_time()).unwrap();

        let start = DATA_SECTOR * SECTOR;
        assert_eq!(&image[start..start + payload.len()], payload);
    }

    #[test]
    fn root_directory_lists_config_file() {
        let payload = b"abc";
        let image = build_iso(payload, fixed_time()).unwrap();
        let root = &image[ROOT_SECTOR * SECTOR..(ROOT_SECTOR + 1) * SECTOR];

        // "." and ".." are 34 bytes each
        assert_eq!(root[0], 34);
        assert_eq!(root[33], 0x00);
        assert_eq!(root[34], 34);
        assert_eq!(root[34 + 33], 0x01);

        let file = &root[68..];
        assert_eq!(file[32] as usize, FILE_IDENTIFIER.len());
        assert_eq!(&file[33..33 + FILE_IDENTIFIER.len()], FILE_IDENTIFIER);
        assert_eq!(le_u32(&file[2..]), DATA_SECTOR as u32);
        assert_eq!(le_u32(&file[10..]), payload.len() as u32);
        assert_eq!(file[0] % 2, 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_payload_is_rejected() {
        assert_eq!(iso_sizes(0), Some((0, DATA_SECTOR as u32)));
        assert_eq!(
            iso_sizes(u32::MAX as usize),
            Some((u32::MAX, (DATA_SECTOR + (u32::MAX as usize).div_ceil(SECTOR)) as u32))
        );
        assert_eq!(iso_sizes(u32::MAX as usize + 1), None);
    }

    #[test]
    fn empty_payload_still_produces_valid_image() {
        let image = build_iso(b"", fixed_time()).unwrap();
        assert_eq!(image.len(), DATA_SECTOR * SECTOR);
    }

    #[test]
    fn literal_payload_when_no_file() {
        let payload = load_payload("{\"ssh\":\"key\"}").unwrap();
        assert_eq!(payload, b"{\"ssh\":\"key\"}");
    }

    #[test]
    fn file_payload_is_read() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("userdata");
        std::fs::write(&file, b"from-file").unwrap();

        let payload = load_payload(file.to_str().unwrap()).unwrap();
        assert_eq!(payload, b"from-file");
    }

    #[test]
    fn directory_is_not_a_literal_payload() {
        let tmp = tempfile::tempdir().unwrap();

        let err = load_payload(tmp.path().to_str().unwrap()).unwrap_err();
        match err {
            LaunchError::Metadata { path, source } => {
                assert_eq!(path, tmp.path());
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
            }
            other => panic!("expected Metadata, got {other:?}"),
        }
    }

    #[test]
    fn writes_image_into_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_metadata_iso(tmp.path(), b"meta").unwrap();

        assert_eq!(path, tmp.path().join(METADATA_ISO));
        let image = std::fs::read(&path).unwrap();
        assert_eq!(&image[PVD_SECTOR * SECTOR + 1..PVD_SECTOR * SECTOR + 6], b"CD001");
    }
}
