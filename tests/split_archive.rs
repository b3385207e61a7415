use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use proptest::collection::vec;
use proptest::prelude::*;

use spanzip::io::{MIN_SPLIT_LENGTH, SplitNaming};
use spanzip::{
    CompressionMethod, EncryptionMethod, EntryOptions, EntryWriter, NoPassword, Password,
    ReadAt, ReadOptions, SplitReader, SplitWriter, ZipArchive, ZipError,
};

fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

struct SplitSet {
    path: PathBuf,
    big: Vec<u8>,
    secret: Vec<u8>,
    password: Password,
}

/// Writes two entries, each larger than one disk, to `dir/set.zip`.
fn write_split_set(dir: &Path) -> SplitSet {
    let path = dir.join("set.zip");
    let big = noise(200_000, 11);
    let secret = noise(90_000, 12);
    let password = Password::utf8("spanned");

    let sink = SplitWriter::create(&path, MIN_SPLIT_LENGTH).unwrap();
    let mut writer = EntryWriter::new(sink).unwrap();
    writer.put_next_entry("big.bin", EntryOptions::new()).unwrap();
    writer.write_all(&big).unwrap();
    writer.close_entry().unwrap();
    let options = EntryOptions::new()
        .compression(CompressionMethod::Stored)
        .encryption(EncryptionMethod::Aes, password.clone());
    writer.put_next_entry("secret.bin", options).unwrap();
    writer.write_all(&secret).unwrap();
    writer.close_entry().unwrap();
    writer.finish().unwrap();

    SplitSet {
        path,
        big,
        secret,
        password,
    }
}

#[test]
fn entries_decode_across_disk_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let set = write_split_set(dir.path());

    for disk in ["set.z01", "set.z02", "set.z03", "set.z04"] {
        assert!(dir.path().join(disk).exists(), "{disk} missing");
    }
    for disk in 1..=4 {
        let len = fs::metadata(dir.path().join(format!("set.z{disk:02}")))
            .unwrap()
            .len();
        assert!(len <= MIN_SPLIT_LENGTH);
    }
    let first = fs::read(dir.path().join("set.z01")).unwrap();
    assert_eq!(&first[..4], &0x0807_4b50u32.to_le_bytes());

    let archive = ZipArchive::open(&set.path).unwrap();
    assert!(archive.model().split_archive);
    assert!(archive.model().last_disk() >= 4);
    assert_eq!(archive.extract_to_memory(0, &set.password).unwrap(), set.big);
    assert_eq!(archive.extract_to_memory(1, &set.password).unwrap(), set.secret);
    archive.validate(&set.password).unwrap();
}

#[test]
fn small_split_archive_becomes_single_segment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.zip");
    let mut writer = EntryWriter::new(SplitWriter::create(&path, MIN_SPLIT_LENGTH).unwrap()).unwrap();
    writer.put_next_entry("note.txt", EntryOptions::new()).unwrap();
    writer.write_all(b"fits on one disk").unwrap();
    writer.finish().unwrap();

    assert!(!dir.path().join("tiny.z01").exists());
    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &0x3030_4b50u32.to_le_bytes());

    let archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.extract_to_memory(0, &NoPassword).unwrap(), b"fits on one disk");
    archive.validate(&NoPassword).unwrap();
}

#[test]
fn truncated_final_disk_is_reported() {
    for cut in [1u64, 7, 22, 300] {
        let dir = tempfile::tempdir().unwrap();
        let set = write_split_set(dir.path());
        let file = OpenOptions::new().write(true).open(&set.path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - cut).unwrap();
        drop(file);

        let result = ZipArchive::open(&set.path).and_then(|archive| archive.validate(&set.password));
        assert!(result.is_err(), "truncating {cut} bytes went unnoticed");
    }
}

#[test]
fn missing_disk_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let set = write_split_set(dir.path());
    fs::remove_file(dir.path().join("set.z01")).unwrap();

    assert!(matches!(
        ZipArchive::open(&set.path),
        Err(ZipError::MissingDisk { .. })
    ));
}

#[test]
fn numbered_parts_read_as_one_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = EntryWriter::new(std::io::Cursor::new(Vec::new())).unwrap();
    let data = noise(30_000, 5);
    writer.put_next_entry("part.bin", EntryOptions::new()).unwrap();
    writer.write_all(&data).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    // Cut post hoc, the way generic file splitters do.
    for (i, chunk) in bytes.chunks(7_000).enumerate() {
        fs::write(dir.path().join(format!("whole.zip.{:03}", i + 1)), chunk).unwrap();
    }
    let reader = SplitReader::open(&dir.path().join("whole.zip.001")).unwrap();
    assert_eq!(reader.naming(), SplitNaming::Numbered);
    let archive = ZipArchive::new(reader, ReadOptions::default()).unwrap();
    assert_eq!(archive.extract_to_memory(0, &NoPassword).unwrap(), data);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn split_reads_match_concatenation(
        lengths in vec(1usize..300, 1..6),
        offset_seed in any::<u64>(),
        read_len in 0usize..700,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.zip");
        let mut whole = Vec::new();
        for (i, len) in lengths.iter().enumerate() {
            let chunk = noise(*len, i as u32 + 1);
            let disk = if i + 1 == lengths.len() {
                path.clone()
            } else {
                dir.path().join(format!("d.z{:02}", i + 1))
            };
            fs::write(&disk, &chunk).unwrap();
            whole.extend_from_slice(&chunk);
        }

        let reader = SplitReader::open(&path).unwrap();
        prop_assert_eq!(reader.size(), whole.len() as u64);
        let offset = offset_seed % (whole.len() as u64 + 10);
        let mut buf = vec![0u8; read_len];
        let n = reader.read_at(offset, &mut buf).unwrap();
        let start = (offset as usize).min(whole.len());
        let end = (start + read_len).min(whole.len());
        prop_assert_eq!(&buf[..n], &whole[start..end]);
    }
}
