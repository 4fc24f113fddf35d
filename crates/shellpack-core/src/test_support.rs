use std::{fs::File, io::Write, path::Path};

use zip::write::FileOptions;

use crate::icon::PNG_SIGNATURE;

pub(crate) fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create archive");
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("add directory");
        } else {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(contents).expect("write entry");
        }
    }
    zip.finish().expect("finish archive");
}

pub(crate) fn png_bytes(tag: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(tag);
    bytes
}

pub(crate) fn code_xml(name: &str) -> String {
    format!("<program><header><programName>{name}</programName></header></program>")
}

const LOCAL_HEADER: [u8; 4] = *b"PK\x03\x04";
const CENTRAL_HEADER: [u8; 4] = *b"PK\x01\x02";

/// Rewrites the local and central headers of `entry` in place. `patch`
/// receives the header bytes and whether it is the central one.
fn patch_headers(path: &Path, entry: &str, patch: impl Fn(&mut [u8], bool)) {
    let mut bytes = std::fs::read(path).expect("read archive");
    let mut patched = 0;
    let mut at = 0;
    while at + 46 <= bytes.len() {
        let signature = &bytes[at..at + 4];
        let (central, name_len_at, name_at) = if signature == LOCAL_HEADER {
            (false, at + 26, at + 30)
        } else if signature == CENTRAL_HEADER {
            (true, at + 28, at + 46)
        } else {
            at += 1;
            continue;
        };
        let name_len = usize::from(u16::from_le_bytes([bytes[name_len_at], bytes[name_len_at + 1]]));
        if bytes.get(name_at..name_at + name_len) == Some(entry.as_bytes()) {
            patch(&mut bytes[at..name_at], central);
            patched += 1;
        }
        at += 4;
    }
    assert_eq!(patched, 2, "expected a local and a central header for {entry}");
    std::fs::write(path, bytes).expect("write archive");
}

/// Marks `entry` as compressed with `method` without touching its data.
pub(crate) fn set_compression_method(path: &Path, entry: &str, method: u16) {
    patch_headers(path, entry, |header, central| {
        let offset = if central { 10 } else { 8 };
        header[offset..offset + 2].copy_from_slice(&method.to_le_bytes());
    });
}

/// Flips the recorded CRC-32 of `entry` so reading it to the end fails.
pub(crate) fn corrupt_crc(path: &Path, entry: &str) {
    patch_headers(path, entry, |header, central| {
        let offset = if central { 16 } else { 14 };
        for byte in &mut header[offset..offset + 4] {
            *byte ^= 0xff;
        }
    });
}
