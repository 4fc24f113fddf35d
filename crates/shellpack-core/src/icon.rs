use std::io::{self, Read, Seek};
use std::path::Path;

use tracing::{debug, warn};
use zip::ZipArchive;

/// Screenshot entry names, most preferred first.
pub const SCREENSHOT_CANDIDATES: [&str; 2] = ["manual_screenshot.png", "automatic_screenshot.png"];

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Screenshot accepted as the replacement launcher icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconCandidate {
    pub entry: String,
    pub bytes: Vec<u8>,
}

#[must_use]
pub fn has_png_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Rank of `entry_name` in [`SCREENSHOT_CANDIDATES`], matching either the
/// whole name or its last path component.
fn candidate_rank(entry_name: &str) -> Option<usize> {
    let file_name = entry_name
        .rsplit(|ch: char| ch == '/' || ch == '\\')
        .next()
        .unwrap_or(entry_name);
    SCREENSHOT_CANDIDATES
        .iter()
        .position(|candidate| *candidate == entry_name || *candidate == file_name)
}

/// Picks the best-ranked screenshot in `archive` that is really a PNG.
///
/// Ties within a rank keep archive order. Entries are listed from their raw
/// headers, so an entry in an unsupported compression method never stops the
/// scan; a candidate that cannot be read is skipped like one that fails the
/// signature check. `label` names the archive in logs.
pub fn extract_icon<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    label: &Path,
) -> Option<IconCandidate> {
    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let entry = match archive.by_index_raw(index) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(index, error = %err, "skipping unreadable entry header");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        if let Some(rank) = candidate_rank(entry.name()) {
            candidates.push((rank, index, entry.name().to_string()));
        }
    }
    candidates.sort_by_key(|(rank, index, _)| (*rank, *index));

    for (_, index, name) in candidates {
        let bytes = match read_entry(archive, index) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(entry = %name, error = %err, "screenshot entry is unreadable; skipping");
                continue;
            }
        };
        if has_png_signature(&bytes) {
            debug!(entry = %name, size = bytes.len(), "selected screenshot as icon");
            return Some(IconCandidate { entry: name, bytes });
        }
        debug!(entry = %name, "screenshot entry is not a PNG; skipping");
    }

    warn!(archive = %label.display(), "no usable screenshot found; keeping the shell icon");
    None
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize) -> io::Result<Vec<u8>> {
    let mut entry = archive.by_index(index)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}
