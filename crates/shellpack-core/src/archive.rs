use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use serde::Serialize;
use zip::{result::ZipError, ZipArchive};

use crate::error::PackError;
use crate::escape::{escape_markup, escape_source_literal};

/// Entry holding the program definition.
pub const METADATA_ENTRY: &str = "code.xml";

// Serialized programs may carry this character reference, which XML 1.0 rejects.
const NUL_REFERENCE: &str = "&#x0;";

/// Program name read from the archive metadata, with its escaped forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramName {
    raw: String,
    markup: String,
    source_literal: String,
}

impl ProgramName {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            markup: escape_markup(&raw),
            source_literal: escape_source_literal(&raw),
            raw,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Form safe inside XML resources.
    #[must_use]
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Form safe inside a double-quoted source string.
    #[must_use]
    pub fn source_literal(&self) -> &str {
        &self.source_literal
    }
}

/// Opens `path` as a zip archive.
///
/// # Errors
/// Returns [`PackError::Filesystem`] if the file cannot be opened and
/// [`PackError::ArchiveFormat`] if it is not a readable zip archive.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>, PackError> {
    let file = File::open(path).map_err(PackError::fs("open", path))?;
    ZipArchive::new(file)
        .map_err(|err| PackError::archive_format(path, format!("not a zip archive: {err}")))
}

/// Reads the program name from the archive at `path`.
///
/// # Errors
/// See [`open_archive`] and [`extract_program_name`].
pub fn read_program_name(path: &Path) -> Result<ProgramName, PackError> {
    let mut archive = open_archive(path)?;
    extract_program_name(&mut archive, path)
}

/// Extracts `header/programName` from the metadata entry of `archive`.
///
/// `label` names the archive in errors.
///
/// # Errors
/// Returns [`PackError::ArchiveFormat`] when the entry is missing, is not
/// UTF-8, does not parse as XML, or lacks a non-blank program name.
pub fn extract_program_name<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    label: &Path,
) -> Result<ProgramName, PackError> {
    let mut entry = match archive.by_name(METADATA_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(PackError::archive_format(
                label,
                format!("missing {METADATA_ENTRY}"),
            ))
        }
        Err(err) => {
            return Err(PackError::archive_format(
                label,
                format!("unreadable {METADATA_ENTRY}: {err}"),
            ))
        }
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).map_err(|err| {
        PackError::archive_format(label, format!("unreadable {METADATA_ENTRY}: {err}"))
    })?;
    let text = String::from_utf8(bytes).map_err(|_| {
        PackError::archive_format(label, format!("{METADATA_ENTRY} is not valid UTF-8"))
    })?;

    let raw = parse_program_name(&text).map_err(|reason| PackError::archive_format(label, reason))?;
    Ok(ProgramName::new(raw))
}

fn parse_program_name(xml: &str) -> Result<String, String> {
    let sanitized = xml.replace(NUL_REFERENCE, "");
    let doc = roxmltree::Document::parse(&sanitized)
        .map_err(|err| format!("{METADATA_ENTRY} is not well-formed: {err}"))?;
    let header = doc
        .root_element()
        .children()
        .find(|node| node.has_tag_name("header"))
        .ok_or_else(|| format!("{METADATA_ENTRY} has no <header>"))?;
    let name_node = header
        .children()
        .find(|node| node.has_tag_name("programName"))
        .ok_or_else(|| format!("{METADATA_ENTRY} has no <header>/<programName>"))?;
    let name: String = name_node
        .descendants()
        .filter(roxmltree::Node::is_text)
        .filter_map(|node| node.text())
        .collect();
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{METADATA_ENTRY} has an empty programName"));
    }
    Ok(name.to_string())
}
