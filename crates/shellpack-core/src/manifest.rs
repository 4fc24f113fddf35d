use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::error::PackError;

/// Actions whose intent filters are removed from the shell manifest.
pub const STRIPPED_ACTIONS: [&str; 2] = ["android.intent.action.VIEW", "android.intent.action.SEND"];

// An `<intent-filter>` start tag (not self-closing) immediately followed by an
// `<action>` naming one of STRIPPED_ACTIONS, up to the nearest closing tag.
static INTENT_FILTER: Lazy<Regex> = Lazy::new(|| {
    let actions = STRIPPED_ACTIONS
        .iter()
        .map(|action| regex::escape(action))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r#"(?s)<intent-filter(?:\s+[^>]*[^/>])?\s*>\s*<action\s[^>]*?android:name\s*=\s*"(?:{actions})"[^>]*>.*?</intent-filter>"#
    );
    Regex::new(&pattern).expect("intent filter pattern is valid")
});

/// Removes matching intent-filter blocks from `text`, returning the new text
/// and the number of blocks removed. Everything else is kept byte-for-byte.
#[must_use]
pub fn strip_intent_filter_blocks(text: &str) -> (String, usize) {
    let removed = INTENT_FILTER.find_iter(text).count();
    if removed == 0 {
        return (text.to_string(), 0);
    }
    (INTENT_FILTER.replace_all(text, "").into_owned(), removed)
}

/// Rewrites the manifest at `path` without the VIEW/SEND intent filters.
///
/// Destructive: callers wanting to undo it must back the file up first.
///
/// # Errors
/// Returns [`PackError::Filesystem`] when the manifest cannot be read or
/// written.
pub fn strip_intent_filters(path: &Path) -> Result<usize, PackError> {
    let text = fs::read_to_string(path).map_err(PackError::fs("read", path))?;
    let (stripped, removed) = strip_intent_filter_blocks(&text);
    if removed > 0 {
        fs::write(path, stripped).map_err(PackError::fs("write", path))?;
    }
    info!(manifest = %path.display(), removed, "stripped intent filters");
    Ok(removed)
}
