use std::{io, path::PathBuf};

/// Failures raised while preparing or cleaning up a shell build.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid invocation options: {message}")]
    InvalidOptions { message: String },
    #[error("failed to download {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("malformed content archive {}: {reason}", .archive.display())]
    ArchiveFormat { archive: PathBuf, reason: String },
    #[error("cannot back up {}: file does not exist", .path.display())]
    BackupSourceMissing { path: PathBuf },
    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cleanup finished with {} failed step(s): {}", .failures.len(), .failures.join("; "))]
    CleanupFailed { failures: Vec<String> },
}

impl PackError {
    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    pub(crate) fn archive_format(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArchiveFormat {
            archive: archive.into(),
            reason: reason.into(),
        }
    }

    /// Adapter for `map_err` on filesystem calls.
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Filesystem {
            action,
            path,
            source,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOptions { .. } => "SP100",
            Self::Network { .. } => "SP200",
            Self::ArchiveFormat { .. } => "SP300",
            Self::BackupSourceMissing { .. } => "SP400",
            Self::Filesystem { .. } => "SP500",
            Self::CleanupFailed { .. } => "SP510",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidOptions { .. } => "invalid_options",
            Self::Network { .. } => "network_error",
            Self::ArchiveFormat { .. } => "archive_format_error",
            Self::BackupSourceMissing { .. } => "backup_source_missing",
            Self::Filesystem { .. } => "filesystem_error",
            Self::CleanupFailed { .. } => "cleanup_failed",
        }
    }

    /// Errors caused by how the tool was invoked or how the shell is laid out.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOptions { .. } | Self::BackupSourceMissing { .. }
        )
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidOptions { .. } => {
                Some("pass -P download=<url> -P suffix=<id> -P packageName=<prefix>")
            }
            Self::BackupSourceMissing { .. } => {
                Some("check --icon/--manifest point at files inside the shell template")
            }
            Self::Network { .. } => Some("re-run once the content server is reachable"),
            _ => None,
        }
    }
}
