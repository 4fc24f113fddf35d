//! Preparation and cleanup around the host's assemble step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shellpack_store::{CacheWriteError, ContentCache, FetchedArchive};
use tracing::{info, warn};

use crate::archive::{open_archive, read_program_name};
use crate::backup::{self, RestoreOutcome};
use crate::config::{InvocationOptions, ShellLayout};
use crate::error::PackError;
use crate::icon::extract_icon;

/// Build settings the pipeline writes; owned by the host build.
pub trait BuildConfiguration {
    fn set_application_id(&mut self, application_id: &str);
    /// Display name, already escaped for XML resources.
    fn set_display_name(&mut self, markup_escaped: &str);
    /// Program name, already escaped for a double-quoted source literal.
    fn set_program_name_literal(&mut self, source_escaped: &str);
}

/// Serializable [`BuildConfiguration`] handed to the host as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
}

impl BuildConfiguration for BuildOverrides {
    fn set_application_id(&mut self, application_id: &str) {
        self.application_id = Some(application_id.to_string());
    }

    fn set_display_name(&mut self, markup_escaped: &str) {
        self.app_name = Some(markup_escaped.to_string());
    }

    fn set_program_name_literal(&mut self, source_escaped: &str) {
        self.program_name = Some(source_escaped.to_string());
    }
}

/// Puts the content archive at a cache path.
pub trait ArchiveFetcher {
    /// # Errors
    /// Fails when the archive cannot be downloaded.
    fn ensure_downloaded(&self, url: &str, dest: &Path) -> anyhow::Result<FetchedArchive>;
}

/// Fetcher backed by the blocking HTTP client of `shellpack-store`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl ArchiveFetcher for HttpFetcher {
    fn ensure_downloaded(&self, url: &str, dest: &Path) -> anyhow::Result<FetchedArchive> {
        shellpack_store::ensure_downloaded(url, dest)
    }
}

/// Splits fetch failures into local cache I/O and everything else, which is
/// treated as a network problem.
fn fetch_error(url: &str, err: &anyhow::Error) -> PackError {
    let Some(cache) = err.downcast_ref::<CacheWriteError>() else {
        return PackError::Network {
            url: url.to_string(),
            reason: format!("{err:#}"),
        };
    };
    let source = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map_or_else(
            || io::Error::other(format!("{err:#}")),
            |io_err| io::Error::new(io_err.kind(), io_err.to_string()),
        );
    PackError::Filesystem {
        action: "write",
        path: cache.path.clone(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    /// No download configured; both phases are no-ops.
    NotApplicable,
    Prepared,
    Assembled,
    CleanedUp,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub project_id: String,
    pub application_id: String,
    pub program_name: String,
    pub app_name: String,
    pub program_name_literal: String,
    pub cache_path: PathBuf,
    pub cache_hit: bool,
    pub injected_archive: PathBuf,
    pub icon_entry: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub restored: Vec<PathBuf>,
    pub without_backup: Vec<PathBuf>,
    pub archive_removed: bool,
    pub failures: Vec<String>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// # Errors
    /// Returns [`PackError::CleanupFailed`] if any step failed.
    pub fn ensure_clean(self) -> Result<Self, PackError> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(PackError::CleanupFailed {
                failures: self.failures,
            })
        }
    }
}

/// One packaging run over a shell checkout.
pub struct Pipeline<'a> {
    options: &'a InvocationOptions,
    layout: &'a ShellLayout,
    fetcher: &'a dyn ArchiveFetcher,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        options: &'a InvocationOptions,
        layout: &'a ShellLayout,
        fetcher: &'a dyn ArchiveFetcher,
    ) -> Self {
        Self {
            options,
            layout,
            fetcher,
            state: PipelineState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Downloads the archive, applies its name to `config`, backs up the
    /// icon and manifest, injects the archive and replaces the icon.
    ///
    /// Returns `Ok(None)` without touching anything when no download is
    /// configured. Download and metadata failures surface before any file is
    /// modified.
    ///
    /// # Errors
    /// Any [`PackError`] aborts preparation; steps already done are not
    /// rolled back here (cleanup tolerates partial preparation).
    pub fn prepare(
        &mut self,
        config: &mut dyn BuildConfiguration,
    ) -> Result<Option<PrepareReport>, PackError> {
        let Some(identity) = self.options.identity()? else {
            info!("no download configured; skipping standalone preparation");
            self.state = PipelineState::NotApplicable;
            return Ok(None);
        };

        let cache_path = ContentCache::new(&self.layout.root).archive_path(&identity.project_id);
        let fetched = self
            .fetcher
            .ensure_downloaded(&identity.url, &cache_path)
            .map_err(|err| fetch_error(&identity.url, &err))?;

        let name = read_program_name(&fetched.path)?;
        config.set_application_id(&identity.application_id);
        config.set_display_name(name.markup());
        config.set_program_name_literal(name.source_literal());
        info!(
            application_id = %identity.application_id,
            program = name.raw(),
            "applied program metadata"
        );

        backup::backup(&self.layout.icon)?;
        backup::backup(&self.layout.manifest)?;

        let injected = self.layout.injected_archive(&identity.project_id);
        fs::create_dir_all(&self.layout.assets_dir)
            .map_err(PackError::fs("create", &self.layout.assets_dir))?;
        fs::copy(&fetched.path, &injected).map_err(PackError::fs("copy", &fetched.path))?;

        let mut archive = open_archive(&injected)?;
        let icon = extract_icon(&mut archive, &injected);
        let icon_entry = match icon {
            Some(icon) => {
                fs::write(&self.layout.icon, &icon.bytes)
                    .map_err(PackError::fs("write", &self.layout.icon))?;
                info!(entry = %icon.entry, icon = %self.layout.icon.display(), "replaced icon");
                Some(icon.entry)
            }
            None => None,
        };

        self.state = PipelineState::Prepared;
        Ok(Some(PrepareReport {
            project_id: identity.project_id,
            application_id: identity.application_id,
            program_name: name.raw().to_string(),
            app_name: name.markup().to_string(),
            program_name_literal: name.source_literal().to_string(),
            cache_path: fetched.path,
            cache_hit: fetched.cache_hit,
            injected_archive: injected,
            icon_entry,
        }))
    }

    /// Records that the host's assemble step has finished.
    pub fn mark_assembled(&mut self) {
        if self.state == PipelineState::Prepared {
            self.state = PipelineState::Assembled;
        }
    }

    /// Restores the icon and manifest and deletes the injected archive.
    ///
    /// Every step is attempted even if an earlier one fails; failures are
    /// collected in the report. Returns `Ok(None)` when no download is
    /// configured.
    ///
    /// # Errors
    /// Fails only when the options cannot identify the injected archive.
    pub fn cleanup(&mut self) -> Result<Option<CleanupReport>, PackError> {
        if !self.options.is_remote() {
            info!("no download configured; skipping standalone cleanup");
            self.state = PipelineState::NotApplicable;
            return Ok(None);
        }
        let Some(identity) = self.options.identity()? else {
            return Ok(None);
        };

        let mut report = CleanupReport::default();
        for path in [&self.layout.icon, &self.layout.manifest] {
            match backup::restore(path) {
                Ok(RestoreOutcome::Restored) => report.restored.push(path.clone()),
                Ok(RestoreOutcome::NoBackup) => report.without_backup.push(path.clone()),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "restore failed");
                    report.failures.push(err.to_string());
                }
            }
        }

        let injected = self.layout.injected_archive(&identity.project_id);
        if injected.exists() {
            match fs::remove_file(&injected) {
                Ok(()) => report.archive_removed = true,
                Err(source) => {
                    let err = PackError::fs("remove", &injected)(source);
                    warn!(error = %err, "could not remove injected archive");
                    report.failures.push(err.to_string());
                }
            }
        }

        self.state = PipelineState::CleanedUp;
        info!(
            restored = report.restored.len(),
            archive_removed = report.archive_removed,
            failures = report.failures.len(),
            "standalone cleanup finished"
        );
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::METADATA_ENTRY;
    use crate::backup::backup_path;
    use crate::test_support::{code_xml, png_bytes, set_compression_method, write_archive};
    use anyhow::anyhow;
    use std::cell::Cell;

    /// Serves a prepared archive and counts transfers.
    struct LocalFetcher {
        source: PathBuf,
        transfers: Cell<usize>,
    }

    impl ArchiveFetcher for LocalFetcher {
        fn ensure_downloaded(&self, _url: &str, dest: &Path) -> anyhow::Result<FetchedArchive> {
            if dest.exists() {
                return Ok(FetchedArchive {
                    path: dest.to_path_buf(),
                    size: fs::metadata(dest)?.len(),
                    cache_hit: true,
                });
            }
            self.transfers.set(self.transfers.get() + 1);
            fs::create_dir_all(dest.parent().unwrap())?;
            let size = fs::copy(&self.source, dest)?;
            Ok(FetchedArchive {
                path: dest.to_path_buf(),
                size,
                cache_hit: false,
            })
        }
    }

    struct FailingFetcher;

    impl ArchiveFetcher for FailingFetcher {
        fn ensure_downloaded(&self, url: &str, _dest: &Path) -> anyhow::Result<FetchedArchive> {
            Err(anyhow!("connection refused for {url}"))
        }
    }

    /// Fails the way the store does when the cache directory is read-only.
    struct ReadOnlyCacheFetcher;

    impl ArchiveFetcher for ReadOnlyCacheFetcher {
        fn ensure_downloaded(&self, _url: &str, dest: &Path) -> anyhow::Result<FetchedArchive> {
            let denied = io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system");
            Err(anyhow::Error::new(denied).context(CacheWriteError {
                path: dest.to_path_buf(),
            }))
        }
    }

    struct Shell {
        _temp: tempfile::TempDir,
        layout: ShellLayout,
        source: PathBuf,
    }

    fn shell(entries: &[(&str, &[u8])]) -> Shell {
        let temp = tempfile::tempdir().unwrap();
        let layout = ShellLayout::new(temp.path().join("shell"));
        fs::create_dir_all(layout.icon.parent().unwrap()).unwrap();
        fs::write(&layout.icon, b"original icon").unwrap();
        fs::write(&layout.manifest, b"<manifest/>").unwrap();
        let source = temp.path().join("app.zip");
        write_archive(&source, entries);
        Shell {
            _temp: temp,
            layout,
            source,
        }
    }

    fn remote_options() -> InvocationOptions {
        InvocationOptions {
            download: Some("http://x/app.zip".into()),
            suffix: Some("demo".into()),
            package_name: Some("org.example".into()),
        }
    }

    #[test]
    fn prepare_then_cleanup_round_trip() {
        let screenshot = png_bytes(b"screenshot");
        let code = code_xml("Cat &amp; Dog");
        let shell = shell(&[
            (METADATA_ENTRY, code.as_bytes()),
            ("manual_screenshot.png", screenshot.as_slice()),
        ]);
        let fetcher = LocalFetcher {
            source: shell.source.clone(),
            transfers: Cell::new(0),
        };
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &fetcher);
        let mut overrides = BuildOverrides::default();

        let report = pipeline.prepare(&mut overrides).unwrap().expect("prepared");
        assert_eq!(pipeline.state(), PipelineState::Prepared);
        assert_eq!(overrides.application_id.as_deref(), Some("org.example.demo"));
        assert_eq!(overrides.app_name.as_deref(), Some("Cat &amp; Dog"));
        assert_eq!(overrides.program_name.as_deref(), Some("Cat & Dog"));
        assert_eq!(report.icon_entry.as_deref(), Some("manual_screenshot.png"));
        assert_eq!(fs::read(&shell.layout.icon).unwrap(), screenshot);
        assert!(shell.layout.injected_archive("demo").exists());
        assert!(shell.layout.root.join(".apps/demo.zip").exists());

        pipeline.mark_assembled();
        assert_eq!(pipeline.state(), PipelineState::Assembled);

        let cleanup = pipeline.cleanup().unwrap().expect("cleaned");
        assert!(cleanup.is_clean());
        assert!(cleanup.archive_removed);
        assert_eq!(pipeline.state(), PipelineState::CleanedUp);
        assert_eq!(fs::read(&shell.layout.icon).unwrap(), b"original icon");
        assert_eq!(fs::read(&shell.layout.manifest).unwrap(), b"<manifest/>");
        assert!(!shell.layout.injected_archive("demo").exists());
        assert!(!backup_path(&shell.layout.icon).unwrap().exists());
        assert!(!backup_path(&shell.layout.manifest).unwrap().exists());
    }

    #[test]
    fn second_preparation_reuses_the_cache() {
        let code = code_xml("Robot");
        let shell = shell(&[(METADATA_ENTRY, code.as_bytes())]);
        let fetcher = LocalFetcher {
            source: shell.source.clone(),
            transfers: Cell::new(0),
        };
        let options = remote_options();
        let mut overrides = BuildOverrides::default();

        for _ in 0..2 {
            let mut pipeline = Pipeline::new(&options, &shell.layout, &fetcher);
            pipeline.prepare(&mut overrides).unwrap();
            pipeline.cleanup().unwrap();
        }
        assert_eq!(fetcher.transfers.get(), 1);
    }

    #[test]
    fn missing_screenshot_keeps_the_icon() {
        let code = code_xml("Robot");
        let shell = shell(&[
            (METADATA_ENTRY, code.as_bytes()),
            ("manual_screenshot.png", b"not a png".as_slice()),
        ]);
        let fetcher = LocalFetcher {
            source: shell.source.clone(),
            transfers: Cell::new(0),
        };
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &fetcher);

        let report = pipeline
            .prepare(&mut BuildOverrides::default())
            .unwrap()
            .expect("prepared");
        assert_eq!(report.icon_entry, None);
        assert_eq!(fs::read(&shell.layout.icon).unwrap(), b"original icon");
    }

    #[test]
    fn undecodable_entries_do_not_fail_preparation() {
        let screenshot = png_bytes(b"screenshot");
        let code = code_xml("Robot");
        let shell = shell(&[
            (METADATA_ENTRY, code.as_bytes()),
            ("sounds/beep.wav", b"RIFF....WAVE".as_slice()),
            ("manual_screenshot.png", screenshot.as_slice()),
        ]);
        set_compression_method(&shell.source, "sounds/beep.wav", 12);
        let fetcher = LocalFetcher {
            source: shell.source.clone(),
            transfers: Cell::new(0),
        };
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &fetcher);

        let report = pipeline
            .prepare(&mut BuildOverrides::default())
            .unwrap()
            .expect("prepared");
        assert_eq!(report.icon_entry.as_deref(), Some("manual_screenshot.png"));
        assert_eq!(fs::read(&shell.layout.icon).unwrap(), screenshot);
    }

    #[test]
    fn metadata_errors_surface_before_any_mutation() {
        let shell = shell(&[("readme.txt", b"no program here".as_slice())]);
        let fetcher = LocalFetcher {
            source: shell.source.clone(),
            transfers: Cell::new(0),
        };
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &fetcher);

        let err = pipeline
            .prepare(&mut BuildOverrides::default())
            .expect_err("archive lacks code.xml");
        assert!(matches!(err, PackError::ArchiveFormat { .. }));
        assert!(!backup_path(&shell.layout.icon).unwrap().exists());
        assert!(!shell.layout.injected_archive("demo").exists());
    }

    #[test]
    fn network_errors_abort_preparation() {
        let code = code_xml("Robot");
        let shell = shell(&[(METADATA_ENTRY, code.as_bytes())]);
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &FailingFetcher);

        let err = pipeline
            .prepare(&mut BuildOverrides::default())
            .expect_err("fetch fails");
        assert!(matches!(err, PackError::Network { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert!(!backup_path(&shell.layout.manifest).unwrap().exists());
    }

    #[test]
    fn cache_write_failures_are_filesystem_errors() {
        let code = code_xml("Robot");
        let shell = shell(&[(METADATA_ENTRY, code.as_bytes())]);
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &ReadOnlyCacheFetcher);

        let err = pipeline
            .prepare(&mut BuildOverrides::default())
            .expect_err("cache is read-only");
        let PackError::Filesystem { action, path, source } = &err else {
            panic!("expected a filesystem error, got {err:?}");
        };
        assert_eq!(*action, "write");
        assert_eq!(path, &shell.layout.root.join(".apps/demo.zip"));
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(err.reason(), "filesystem_error");
        assert!(!backup_path(&shell.layout.icon).unwrap().exists());
    }

    #[test]
    fn without_download_both_phases_are_no_ops() {
        let shell = shell(&[]);
        let options = InvocationOptions {
            suffix: Some("demo".into()),
            ..InvocationOptions::default()
        };
        let mut pipeline = Pipeline::new(&options, &shell.layout, &FailingFetcher);
        let mut overrides = BuildOverrides::default();

        assert!(pipeline.prepare(&mut overrides).unwrap().is_none());
        assert!(pipeline.cleanup().unwrap().is_none());
        assert_eq!(pipeline.state(), PipelineState::NotApplicable);
        assert_eq!(overrides, BuildOverrides::default());
        assert_eq!(fs::read(&shell.layout.icon).unwrap(), b"original icon");
        assert!(!shell.layout.root.join(".apps").exists());
    }

    #[test]
    fn cleanup_after_failed_preparation_tolerates_missing_backups() {
        let shell = shell(&[]);
        let options = remote_options();
        let mut pipeline = Pipeline::new(&options, &shell.layout, &FailingFetcher);

        let report = pipeline.cleanup().unwrap().expect("attempted");
        assert!(report.is_clean());
        assert!(report.restored.is_empty());
        assert_eq!(report.without_backup.len(), 2);
        assert!(!report.archive_removed);
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_continues_past_a_failed_restore() {
        let shell = shell(&[]);
        let options = remote_options();
        backup::backup(&shell.layout.icon).unwrap();
        backup::backup(&shell.layout.manifest).unwrap();
        let injected = shell.layout.injected_archive("demo");
        fs::create_dir_all(injected.parent().unwrap()).unwrap();
        fs::write(&injected, b"zip").unwrap();

        // Replace the icon with a directory so copying the backup over it fails.
        fs::remove_file(&shell.layout.icon).unwrap();
        fs::create_dir(&shell.layout.icon).unwrap();

        let mut pipeline = Pipeline::new(&options, &shell.layout, &FailingFetcher);
        let report = pipeline.cleanup().unwrap().expect("attempted");

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.restored, vec![shell.layout.manifest.clone()]);
        assert!(report.archive_removed);
        assert!(matches!(
            report.ensure_clean(),
            Err(PackError::CleanupFailed { .. })
        ));
    }
}
