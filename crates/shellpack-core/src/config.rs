use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PackError;

pub const OPTION_DOWNLOAD: &str = "download";
pub const OPTION_SUFFIX: &str = "suffix";
pub const OPTION_PACKAGE_NAME: &str = "packageName";

const ENV_DOWNLOAD: &str = "SHELLPACK_DOWNLOAD";
const ENV_SUFFIX: &str = "SHELLPACK_SUFFIX";
const ENV_PACKAGE_NAME: &str = "SHELLPACK_PACKAGE_NAME";

const DEFAULT_ASSETS_DIR: &str = "src/main/assets";
const DEFAULT_ICON: &str = "src/main/res/drawable/ic_launcher.png";
const DEFAULT_MANIFEST: &str = "src/main/AndroidManifest.xml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Non-empty value of `key`.
    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Options supplied by whoever invokes the build.
///
/// Presence of `download` alone decides whether preparation and cleanup do
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationOptions {
    pub download: Option<String>,
    pub suffix: Option<String>,
    pub package_name: Option<String>,
}

impl InvocationOptions {
    /// Parses gradle-style `key=value` properties. Unknown keys are ignored.
    ///
    /// # Errors
    /// Returns [`PackError::InvalidOptions`] for a pair without `=` or with an
    /// empty key.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, PackError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                PackError::invalid_options(format!("expected key=value, got '{pair}'"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(PackError::invalid_options(format!(
                    "property '{pair}' has an empty key"
                )));
            }
            let value = value.trim().to_string();
            match key {
                OPTION_DOWNLOAD => options.download = Some(value),
                OPTION_SUFFIX => options.suffix = Some(value),
                OPTION_PACKAGE_NAME => options.package_name = Some(value),
                other => debug!(key = other, "ignoring unrecognized property"),
            }
        }
        Ok(options)
    }

    /// Fills options left unset by properties from `SHELLPACK_*` variables.
    #[must_use]
    pub(crate) fn with_env_fallback(mut self, env: &EnvSnapshot) -> Self {
        let fallback = |current: Option<String>, key: &str| {
            current.or_else(|| env.var(key).map(ToOwned::to_owned))
        };
        self.download = fallback(self.download, ENV_DOWNLOAD);
        self.suffix = fallback(self.suffix, ENV_SUFFIX);
        self.package_name = fallback(self.package_name, ENV_PACKAGE_NAME);
        self
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.download.is_some()
    }

    /// Resolves the project and application identifiers.
    ///
    /// Returns `Ok(None)` when no download is configured.
    ///
    /// # Errors
    /// Returns [`PackError::InvalidOptions`] when a download is configured but
    /// `suffix` or `packageName` is missing or unusable.
    pub fn identity(&self) -> Result<Option<ProjectIdentity>, PackError> {
        let Some(url) = self.download.as_deref() else {
            return Ok(None);
        };
        if url.is_empty() {
            return Err(PackError::invalid_options("download url is empty"));
        }
        let project_id = self
            .suffix
            .as_deref()
            .ok_or_else(|| PackError::invalid_options("'suffix' is required with 'download'"))?;
        validate_project_id(project_id)?;
        let package_name = self.package_name.as_deref().ok_or_else(|| {
            PackError::invalid_options("'packageName' is required with 'download'")
        })?;
        if package_name.is_empty() {
            return Err(PackError::invalid_options("'packageName' is empty"));
        }
        Ok(Some(ProjectIdentity {
            url: url.to_string(),
            project_id: project_id.to_string(),
            application_id: format!("{package_name}.{project_id}"),
        }))
    }
}

fn validate_project_id(project_id: &str) -> Result<(), PackError> {
    if project_id.is_empty() {
        return Err(PackError::invalid_options("'suffix' is empty"));
    }
    if !project_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(PackError::invalid_options(format!(
            "'suffix' must contain only ASCII letters, digits or '_' (got '{project_id}')"
        )));
    }
    Ok(())
}

/// Identifiers derived from the invocation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIdentity {
    pub url: String,
    pub project_id: String,
    pub application_id: String,
}

/// Locations inside the shell template that the pipeline reads and mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellLayout {
    pub root: PathBuf,
    pub assets_dir: PathBuf,
    pub icon: PathBuf,
    pub manifest: PathBuf,
}

impl ShellLayout {
    /// Default layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            assets_dir: root.join(DEFAULT_ASSETS_DIR),
            icon: root.join(DEFAULT_ICON),
            manifest: root.join(DEFAULT_MANIFEST),
            root,
        }
    }

    /// Applies overrides; relative overrides resolve against the root.
    #[must_use]
    pub fn with_overrides(
        mut self,
        assets_dir: Option<&Path>,
        icon: Option<&Path>,
        manifest: Option<&Path>,
    ) -> Self {
        if let Some(path) = assets_dir {
            self.assets_dir = self.root.join(path);
        }
        if let Some(path) = icon {
            self.icon = self.root.join(path);
        }
        if let Some(path) = manifest {
            self.manifest = self.root.join(path);
        }
        self
    }

    #[must_use]
    pub fn injected_archive(&self, project_id: &str) -> PathBuf {
        self.assets_dir.join(format!("{project_id}.zip"))
    }
}
