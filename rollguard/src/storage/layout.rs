//! Deploy path layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default name of the live data file under `data/`
pub const DEFAULT_DATA_FILE: &str = "app.db";

/// Filesystem layout rooted at a deploy path.
///
/// The same paths are used whether the deploy path is local or on a remote
/// host reached over ssh.
#[derive(Debug, Clone)]
pub struct DeployLayout {
    /// Root of the deployment on the target host
    pub base_dir: PathBuf,

    /// File name of the live data file
    pub data_file_name: String,
}

impl DeployLayout {
    /// Create a new layout
    pub fn new(base_dir: impl Into<PathBuf>, data_file_name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            data_file_name: data_file_name.into(),
        }
    }

    /// Directory holding the live data file and its backups
    pub fn data_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("data"))
    }

    /// The live data file
    pub fn data_file(&self) -> File {
        self.data_dir().file(&self.data_file_name)
    }

    /// Prefix every backup file name starts with
    pub fn backup_prefix(&self) -> String {
        format!("{}.backup.", self.data_file_name)
    }

    /// File holding the deployed version identifier
    pub fn current_version_file(&self) -> File {
        File::new(self.base_dir.join("current-version.txt"))
    }

    /// File holding the timestamp of the last successful deployment
    pub fn last_deployment_file(&self) -> File {
        File::new(self.base_dir.join("last-deployment.txt"))
    }

    /// Directory of per-instance env files used in compose mode
    pub fn instances_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("instances"))
    }

    /// Optional settings file
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("rollguard.json"))
    }

    /// Default compose file
    pub fn compose_file(&self) -> PathBuf {
        self.base_dir.join("docker-compose.yml")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
