//! Directory handles

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file directly inside this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Regular files whose names pass `keep`, sorted by name.
    ///
    /// A directory that does not exist yet holds no files.
    pub async fn files_where<F>(&self, keep: F) -> Result<Vec<File>, DeployError>
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if keep(&entry.file_name().to_string_lossy()) {
                files.push(File::new(entry.path()));
            }
        }
        files.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(files)
    }
}
