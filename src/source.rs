//! Remote source seam: configured storage locations the orchestrator
//! enumerates, plus the YAML configuration they load from.
//!
//! Only the `local` directory driver ships here; object-storage and
//! FTP/SFTP drivers live behind the same [`RemoteSource`] contract.

use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub last_modified: i64,
}

pub trait RemoteSource {
    fn name(&self) -> &str;
    /// Relative paths of every file under the configured root.
    fn list(&self) -> Result<Vec<String>>;
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn stat(&self, path: &str) -> Result<FileStat>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub driver: String,
    pub root: PathBuf,
    #[serde(default)]
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub sources: Vec<SourceEntry>,
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening sources config {path:?}"))?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader).context("Parsing sources config YAML")?;
        Ok(config)
    }

    pub fn active(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources
            .iter()
            .filter(|entry| entry.status == SourceStatus::Active)
    }
}

/// Constructs the driver for one configured source. Unsupported drivers
/// are rejected with a descriptive error; the run reports and continues.
pub fn build_source(entry: &SourceEntry) -> Result<Box<dyn RemoteSource>> {
    match entry.driver.as_str() {
        "local" => Ok(Box::new(LocalDirSource::new(
            entry.name.clone(),
            entry.root.clone(),
        ))),
        other => Err(ImportError::UnsupportedDriver(other.to_string()).into()),
    }
}

pub struct LocalDirSource {
    name: String,
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(name: String, root: PathBuf) -> Self {
        Self { name, root }
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn visit(&self, dir: &Path, prefix: &Path, found: &mut Vec<String>) -> Result<()> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("Listing directory {dir:?}"))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let relative = prefix.join(entry.file_name());
            if path.is_dir() {
                self.visit(&path, &relative, found)?;
            } else {
                found.push(relative.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }
}

impl RemoteSource for LocalDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        self.visit(&self.root, Path::new(""), &mut found)?;
        found.sort();
        Ok(found)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let absolute = self.absolute(path);
        fs::read(&absolute).with_context(|| format!("Reading file {absolute:?}"))
    }

    fn stat(&self, path: &str) -> Result<FileStat> {
        let absolute = self.absolute(path);
        let metadata =
            fs::metadata(&absolute).with_context(|| format!("Inspecting file {absolute:?}"))?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0);
        Ok(FileStat {
            size: metadata.len(),
            last_modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn entry(name: &str, driver: &str, root: &Path) -> SourceEntry {
        SourceEntry {
            name: name.to_string(),
            driver: driver.to_string(),
            root: root.to_path_buf(),
            status: SourceStatus::Active,
        }
    }

    #[test]
    fn unsupported_driver_is_rejected() {
        let temp = tempdir().unwrap();
        let result = build_source(&entry("bucket", "s3", temp.path()));
        let err = result.err().expect("s3 driver is not shipped");
        assert!(err.to_string().contains("s3"));
    }

    #[test]
    fn local_source_lists_reads_and_stats() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        let mut file = File::create(temp.path().join("nested/a_b_c_d_e_f.csv")).unwrap();
        writeln!(file, "a,b").unwrap();
        drop(file);

        let source = build_source(&entry("drop", "local", temp.path())).unwrap();
        let files = source.list().unwrap();
        assert_eq!(files, vec!["nested/a_b_c_d_e_f.csv".to_string()]);

        let bytes = source.read(&files[0]).unwrap();
        assert_eq!(bytes, b"a,b\n");

        let stat = source.stat(&files[0]).unwrap();
        assert_eq!(stat.size, 4);
        assert!(stat.last_modified > 0);
    }

    #[test]
    fn config_defaults_status_to_active() {
        let yaml = "sources:\n  - name: drop\n    driver: local\n    root: /tmp/in\n";
        let config: SourcesConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sources[0].status, SourceStatus::Active);
        assert_eq!(config.active().count(), 1);
    }
}
