#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use csv_ingest::source::{SourceEntry, SourceStatus, SourcesConfig};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// A one-source configuration whose local driver roots at this workspace.
    pub fn sources_config(&self, name: &str) -> SourcesConfig {
        SourcesConfig {
            sources: vec![SourceEntry {
                name: name.to_string(),
                driver: "local".to_string(),
                root: self.temp_dir.path().to_path_buf(),
                status: SourceStatus::Active,
            }],
        }
    }

    /// Writes the same configuration as YAML for driving the binary.
    pub fn sources_yaml(&self, name: &str) -> PathBuf {
        let yaml = format!(
            "sources:\n  - name: {name}\n    driver: local\n    root: {}\n",
            self.temp_dir.path().display()
        );
        self.write("sources.yaml", &yaml)
    }
}
