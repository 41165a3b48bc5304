use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Test context with temporary directory management.
/// Automatically cleans up when dropped.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a fresh temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the root path of the temporary directory
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get full path for a relative path
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// Create a file with binary content at the given relative path
    pub fn create_file_bytes(&self, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = self.path(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Build a firmware zip with a manifest listing `images` as
    /// `(file, role, contents)`.
    pub fn create_firmware_package(
        &self,
        relative_path: &str,
        version: &str,
        images: &[(&str, &str, &[u8])],
    ) -> PathBuf {
        let path = self.path(relative_path);
        let file = fs::File::create(&path).expect("Failed to create zip");
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        let entries: Vec<serde_json::Value> = images
            .iter()
            .map(|(name, role, _)| serde_json::json!({ "file": name, "role": role }))
            .collect();
        let manifest = serde_json::json!({
            "version": version,
            "chip": "esp32",
            "images": entries,
        });

        zip.start_file("manifest.json", options)
            .expect("Failed to start manifest");
        zip.write_all(manifest.to_string().as_bytes())
            .expect("Failed to write manifest");
        for (name, _, data) in images {
            zip.start_file(*name, options).expect("Failed to start image");
            zip.write_all(data).expect("Failed to write image");
        }
        zip.finish().expect("Failed to finish zip");
        path
    }

    /// Read file content at relative path
    pub fn read_file(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).expect("Failed to read file")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
