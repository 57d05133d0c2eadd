//! Intake: a per-request directory of uploaded documents.
//!
//! A [`Workspace`] is an explicit handle passed through the pipeline instead
//! of a process-wide uploads folder, so two requests only race if a caller
//! hands them the same directory. [`Workspace::temporary`] owns a `TempDir`
//! that is removed when the handle drops, even on panic.
//!
//! Files are keyed by their original base name. Storing a second file with
//! the same name replaces the first.

use crate::error::AdvocateError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Document formats the extractor can send to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Jpeg,
    Png,
    Pdf,
}

impl FileKind {
    /// Classify by extension (case-insensitive). `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(FileKind::Jpeg),
            "png" => Some(FileKind::Png),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FileKind::Jpeg => "image/jpeg",
            FileKind::Png => "image/png",
            FileKind::Pdf => "application/pdf",
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, FileKind::Pdf)
    }
}

/// A supported file sitting in a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Base name, as uploaded.
    pub name: String,
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Outcome of storing a batch of files.
///
/// A failure on one file does not stop the others.
#[derive(Debug, Default, Serialize)]
pub struct IntakeSummary {
    pub stored: Vec<String>,
    pub failed: Vec<IntakeFailure>,
}

#[derive(Debug, Serialize)]
pub struct IntakeFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// A directory holding one request's uploaded documents.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    /// Kept alive so a temporary workspace lives as long as the handle.
    _temp_dir: Option<TempDir>,
}

impl Workspace {
    /// Use an existing directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdvocateError> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(AdvocateError::WorkspaceNotFound { path: root });
        }
        Ok(Self {
            root,
            _temp_dir: None,
        })
    }

    /// Create the directory (and parents) if needed, then open it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AdvocateError> {
        let root = path.as_ref();
        std::fs::create_dir_all(root).map_err(|e| AdvocateError::io(root, e))?;
        Self::open(root)
    }

    /// A fresh temporary directory, deleted when the workspace drops.
    pub fn temporary() -> Result<Self, AdvocateError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("medbill-")
            .tempdir()
            .map_err(|e| AdvocateError::io(std::env::temp_dir(), e))?;
        debug!("Created temporary workspace {}", temp_dir.path().display());
        Ok(Self {
            root: temp_dir.path().to_path_buf(),
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under the base name of `file_name`.
    ///
    /// Directory components are stripped, so `"../../etc/passwd"` lands as
    /// `passwd` inside the workspace. Returns the stored name. Files with
    /// unsupported extensions are stored too; extraction never sends them.
    pub async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, AdvocateError> {
        let name = base_name(file_name)?;
        let path = self.root.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AdvocateError::io(&path, e))?;
        debug!("Stored {} ({} bytes)", name, bytes.len());

        if FileKind::from_path(&path).is_none() {
            warn!("{name}: unsupported format, extraction will ignore it");
        }
        Ok(name)
    }

    /// Copy a file from disk into the workspace under its base name.
    pub async fn store_from_path(&self, source: &Path) -> Result<String, AdvocateError> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AdvocateError::InvalidFileName {
                name: source.display().to_string(),
            })?;
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| AdvocateError::io(source, e))?;
        self.store(name, &bytes).await
    }

    /// Store every file in `sources`, collecting failures instead of stopping.
    pub async fn intake<P: AsRef<Path>>(&self, sources: &[P]) -> IntakeSummary {
        let mut summary = IntakeSummary::default();
        for source in sources {
            let source = source.as_ref();
            match self.store_from_path(source).await {
                Ok(name) => summary.stored.push(name),
                Err(e) => {
                    warn!("Intake failed for {}: {}", source.display(), e);
                    summary.failed.push(IntakeFailure {
                        source: source.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Intake: {} stored, {} failed",
            summary.stored.len(),
            summary.failed.len()
        );
        summary
    }

    /// Supported documents in the workspace, sorted by name.
    ///
    /// Subdirectories and unsupported extensions are skipped.
    pub fn supported_files(&self) -> Result<Vec<StoredFile>, AdvocateError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| AdvocateError::io(&self.root, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AdvocateError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(kind) = FileKind::from_path(&path) else {
                debug!("Skipping unsupported file {}", path.display());
                continue;
            };
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!("Skipping file with non-UTF-8 name: {}", path.display());
                continue;
            };
            files.push(StoredFile { name, path, kind });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete `files`. Failures are logged and skipped; returns how many
    /// were removed.
    pub async fn remove_files(&self, files: &[StoredFile]) -> usize {
        let mut removed = 0;
        for file in files {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    debug!("Deleted {}", file.path.display());
                    removed += 1;
                }
                Err(e) => warn!("Could not delete {}: {}", file.path.display(), e),
            }
        }
        removed
    }
}

fn base_name(file_name: &str) -> Result<String, AdvocateError> {
    Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AdvocateError::InvalidFileName {
            name: file_name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_by_extension() {
        assert_eq!(FileKind::from_path(Path::new("a.JPG")), Some(FileKind::Jpeg));
        assert_eq!(FileKind::from_path(Path::new("a.jpeg")), Some(FileKind::Jpeg));
        assert_eq!(FileKind::from_path(Path::new("a.png")), Some(FileKind::Png));
        assert_eq!(FileKind::from_path(Path::new("scan.Pdf")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileKind::from_path(Path::new("README")), None);
        assert_eq!(FileKind::Pdf.mime_type(), "application/pdf");
        assert!(!FileKind::Pdf.is_image());
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(base_name("bill.png").unwrap(), "bill.png");
        assert!(base_name("..").is_err());
        assert!(base_name("").is_err());
    }

    #[test]
    fn open_missing_directory() {
        let err = Workspace::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, AdvocateError::WorkspaceNotFound { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn store_list_and_remove() {
        let ws = Workspace::temporary().unwrap();
        ws.store("b_page2.png", b"png").await.unwrap();
        ws.store("a_page1.jpg", b"jpg").await.unwrap();
        ws.store("notes.txt", b"ignored").await.unwrap();
        std::fs::create_dir(ws.path().join("nested.pdf")).unwrap();

        let files = ws.supported_files().unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a_page1.jpg", "b_page2.png"]);

        assert_eq!(ws.remove_files(&files).await, 2);
        assert!(ws.supported_files().unwrap().is_empty());
        assert!(ws.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn remove_missing_file_is_a_warning() {
        let ws = Workspace::temporary().unwrap();
        let ghost = StoredFile {
            name: "ghost.pdf".into(),
            path: ws.path().join("ghost.pdf"),
            kind: FileKind::Pdf,
        };
        assert_eq!(ws.remove_files(&[ghost]).await, 0);
    }

    #[tokio::test]
    async fn intake_continues_after_failure() {
        let src = tempfile::tempdir().unwrap();
        let good = src.path().join("bill.pdf");
        std::fs::write(&good, b"%PDF-1.7").unwrap();
        let missing = src.path().join("missing.png");

        let ws = Workspace::temporary().unwrap();
        let summary = ws.intake(&[missing.clone(), good]).await;
        assert_eq!(summary.stored, vec!["bill.pdf".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].source, missing);
    }

    #[test]
    fn temporary_workspace_is_removed_on_drop() {
        let ws = Workspace::temporary().unwrap();
        let path = ws.path().to_path_buf();
        tokio_test::block_on(ws.store("x.png", b"x")).unwrap();
        assert!(path.exists());
        drop(ws);
        assert!(!path.exists());
    }
}
