//! Local file collaborator: resolves image references for upload and cleans
//! up files the transcript no longer references.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

#[derive(Debug)]
pub enum FileError {
    Io(std::io::Error),
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Io(err) => write!(f, "file access failed: {err}"),
        }
    }
}

impl std::error::Error for FileError {}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Io(err)
    }
}

pub trait FileManager: Send + Sync {
    /// Resolve a local image reference to a `data:` URL suitable for
    /// inlining into a provider request.
    fn file_as_data_url(&self, path: &str) -> Result<String, FileError>;

    /// Best-effort removal of files no longer referenced by any message.
    fn delete_files(&self, paths: &[String]);
}

/// Filesystem-backed implementation used on desktop targets.
#[derive(Debug, Default, Clone)]
pub struct LocalFileManager;

impl LocalFileManager {
    pub fn new() -> Self {
        Self
    }

    fn mime_for(path: &str) -> &'static str {
        let extension = Path::new(strip_file_scheme(path))
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

fn strip_file_scheme(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

impl FileManager for LocalFileManager {
    fn file_as_data_url(&self, path: &str) -> Result<String, FileError> {
        let bytes = std::fs::read(strip_file_scheme(path))?;
        Ok(format!(
            "data:{};base64,{}",
            Self::mime_for(path),
            BASE64.encode(bytes)
        ))
    }

    fn delete_files(&self, paths: &[String]) {
        for path in paths {
            if let Err(err) = std::fs::remove_file(strip_file_scheme(path)) {
                tracing::warn!(path = %path, error = %err, "failed to delete orphaned file");
            }
        }
    }
}
