use serde::{ Deserialize, Serialize };
use std::fs;
use std::path::Path;
use thiserror::Error;

/// A text document the user attached to the session. Read-only input to prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub name: String,
    pub content: String,
    pub media_type: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported file type for '{0}' (expected .txt, .md, .json or .csv)")]
    UnsupportedType(String),
    #[error("failed to read '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

fn media_type_for(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "json" => Some("application/json"),
        "csv" => Some("text/csv"),
        _ => None,
    }
}

impl ContextDocument {
    /// Decodes an uploaded payload. Invalid UTF-8 sequences are replaced, not rejected.
    pub fn from_upload(name: &str, bytes: &[u8]) -> Result<Self, UploadError> {
        let media_type = media_type_for(name).ok_or_else(||
            UploadError::UnsupportedType(name.to_string())
        )?;

        Ok(Self {
            name: name.to_string(),
            content: String::from_utf8_lossy(bytes).into_owned(),
            media_type: media_type.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if media_type_for(&name).is_none() {
            return Err(UploadError::UnsupportedType(name));
        }

        let bytes = fs::read(path).map_err(|source| UploadError::Io { name: name.clone(), source })?;
        Self::from_upload(&name, &bytes)
    }
}
