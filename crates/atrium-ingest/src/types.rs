use serde::{Deserialize, Serialize};

/// Accepted document types. Extraction dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl FileType {
    /// Resolve from a filename extension. `None` when the extension is not
    /// one of pdf/docx/txt/md.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = std::path::Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "docx" => Some(FileType::Docx),
            "txt" => Some(FileType::Txt),
            "md" => Some(FileType::Md),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Md => "md",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "md" => Ok(FileType::Md),
            other => Err(format!("unknown file type: {}", other)),
        }
    }
}

/// Ingestion lifecycle. Created `pending`; the pipeline moves a record
/// through `processing` (extract) and `indexing` (embed + store) to `ready`.
/// Failures return to `pending` with a retry deadline, or land in `failed`
/// once attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Indexing,
    Ready,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Indexing => "indexing",
            FileStatus::Ready => "ready",
            FileStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "indexing" => Ok(FileStatus::Indexing),
            "ready" => Ok(FileStatus::Ready),
            "failed" => Ok(FileStatus::Failed),
            other => Err(format!("unknown file status: {}", other)),
        }
    }
}

/// A document attached to an assistant, tracked through ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: String,
    pub assistant_id: String,
    pub workspace_id: Option<String>,
    pub filename: String,
    pub file_type: FileType,
    pub file_path: String,
    pub size_bytes: u64,
    pub chunk_count: u32,
    pub status: FileStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Stamped at the start of each attempt; a stale value marks a crashed
    /// worker for the reaper.
    pub processing_started_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_filename() {
        assert_eq!(FileType::from_filename("report.PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_filename("notes.md"), Some(FileType::Md));
        assert_eq!(FileType::from_filename("data.csv"), None);
        assert_eq!(FileType::from_filename("no_extension"), None);
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            FileStatus::Pending,
            FileStatus::Processing,
            FileStatus::Indexing,
            FileStatus::Ready,
            FileStatus::Failed,
        ] {
            let parsed: FileStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
