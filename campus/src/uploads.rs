//! Filesystem storage for uploaded files.
//!
//! Files land under `<uploads.root>/<kind>/YYYY/MM/DD/<uuid>-<sanitised name>`. The path relative
//! to the root is what gets stored in the database; profile pictures and student images are
//! served publicly from `/media/<relative path>`, attachments only through the message API.

use std::path::{Component, Path, PathBuf};

use axum::extract::{Multipart, multipart::Field};
use chrono::{DateTime, Utc};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{config::UploadsConfig, errors::Error};

/// What an upload is for. Decides the directory and whether only images are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    ProfilePictures,
    StudentImages,
    MessageAttachments,
}

impl UploadKind {
    pub fn dir(self) -> &'static str {
        match self {
            UploadKind::ProfilePictures => "profile_pictures",
            UploadKind::StudentImages => "student_images",
            UploadKind::MessageAttachments => "message_attachments",
        }
    }

    fn images_only(self) -> bool {
        !matches!(self, UploadKind::MessageAttachments)
    }
}

/// A file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub relative_path: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// Reduce a client-supplied filename to a safe final path component.
pub fn sanitize_filename(name: &str) -> String {
    // Browsers on Windows send the full path
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

fn relative_path_for(kind: UploadKind, filename: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}-{}",
        kind.dir(),
        now.format("%Y/%m/%d"),
        Uuid::new_v4().simple(),
        sanitize_filename(filename)
    )
}

/// Local upload directory.
#[derive(Debug, Clone)]
pub struct Uploads {
    root: PathBuf,
    max_file_size: usize,
}

impl Uploads {
    pub fn new(config: &UploadsConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_file_size: config.max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_dir(&self, kind: UploadKind) -> PathBuf {
        self.root.join(kind.dir())
    }

    /// Drain a multipart field into memory, failing as soon as it passes the size cap.
    pub async fn read_field(&self, mut field: Field<'_>) -> Result<Vec<u8>, Error> {
        let mut content = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to read uploaded file: {e}"),
        })? {
            if content.len() + chunk.len() > self.max_file_size {
                warn!(max_file_size = self.max_file_size, "Upload exceeds size limit");
                return Err(self.too_large());
            }
            content.extend_from_slice(&chunk);
        }
        Ok(content)
    }

    /// Store the first `field_name` part of a single-file form. Later parts are left unread.
    pub async fn store_single(&self, multipart: &mut Multipart, field_name: &str, kind: UploadKind) -> Result<StoredFile, Error> {
        while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
            message: format!("Invalid multipart data: {e}"),
        })? {
            if field.name() != Some(field_name) {
                continue;
            }
            let filename = field.file_name().unwrap_or(field_name).to_string();
            let content_type = field.content_type().map(str::to_string);
            let content = self.read_field(field).await?;
            return self.store(kind, &filename, content_type.as_deref(), &content).await;
        }
        Err(Error::BadRequest {
            message: format!("No {field_name} file was uploaded"),
        })
    }

    /// Remove a file whose database row was never written or no longer points at it.
    pub async fn discard(&self, relative_path: &str) {
        if let Err(e) = self.remove(relative_path).await {
            warn!(path = relative_path, "Failed to remove upload: {e}");
        }
    }

    fn too_large(&self) -> Error {
        Error::BadRequest {
            message: format!(
                "File size exceeds maximum allowed size of {} bytes ({} MB)",
                self.max_file_size,
                self.max_file_size / (1024 * 1024)
            ),
        }
    }

    /// Write `content` and return where it went.
    ///
    /// The content type falls back to a guess from the filename when the client sent none.
    #[instrument(skip(self, content), fields(kind = kind.dir(), size = content.len()), err)]
    pub async fn store(&self, kind: UploadKind, filename: &str, content_type: Option<&str>, content: &[u8]) -> Result<StoredFile, Error> {
        if content.len() > self.max_file_size {
            return Err(self.too_large());
        }
        if content.is_empty() {
            return Err(Error::BadRequest {
                message: "Uploaded file is empty".to_string(),
            });
        }

        let content_type = content_type
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(filename).first_or_octet_stream().to_string());
        if kind.images_only() && !content_type.starts_with("image/") {
            return Err(Error::BadRequest {
                message: "Only image files are allowed".to_string(),
            });
        }

        let relative_path = relative_path_for(kind, filename, Utc::now());
        let full_path = self.root.join(&relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::Internal {
                operation: format!("create upload directory: {e}"),
            })?;
        }

        let mut file = fs::File::create(&full_path).await.map_err(|e| Error::Internal {
            operation: format!("create upload file: {e}"),
        })?;
        file.write_all(content).await.map_err(|e| Error::Internal {
            operation: format!("write upload file: {e}"),
        })?;
        file.sync_all().await.map_err(|e| Error::Internal {
            operation: format!("flush upload file: {e}"),
        })?;

        debug!("Stored upload at {}", relative_path);
        Ok(StoredFile {
            relative_path,
            original_filename: filename.to_string(),
            content_type,
            size_bytes: content.len() as i64,
        })
    }

    /// Absolute path of a stored file. Paths that would escape the root are rejected.
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf, Error> {
        let path = Path::new(relative_path);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || relative_path.is_empty() {
            return Err(Error::BadRequest {
                message: "Invalid file path".to_string(),
            });
        }
        Ok(self.root.join(path))
    }

    /// Best-effort removal; a file that is already gone is not an error.
    #[instrument(skip(self), err)]
    pub async fn remove(&self, relative_path: &str) -> Result<(), Error> {
        let path = self.resolve(relative_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal {
                operation: format!("remove upload {relative_path}: {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn uploads(root: &Path, max_file_size: usize) -> Uploads {
        Uploads::new(&UploadsConfig {
            root: root.to_path_buf(),
            max_file_size,
        })
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report card.pdf"), "report_card.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\photo.png"), "photo.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_relative_path_is_keyed_by_date() {
        let now = Utc.with_ymd_and_hms(2031, 4, 9, 12, 0, 0).unwrap();
        let path = relative_path_for(UploadKind::StudentImages, "Jane Doe.jpg", now);
        assert!(path.starts_with("student_images/2031/04/09/"), "{path}");
        assert!(path.ends_with("-Jane_Doe.jpg"), "{path}");
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads(dir.path(), 1024);

        let stored = uploads
            .store(UploadKind::MessageAttachments, "notes.txt", None, b"chapter 4")
            .await
            .unwrap();
        assert_eq!(stored.content_type, "text/plain");
        assert_eq!(stored.size_bytes, 9);
        assert_eq!(stored.original_filename, "notes.txt");

        let full = uploads.resolve(&stored.relative_path).unwrap();
        assert_eq!(tokio::fs::read(&full).await.unwrap(), b"chapter 4");

        uploads.remove(&stored.relative_path).await.unwrap();
        assert!(!full.exists());
        // Removing twice is fine
        uploads.remove(&stored.relative_path).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_rejects_oversized_and_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads(dir.path(), 4);

        let err = uploads
            .store(UploadKind::MessageAttachments, "big.txt", None, b"12345")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        let err = uploads
            .store(UploadKind::ProfilePictures, "me.txt", Some("text/plain"), b"hi")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Only image files are allowed");

        let stored = uploads.store(UploadKind::ProfilePictures, "me.png", None, b"png").await.unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert!(stored.relative_path.starts_with("profile_pictures/"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let uploads = uploads(Path::new("/srv/media"), 10);
        assert!(uploads.resolve("../secret").is_err());
        assert!(uploads.resolve("/etc/passwd").is_err());
        assert!(uploads.resolve("").is_err());
        assert_eq!(
            uploads.resolve("profile_pictures/2030/01/01/x.png").unwrap(),
            PathBuf::from("/srv/media/profile_pictures/2030/01/01/x.png")
        );
    }
}
