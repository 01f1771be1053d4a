use crate::db::now_ms;
use crate::error::{ChatError, ChatResult};
use anyhow::Context;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use url::Url;

/// Metadata kept for every stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMeta {
    pub id: String,
    pub mime: String,
    pub file_name: String,
    pub size_bytes: i64,
}

/// Formats served back to clients. Vector and markup formats are refused.
const RASTER_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Content-addressed image store on local disk.
///
/// Files live at `<dir>/<id[..2]>/<id>` where `id` is the SHA-256 of the
/// bytes, so uploading the same image twice yields the same reference.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
    public_base: Url,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: &str) -> anyhow::Result<Self> {
        let mut public_base = Url::parse(public_base).context("invalid public url")?;
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }
        Ok(Self {
            dir: dir.into(),
            public_base,
        })
    }

    /// Validate and persist an image, returning its metadata.
    ///
    /// Only raster formats recognised from the bytes themselves are kept; the
    /// declared content type and the file name merely pick the error message.
    pub async fn save(
        &self,
        data: Bytes,
        file_name: Option<&str>,
        declared: Option<&str>,
    ) -> ChatResult<MediaMeta> {
        if data.is_empty() {
            return Err(ChatError::validation("Uploaded file is empty"));
        }
        let file_name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("upload")
            .to_string();
        let sniffed = infer::get(&data)
            .map(|kind| kind.mime_type())
            .filter(|mime| RASTER_TYPES.contains(mime));
        let Some(mime) = sniffed else {
            let claimed = declared
                .map(str::to_string)
                .or_else(|| mime_guess::from_path(&file_name).first().map(|m| m.to_string()))
                .unwrap_or_default();
            return Err(if claimed.starts_with("image/") {
                ChatError::validation("Unsupported image type, use PNG, JPEG, GIF or WebP")
            } else {
                ChatError::validation("Only image uploads are allowed")
            });
        };
        let mime = mime.to_string();

        let id = format!("{:x}", Sha256::digest(&data));
        let path = self.path_of(&id).context("content hash is not a media id")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context("create media dir")?;
        }
        let size_bytes = data.len() as i64;
        fs::write(&path, data).await.context("write media file")?;
        tracing::debug!(%id, %mime, size_bytes, "stored media");
        Ok(MediaMeta {
            id,
            mime,
            file_name,
            size_bytes,
        })
    }

    /// On-disk location of a media id, or `None` for anything that is not a
    /// lowercase hex SHA-256 digest.
    pub fn path_of(&self, id: &str) -> Option<PathBuf> {
        if !is_media_id(id) {
            return None;
        }
        Some(self.dir.join(&id[..2]).join(id))
    }

    /// Public URL under which a media id is served.
    pub fn url_for(&self, id: &str) -> ChatResult<String> {
        let url = self
            .public_base
            .join(&format!("chatapp/media/{id}"))
            .context("build media url")?;
        Ok(url.to_string())
    }

    /// Delete the file behind a media id. A missing file is not an error.
    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        let Some(path) = self.path_of(id) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

fn is_media_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Remember metadata for a stored file. Re-uploads keep the first record.
pub fn record(conn: &Connection, meta: &MediaMeta) -> ChatResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO media (id, mime, file_name, size_bytes, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![meta.id, meta.mime, meta.file_name, meta.size_bytes, now_ms()],
    )?;
    Ok(())
}

pub fn lookup(conn: &Connection, id: &str) -> ChatResult<Option<MediaMeta>> {
    let meta = conn
        .query_row(
            "SELECT id, mime, file_name, size_bytes FROM media WHERE id = ?1",
            [id],
            |row| {
                Ok(MediaMeta {
                    id: row.get(0)?,
                    mime: row.get(1)?,
                    file_name: row.get(2)?,
                    size_bytes: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}
