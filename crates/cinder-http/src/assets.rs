//! Static asset stage. Requests that resolve to a file under the configured
//! root are served directly and never reach the worker.

use std::path::{Path, PathBuf};

use axum::body::Body;
use bytes::Bytes;
use futures_util::stream;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct AssetServer {
    root: PathBuf,
}

impl AssetServer {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, String> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .map_err(|e| format!("assets directory {} unusable: {}", root.display(), e))?;
        Ok(Self { root })
    }

    /// Resolve a request path against the asset root. `None` means the
    /// request falls through to the next stage: missing file, directory
    /// without an index, or a path that escapes the root.
    pub async fn serve(&self, request_path: &str) -> Option<(String, Body)> {
        let file = self.resolve(request_path).await?;
        let mime = mime_guess::from_path(&file)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let file = tokio::fs::File::open(&file).await.ok()?;
        Some((mime, stream_file(file)))
    }

    async fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        let joined = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        };
        let canonical = tokio::fs::canonicalize(&joined).await.ok()?;
        if !canonical.starts_with(&self.root) {
            return None;
        }
        let meta = tokio::fs::metadata(&canonical).await.ok()?;
        if meta.is_file() {
            return Some(canonical);
        }
        if meta.is_dir() {
            let index = canonical.join("index.html");
            if tokio::fs::metadata(&index).await.ok()?.is_file() {
                return Some(index);
            }
        }
        None
    }
}

fn stream_file(file: tokio::fs::File) -> Body {
    let chunks = stream::unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<Bytes, std::io::Error>(Bytes::from(buf)), file))
            }
            Err(e) => Some((Err(e), file)),
        }
    });
    Body::from_stream(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_bytes(body: Body) -> Vec<u8> {
        axum::body::to_bytes(body, usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_serves_file_with_mime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("star.svg"), "<svg></svg>").unwrap();
        let assets = AssetServer::new(dir.path()).unwrap();

        let (mime, body) = assets.serve("/star.svg").await.unwrap();
        assert_eq!(mime, "image/svg+xml");
        assert_eq!(body_bytes(body).await, b"<svg></svg>");
    }

    #[tokio::test]
    async fn test_missing_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let assets = AssetServer::new(dir.path()).unwrap();
        assert!(assets.serve("/nope.png").await.is_none());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("secret.txt"), "hidden").unwrap();
        let nested = parent.path().join("public");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("ok.txt"), "fine").unwrap();

        let assets = AssetServer::new(&nested).unwrap();
        assert!(assets.serve("/../secret.txt").await.is_none());
        assert!(assets.serve("/ok.txt").await.is_some());
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let assets = AssetServer::new(dir.path()).unwrap();

        let (mime, body) = assets.serve("/").await.unwrap();
        assert_eq!(mime, "text/html");
        assert_eq!(body_bytes(body).await, b"<html></html>");
    }
}
