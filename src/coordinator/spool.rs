//! Scoped spool files for inbound uploads
//!
//! An upload is written to local disk in full before any node is contacted,
//! so every node attempt can re-stream the same bytes. The spool is a scoped
//! resource: the backing temp file is removed when the value drops, on every
//! exit path, whether the upload succeeded, a node failed or the client
//! disconnected.

use crate::common::{Error, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

pub struct Spool {
    file: NamedTempFile,
}

impl Spool {
    pub fn create_in(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        Ok(Self { file })
    }

    /// Drain the inbound byte stream to disk. Returns the byte count.
    pub async fn fill<S, E>(&mut self, mut body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut out = tokio::fs::File::from_std(self.file.as_file().try_clone()?);
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::ClientStream(e.to_string()))?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }

    /// Independent read handle, positioned at the start.
    pub fn reader(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.file.reopen()?))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin {
        futures_util::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from(p.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_fill_and_read_back() {
        let mut spool = Spool::create_in(None).unwrap();
        let written = spool.fill(chunks(&["hello ", "world"])).await.unwrap();
        assert_eq!(written, 11);

        let mut contents = String::new();
        spool
            .reader()
            .unwrap()
            .read_to_string(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, "hello world");
    }

    #[tokio::test]
    async fn test_removed_on_drop() {
        let spool = Spool::create_in(None).unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());
        drop(spool);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let mut spool = Spool::create_in(None).unwrap();
        let broken = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = spool.fill(broken).await.unwrap_err();
        assert!(matches!(err, Error::ClientStream(_)));
    }
}
