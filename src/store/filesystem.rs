//! Filesystem-backed body store.
//!
//! Layout under the configured root:
//! - `request/{id}` — staged request bodies awaiting connector pickup
//! - `response/{id}` — staged response bodies awaiting the edge writer
//! - `spool/` — scratch space for the ingress body spool

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

use crate::error::BodyStoreError;
use crate::protocol::RequestId;

#[derive(Debug, Clone, Copy)]
enum Side {
    Request,
    Response,
}

impl Side {
    fn dir(self) -> &'static str {
        match self {
            Side::Request => "request",
            Side::Response => "response",
        }
    }
}

/// Content-addressed staging of oversized payloads by request id.
#[derive(Debug, Clone)]
pub struct FsBodyStore {
    root: Arc<PathBuf>,
}

impl FsBodyStore {
    /// Open (and create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BodyStoreError> {
        let root = root.into();
        for dir in ["request", "response", "spool"] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Scratch path for the ingress spool of this request.
    pub fn spool_path(&self, id: RequestId) -> PathBuf {
        self.root.join("spool").join(id.to_string())
    }

    fn entry_path(&self, side: Side, id: RequestId) -> PathBuf {
        self.root.join(side.dir()).join(id.to_string())
    }

    pub async fn store_request_body<R>(
        &self,
        id: RequestId,
        reader: &mut R,
    ) -> Result<u64, BodyStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(Side::Request, id, reader).await
    }

    pub async fn store_response_body<R>(
        &self,
        id: RequestId,
        reader: &mut R,
    ) -> Result<u64, BodyStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(Side::Response, id, reader).await
    }

    /// Move an already-spooled file into the request staging area.
    ///
    /// Cheap rename; the spool and the store share one filesystem root.
    pub async fn persist_spooled_request(
        &self,
        id: RequestId,
        spooled: &Path,
    ) -> Result<(), BodyStoreError> {
        tokio::fs::rename(spooled, self.entry_path(Side::Request, id)).await?;
        Ok(())
    }

    pub async fn open_request_body(&self, id: RequestId) -> Result<StoredBody, BodyStoreError> {
        self.open_entry(Side::Request, id).await
    }

    pub async fn open_response_body(&self, id: RequestId) -> Result<StoredBody, BodyStoreError> {
        self.open_entry(Side::Response, id).await
    }

    /// Guard over a staged request body: dropping it deletes the entry
    /// if the consumer has not already done so.
    pub fn stage_guard(&self, id: RequestId) -> StagedRequestBody {
        StagedRequestBody {
            id,
            store: self.clone(),
        }
    }

    /// Remove a staged request body. Idempotent.
    pub async fn delete_request_body(&self, id: RequestId) {
        let _ = tokio::fs::remove_file(self.entry_path(Side::Request, id)).await;
    }

    /// Remove a staged response body. Idempotent.
    pub async fn delete_response_body(&self, id: RequestId) {
        let _ = tokio::fs::remove_file(self.entry_path(Side::Response, id)).await;
    }

    async fn store<R>(&self, side: Side, id: RequestId, reader: &mut R) -> Result<u64, BodyStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.entry_path(side, id);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        tracing::debug!(request_id = %id, side = side.dir(), bytes = written, "body staged");
        Ok(written)
    }

    async fn open_entry(&self, side: Side, id: RequestId) -> Result<StoredBody, BodyStoreError> {
        let path = self.entry_path(side, id);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BodyStoreError::Missing(id));
            }
            Err(err) => return Err(err.into()),
        };
        let len = file.metadata().await?.len();
        Ok(StoredBody {
            file,
            len,
            guard: DeleteGuard { path },
        })
    }
}

/// A staged body opened for reading.
///
/// Dropping it (or the stream derived from it) deletes the entry.
#[derive(Debug)]
pub struct StoredBody {
    file: File,
    len: u64,
    guard: DeleteGuard,
}

impl StoredBody {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole body into memory. The entry is deleted afterwards.
    pub async fn read_to_end(mut self) -> Result<Bytes, BodyStoreError> {
        let mut buf = BytesMut::with_capacity(self.len as usize);
        while self.file.read_buf(&mut buf).await? > 0 {}
        Ok(buf.freeze())
    }

    /// Stream the body; the entry is deleted when the stream is dropped.
    pub fn into_stream(self) -> BodyStream {
        BodyStream {
            inner: ReaderStream::new(self.file),
            _guard: self.guard,
        }
    }
}

/// Byte stream over a staged body, deleting the entry on drop.
#[derive(Debug)]
pub struct BodyStream {
    inner: ReaderStream<File>,
    _guard: DeleteGuard,
}

impl Stream for BodyStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Producer-side guard over a staged request body.
#[derive(Debug)]
pub struct StagedRequestBody {
    id: RequestId,
    store: FsBodyStore,
}

impl Drop for StagedRequestBody {
    fn drop(&mut self) {
        let path = self.store.entry_path(Side::Request, self.id);
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %err, "failed to remove staged body");
            }
        }
    }
}

#[derive(Debug)]
struct DeleteGuard {
    path: PathBuf,
}

impl Drop for DeleteGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %err, "failed to remove staged body");
            }
        }
    }
}
