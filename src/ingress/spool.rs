//! Rewindable request-body buffering.
//!
//! The caller's body stream is drained exactly once, into memory up to
//! a configured bound and onto disk beyond it. Interceptors and the
//! inline-or-outsource decision then work against the complete,
//! re-readable payload.

use std::path::PathBuf;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::{BodyStoreError, RelayError};
use crate::protocol::RequestId;
use crate::store::{FsBodyStore, StagedRequestBody};

/// A fully drained request body.
#[derive(Debug)]
pub enum DrainedBody {
    Empty,
    Memory(Bytes),
    Spilled(SpoolFile),
}

impl DrainedBody {
    /// Drain `body` completely. Payloads beyond `memory_limit` bytes
    /// spill into `spill_path`.
    pub async fn drain(
        body: Body,
        spill_path: PathBuf,
        memory_limit: usize,
    ) -> Result<Self, RelayError> {
        let mut stream = body.into_data_stream();
        let mut buffered = BytesMut::new();
        let mut spilled: Option<(tokio::fs::File, u64)> = None;

        loop {
            let chunk = match stream.try_next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // The body stream only errors when the caller went away.
                Err(_) => return Err(RelayError::ClientAborted),
            };

            match &mut spilled {
                Some((file, len)) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|err| RelayError::BodyStore(BodyStoreError::Io(err)))?;
                    *len += chunk.len() as u64;
                }
                None => {
                    buffered.extend_from_slice(&chunk);
                    if buffered.len() > memory_limit {
                        let mut file = OpenOptions::new()
                            .create(true)
                            .truncate(true)
                            .write(true)
                            .open(&spill_path)
                            .await
                            .map_err(|err| RelayError::BodyStore(BodyStoreError::Io(err)))?;
                        file.write_all(&buffered)
                            .await
                            .map_err(|err| RelayError::BodyStore(BodyStoreError::Io(err)))?;
                        let len = buffered.len() as u64;
                        buffered.clear();
                        spilled = Some((file, len));
                    }
                }
            }
        }

        match spilled {
            Some((mut file, len)) => {
                file.flush()
                    .await
                    .map_err(|err| RelayError::BodyStore(BodyStoreError::Io(err)))?;
                Ok(Self::Spilled(SpoolFile {
                    path: spill_path,
                    len,
                    keep: false,
                }))
            }
            None if buffered.is_empty() => Ok(Self::Empty),
            None => Ok(Self::Memory(buffered.freeze())),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Memory(bytes) => bytes.len() as u64,
            Self::Spilled(file) => file.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A body spilled to the spool directory; removed on drop unless it
/// was persisted into the body store.
#[derive(Debug)]
pub struct SpoolFile {
    path: PathBuf,
    len: u64,
    keep: bool,
}

impl SpoolFile {
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Rewind: read the spilled payload back into memory.
    pub async fn read_to_bytes(&self) -> Result<Bytes, BodyStoreError> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }

    /// Move the payload into the body store's request staging area.
    pub async fn persist(
        mut self,
        store: &FsBodyStore,
        id: RequestId,
    ) -> Result<StagedRequestBody, BodyStoreError> {
        store.persist_spooled_request(id, &self.path).await?;
        self.keep = true;
        Ok(store.stage_guard(id))
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
