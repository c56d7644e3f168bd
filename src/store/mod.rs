//! Staging area for oversized bodies.
//!
//! Payloads above the binary-size threshold never travel inside an
//! envelope; they are staged here under the request id and fetched out
//! of band. Entries are owned jointly by producer and consumer; whoever
//! holds the last guard deletes the file.

mod filesystem;

pub use filesystem::{BodyStream, FsBodyStore, StagedRequestBody, StoredBody};
