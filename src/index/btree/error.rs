use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Node too large for page")]
    NodeTooLarge,

    #[error("Failed to serialize key: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize key: {0}")]
    DeserializationError(String),

    #[error("Page {0} is not a valid index page")]
    InvalidPageFormat(PageId),

    #[error("Page {0} is not referenced by its parent")]
    OrphanPage(PageId),

    #[error("Header directory rejected index name {0:?}")]
    HeaderDirectory(String),

    #[error("Tree invariant violated: {0}")]
    CorruptTree(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
