/// Errors that can occur in the storage layer.
///
/// `Clone` because store failures travel inside shared refresh results,
/// where every waiting caller receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (network loss, backend down).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An update targeted a document that does not exist.
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// A document's fields could not be mapped to the expected shape.
    #[error("invalid document data: {0}")]
    InvalidData(String),
}
