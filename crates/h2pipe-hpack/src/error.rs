/// Errors raised while decoding a header block.
///
/// Every variant is a compression error: the decoder's dynamic table can no
/// longer be trusted to match the peer's, so the connection must be closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    /// The block ended in the middle of a representation.
    #[error("header block truncated")]
    Truncated,

    /// An integer does not fit the decoder's limits.
    #[error("integer overflow in header block")]
    IntegerOverflow,

    /// A Huffman-coded string is malformed or has invalid padding.
    #[error("invalid huffman-coded string")]
    InvalidHuffman,

    /// An index is zero or beyond the static and dynamic tables.
    #[error("header index {index} out of range (table has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// A dynamic table size update exceeds the advertised maximum.
    #[error("table size update to {size} exceeds maximum {max}")]
    InvalidSizeUpdate { size: usize, max: usize },

    /// A dynamic table size update followed a header field.
    #[error("table size update after the start of a header block")]
    SizeUpdateNotAtStart,
}

pub type Result<T> = std::result::Result<T, HpackError>;
