//! HPACK header compression (RFC 7541).
//!
//! An [`Encoder`] and a [`Decoder`] each own one bounded [`DynamicTable`]; a
//! connection keeps one of each and never shares them across tasks.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod huffman;
pub mod primitive;
pub mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{HpackError, Result};
pub use table::{DynamicTable, HeaderField, ENTRY_OVERHEAD, STATIC_TABLE_LEN};
