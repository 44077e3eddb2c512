use bytes::Bytes;
use tracing::trace;

use crate::error::{HpackError, Result};
use crate::primitive::{decode_integer, decode_string};
use crate::table::{static_entry, DynamicTable, HeaderField, STATIC_TABLE_LEN};

/// Header block decoder. Owns the receive-side dynamic table.
#[derive(Debug, Clone)]
pub struct Decoder {
    table: DynamicTable,
    /// The largest table size the peer's encoder may select: our advertised
    /// SETTINGS_HEADER_TABLE_SIZE.
    max_allowed_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_allowed_size: max_table_size,
        }
    }

    /// Change the limit the peer's size updates are checked against, after we
    /// advertise a new SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_allowed_size(&mut self, size: usize) {
        self.max_allowed_size = size;
        if self.table.max_size() > size {
            self.table.resize(size);
        }
    }

    pub fn max_allowed_size(&self) -> usize {
        self.max_allowed_size
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode a complete header block.
    ///
    /// Literal strings that are not Huffman coded are returned as slices of
    /// `block`. Any error leaves the table out of sync with the peer and must
    /// be treated as fatal for the connection.
    pub fn decode(&mut self, block: &Bytes) -> Result<Vec<HeaderField>> {
        let mut fields = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let first = block[pos];
            let rest = &block[pos..];

            if first & 0x80 != 0 {
                // Indexed field.
                let (index, used) = decode_integer(rest, 7)?;
                fields.push(self.field_at(index)?);
                pos += used;
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                let (field, next) = self.decode_literal(block, pos, 6)?;
                trace!(size = field.size(), "indexing decoded field");
                self.table.insert(field.clone());
                fields.push(field);
                pos = next;
            } else if first & 0x20 != 0 {
                // Dynamic table size update.
                if !fields.is_empty() {
                    return Err(HpackError::SizeUpdateNotAtStart);
                }
                let (size, used) = decode_integer(rest, 5)?;
                if size > self.max_allowed_size {
                    return Err(HpackError::InvalidSizeUpdate {
                        size,
                        max: self.max_allowed_size,
                    });
                }
                self.table.resize(size);
                pos += used;
            } else {
                // Literal without indexing (0000) or never indexed (0001).
                let (field, next) = self.decode_literal(block, pos, 4)?;
                fields.push(field);
                pos = next;
            }
        }

        Ok(fields)
    }

    fn decode_literal(
        &self,
        block: &Bytes,
        pos: usize,
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize)> {
        let (name_index, used) = decode_integer(&block[pos..], prefix_bits)?;
        let mut next = pos + used;
        let name = if name_index == 0 {
            let (name, after) = decode_string(block, next)?;
            next = after;
            name
        } else {
            self.field_at(name_index)?.name
        };
        let (value, after) = decode_string(block, next)?;
        Ok((HeaderField { name, value }, after))
    }

    /// Resolve a 1-based index across the static and dynamic tables.
    fn field_at(&self, index: usize) -> Result<HeaderField> {
        let out_of_range = || HpackError::IndexOutOfRange {
            index,
            len: STATIC_TABLE_LEN + self.table.len(),
        };
        if index == 0 {
            return Err(out_of_range());
        }
        if index <= STATIC_TABLE_LEN {
            return static_entry(index).ok_or_else(out_of_range);
        }
        self.table
            .lookup(index - STATIC_TABLE_LEN - 1)
            .cloned()
            .map_err(|_| out_of_range())
    }
}
