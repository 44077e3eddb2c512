use bytes::BytesMut;

use crate::primitive::{encode_integer, encode_string};
use crate::table::{entry_size, static_find, DynamicTable, HeaderField, STATIC_TABLE_LEN};

/// Header names that are always sent as never-indexed literals.
const SENSITIVE_HEADERS: [&[u8]; 4] = [
    b"authorization",
    b"cookie",
    b"proxy-authorization",
    b"set-cookie",
];

fn is_sensitive(name: &[u8]) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Header block encoder. Owns the send-side dynamic table.
#[derive(Debug, Clone)]
pub struct Encoder {
    table: DynamicTable,
    use_huffman: bool,
    /// Smallest and final sizes requested since the last block.
    pending_resize: Option<(usize, usize)>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            use_huffman: true,
            pending_resize: None,
        }
    }

    pub fn set_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Resize the table after the peer changes SETTINGS_HEADER_TABLE_SIZE.
    ///
    /// The change is announced at the start of the next block; when several
    /// changes arrive in between, both the smallest and the final size are
    /// announced.
    pub fn set_max_table_size(&mut self, size: usize) {
        let (smallest, _) = self.pending_resize.unwrap_or((size, size));
        self.pending_resize = Some((smallest.min(size), size));
        self.table.resize(size);
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode a header list into one header block.
    pub fn encode<'a, I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        if let Some((smallest, last)) = self.pending_resize.take() {
            if smallest < last {
                encode_integer(smallest, 5, 0x20, dst);
            }
            encode_integer(last, 5, 0x20, dst);
        }
        for field in headers {
            self.encode_field(field, dst);
        }
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        let name = field.name.as_ref();
        let value = field.value.as_ref();

        if is_sensitive(name) {
            let name_index = self.find(name, value).map_or(0, |(index, _)| index);
            self.encode_literal(name_index, field, 4, 0x10, dst);
            return;
        }

        let found = self.find(name, value);
        if let Some((index, true)) = found {
            encode_integer(index, 7, 0x80, dst);
            return;
        }

        let name_index = found.map_or(0, |(index, _)| index);
        if entry_size(name, value) <= self.table.max_size() {
            self.encode_literal(name_index, field, 6, 0x40, dst);
            self.table.insert(field.clone());
        } else {
            self.encode_literal(name_index, field, 4, 0x00, dst);
        }
    }

    fn encode_literal(
        &self,
        name_index: usize,
        field: &HeaderField,
        prefix_bits: u8,
        pattern: u8,
        dst: &mut BytesMut,
    ) {
        encode_integer(name_index, prefix_bits, pattern, dst);
        if name_index == 0 {
            encode_string(&field.name, self.use_huffman, dst);
        }
        encode_string(&field.value, self.use_huffman, dst);
    }

    /// Best match across both tables as a 1-based index: an exact match in
    /// either table wins, then a static name match, then a dynamic one.
    fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let from_static = static_find(name, value);
        if let Some((_, true)) = from_static {
            return from_static;
        }
        let from_dynamic = self
            .table
            .find(name, value)
            .map(|(index, exact)| (index + STATIC_TABLE_LEN + 1, exact));
        match from_dynamic {
            Some((_, true)) => from_dynamic,
            _ => from_static.or(from_dynamic),
        }
    }
}
