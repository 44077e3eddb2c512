//! Prefix-coded integers and length-prefixed strings (RFC 7541 §5).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HpackError, Result};
use crate::huffman;

/// Integers above this are rejected by the decoder.
const MAX_INTEGER: usize = u32::MAX as usize;

/// Append `value` with an N-bit prefix. `pattern` carries the representation
/// bits above the prefix.
pub fn encode_integer(value: usize, prefix_bits: u8, pattern: u8, dst: &mut BytesMut) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        dst.put_u8(pattern | value as u8);
        return;
    }
    dst.put_u8(pattern | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        dst.put_u8((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.put_u8(rest as u8);
}

/// Decode an N-bit prefix integer at the start of `src`. Returns the value and
/// the number of bytes used.
pub fn decode_integer(src: &[u8], prefix_bits: u8) -> Result<(usize, usize)> {
    let first = *src.first().ok_or(HpackError::Truncated)?;
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = usize::from(first) & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in src.iter().enumerate().skip(1) {
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value += usize::from(byte & 0x7f) << shift;
        if value > MAX_INTEGER {
            return Err(HpackError::IntegerOverflow);
        }
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(HpackError::Truncated)
}

/// Append a string literal, Huffman coded when that is shorter and allowed.
pub fn encode_string(data: &[u8], use_huffman: bool, dst: &mut BytesMut) {
    let huffman_len = huffman::encoded_len(data);
    if use_huffman && huffman_len < data.len() {
        encode_integer(huffman_len, 7, 0x80, dst);
        huffman::encode(data, dst);
    } else {
        encode_integer(data.len(), 7, 0x00, dst);
        dst.put_slice(data);
    }
}

/// Decode a string literal starting at `pos` in `block`. Plain strings are
/// returned as slices of `block`; Huffman strings are decoded into a new
/// buffer. Returns the string and the position after it.
pub fn decode_string(block: &Bytes, pos: usize) -> Result<(Bytes, usize)> {
    let src = block.get(pos..).ok_or(HpackError::Truncated)?;
    let first = *src.first().ok_or(HpackError::Truncated)?;
    let (len, used) = decode_integer(src, 7)?;
    let start = pos + used;
    let end = start.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    if end > block.len() {
        return Err(HpackError::Truncated);
    }

    let value = if first & 0x80 != 0 {
        Bytes::from(huffman::decode(&block[start..end])?)
    } else {
        block.slice(start..end)
    };
    Ok((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: usize, prefix_bits: u8) -> Vec<u8> {
        let mut dst = BytesMut::new();
        encode_integer(value, prefix_bits, 0, &mut dst);
        dst.to_vec()
    }

    #[test]
    fn rfc_integer_examples() {
        // RFC 7541 C.1.1 - C.1.3
        assert_eq!(encoded(10, 5), [10]);
        assert_eq!(encoded(1337, 5), [31, 154, 10]);
        assert_eq!(encoded(42, 8), [42]);

        assert_eq!(decode_integer(&[31, 154, 10], 5).unwrap(), (1337, 3));
        assert_eq!(decode_integer(&[0xea], 5).unwrap(), (10, 1));
    }

    #[test]
    fn value_equal_to_prefix_max_needs_continuation() {
        assert_eq!(encoded(31, 5), [31, 0]);
        assert_eq!(decode_integer(&[31, 0], 5).unwrap(), (31, 2));
    }

    #[test]
    fn pattern_bits_are_preserved() {
        let mut dst = BytesMut::new();
        encode_integer(62, 7, 0x80, &mut dst);
        assert_eq!(&dst[..], &[0xbe]);
    }

    #[test]
    fn truncated_and_overflowing_integers() {
        assert_eq!(decode_integer(&[], 5), Err(HpackError::Truncated));
        assert_eq!(decode_integer(&[31, 0x80], 5), Err(HpackError::Truncated));
        assert_eq!(
            decode_integer(&[31, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f], 5),
            Err(HpackError::IntegerOverflow)
        );
    }

    #[test]
    fn plain_string_is_a_slice_of_the_block() {
        let block = Bytes::from_static(b"\x00\x03abcXYZ");
        let (value, next) = decode_string(&block, 1).unwrap();
        assert_eq!(value.as_ref(), b"abc");
        assert_eq!(next, 5);
        assert_eq!(value.as_ptr(), block[2..].as_ptr());
    }

    #[test]
    fn huffman_string_is_decoded() {
        let mut dst = BytesMut::new();
        encode_string(b"www.example.com", true, &mut dst);
        assert_eq!(dst[0], 0x80 | 12);

        let block = dst.freeze();
        let (value, next) = decode_string(&block, 0).unwrap();
        assert_eq!(value.as_ref(), b"www.example.com");
        assert_eq!(next, block.len());
    }

    #[test]
    fn huffman_skipped_when_longer() {
        let mut dst = BytesMut::new();
        encode_string(&[0xff, 0xfe], true, &mut dst);
        assert_eq!(&dst[..], &[0x02, 0xff, 0xfe]);
    }

    #[test]
    fn string_longer_than_block_is_truncated() {
        let block = Bytes::from_static(b"\x05ab");
        assert_eq!(decode_string(&block, 0), Err(HpackError::Truncated));
    }
}
