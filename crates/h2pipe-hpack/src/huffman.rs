//! Huffman coding for header string literals (RFC 7541 Appendix B).
//!
//! The code is canonical: codes of equal length are consecutive integers
//! assigned in symbol order. Decoding exploits that with one
//! `(first code, count)` range per code length instead of a tree.

use std::sync::OnceLock;

use bytes::{BufMut, BytesMut};

use crate::error::{HpackError, Result};

const EOS: u16 = 256;
const MAX_CODE_LEN: u32 = 30;

/// `(code, bit length)` for each byte value, followed by EOS.
#[rustfmt::skip]
static CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28), // 0x00
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28), // 0x04
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28), // 0x08
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28), // 0x0c
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28), // 0x10
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28), // 0x14
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28), // 0x18
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28), // 0x1c
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12), // 0x20
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11), // 0x24
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11), // 0x28
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6), // 0x2c
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6), // 0x30
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6), // 0x34
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8), // 0x38
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10), // 0x3c
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7), // 0x40
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7), // 0x44
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7), // 0x48
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7), // 0x4c
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7), // 0x50
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7), // 0x54
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13), // 0x58
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6), // 0x5c
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5), // 0x60
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6), // 0x64
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7), // 0x68
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5), // 0x6c
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5), // 0x70
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7), // 0x74
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15), // 0x78
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28), // 0x7c
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20), // 0x80
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23), // 0x84
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23), // 0x88
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23), // 0x8c
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23), // 0x90
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23), // 0x94
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23), // 0x98
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24), // 0x9c
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22), // 0xa0
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21), // 0xa4
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24), // 0xa8
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23), // 0xac
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21), // 0xb0
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23), // 0xb4
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22), // 0xb8
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23), // 0xbc
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19), // 0xc0
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25), // 0xc4
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27), // 0xc8
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25), // 0xcc
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27), // 0xd0
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24), // 0xd4
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26), // 0xd8
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27), // 0xdc
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21), // 0xe0
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23), // 0xe4
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25), // 0xe8
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23), // 0xec
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26), // 0xf0
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27), // 0xf4
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27), // 0xf8
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26), // 0xfc
    (0x3fffffff, 30), // EOS
];

struct DecodeTable {
    /// Per code length: first code, offset into `symbols`, number of codes.
    ranges: [(u32, usize, usize); MAX_CODE_LEN as usize + 1],
    /// Symbols ordered by (length, code).
    symbols: Vec<u16>,
}

fn decode_table() -> &'static DecodeTable {
    static TABLE: OnceLock<DecodeTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut symbols: Vec<u16> = (0..=EOS).collect();
        symbols.sort_by_key(|&sym| {
            let (code, len) = CODES[usize::from(sym)];
            (len, code)
        });

        let mut ranges = [(0u32, 0usize, 0usize); MAX_CODE_LEN as usize + 1];
        for (pos, &sym) in symbols.iter().enumerate() {
            let (code, len) = CODES[usize::from(sym)];
            let range = &mut ranges[usize::from(len)];
            if range.2 == 0 {
                *range = (code, pos, 0);
            }
            range.2 += 1;
        }
        DecodeTable { ranges, symbols }
    })
}

/// Decode a Huffman-coded string.
///
/// Fails on an embedded EOS symbol, on padding longer than 7 bits, and on
/// padding that is not a prefix of EOS (all ones).
pub fn decode(src: &[u8]) -> Result<Vec<u8>> {
    let table = decode_table();
    let mut out = Vec::with_capacity(src.len() + src.len() / 2);
    let mut acc: u64 = 0;
    let mut acc_len: u32 = 0;

    for &byte in src {
        acc = (acc << 8) | u64::from(byte);
        acc_len += 8;

        'symbols: while acc_len >= 5 {
            for len in 5..=acc_len.min(MAX_CODE_LEN) {
                let candidate = (acc >> (acc_len - len)) as u32;
                let (first, offset, count) = table.ranges[len as usize];
                if count == 0 || candidate < first || (candidate - first) as usize >= count {
                    continue;
                }
                let sym = table.symbols[offset + (candidate - first) as usize];
                if sym == EOS {
                    return Err(HpackError::InvalidHuffman);
                }
                out.push(sym as u8);
                acc_len -= len;
                acc &= (1u64 << acc_len) - 1;
                continue 'symbols;
            }
            if acc_len >= MAX_CODE_LEN {
                return Err(HpackError::InvalidHuffman);
            }
            break;
        }
    }

    if acc_len > 7 {
        return Err(HpackError::InvalidHuffman);
    }
    let mask = (1u64 << acc_len) - 1;
    if acc & mask != mask {
        return Err(HpackError::InvalidHuffman);
    }
    Ok(out)
}

/// Append the Huffman coding of `src`, padded with ones to a byte boundary.
pub fn encode(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(src));
    let mut bits: u64 = 0;
    let mut bit_count: u32 = 0;

    for &byte in src {
        let (code, len) = CODES[usize::from(byte)];
        bits = (bits << len) | u64::from(code);
        bit_count += u32::from(len);
        while bit_count >= 8 {
            bit_count -= 8;
            dst.put_u8((bits >> bit_count) as u8);
        }
        bits &= (1u64 << bit_count) - 1;
    }

    if bit_count > 0 {
        let pad = 8 - bit_count;
        dst.put_u8(((bits << pad) | ((1u64 << pad) - 1)) as u8);
    }
}

/// Length in bytes of the Huffman coding of `src`.
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src
        .iter()
        .map(|&byte| usize::from(CODES[usize::from(byte)].1))
        .sum();
    bits.div_ceil(8)
}
