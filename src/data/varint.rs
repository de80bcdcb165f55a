//! Variable-length Integer Encoding (Varint)
//!
//! Each byte carries 7 bits of payload; the high bit is a continuation flag.
//! Signed values go through ZigZag first so small magnitudes stay short:
//! 0 → 0, -1 → 1, 1 → 2, -2 → 3, ...
//!
//! Decoding works on a plain slice and returns `None` when the slice ends in
//! the middle of a varint, which is how a torn segment tail shows up.

use bytes::BufMut;

/// Worst-case encoded width of a 32-bit value
pub const MAX_VARINT_LEN32: usize = 5;

/// Worst-case encoded width of a 64-bit value
pub const MAX_VARINT_LEN64: usize = 10;

/// Encode a signed integer as a varint (ZigZag encoding)
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;
    encode_uvarint(buf, unsigned);
}

/// Encode an unsigned integer as a varint
pub fn encode_uvarint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a signed varint, returning the value and the bytes consumed
pub fn decode_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (unsigned, n) = decode_uvarint(buf)?;

    let value = (unsigned >> 1) as i64;
    if (unsigned & 1) != 0 {
        Some((!value, n))
    } else {
        Some((value, n))
    }
}

/// Decode an unsigned varint, returning the value and the bytes consumed
pub fn decode_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN64) {
        // The tenth byte may only contribute the single remaining bit
        if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }

    None
}
