//! Variable-length integers in the 7-bits-per-byte, low-group-first layout
//! used by the chunk wire format.

use bytes::{Buf, BufMut};

use crate::error::CodecError;

/// Maximum encoded length of a 32-bit varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Writes `value` as a varint. Negative values always take five bytes.
pub fn write_varint(out: &mut impl BufMut, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            out.put_u8(value as u8);
            return;
        }
        out.put_u8((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

/// Reads a varint from the front of `buf`.
pub fn read_varint(buf: &mut impl Buf) -> Result<i32, CodecError> {
    let mut result = 0u32;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(CodecError::UnexpectedEof { needed: 1 });
        }
        let byte = buf.get_u8();
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(CodecError::VarIntTooLong)
}

/// Reads a varint that must be a non-negative length or count.
pub fn read_length(buf: &mut impl Buf) -> Result<usize, CodecError> {
    let value = read_varint(buf)?;
    usize::try_from(value).map_err(|_| CodecError::NegativeLength(value))
}

/// Returns the number of bytes [`write_varint`] emits for `value`.
pub fn varint_len(value: i32) -> usize {
    let value = value as u32;
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Fails with [`CodecError::UnexpectedEof`] unless `buf` holds `len` more bytes.
pub(crate) fn ensure_remaining(buf: &impl Buf, len: usize) -> Result<(), CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::UnexpectedEof {
            needed: len - buf.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: i32) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, value);
        out
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), [0x00]);
        assert_eq!(encode(1), [0x01]);
        assert_eq!(encode(127), [0x7F]);
        assert_eq!(encode(128), [0x80, 0x01]);
        assert_eq!(encode(255), [0xFF, 0x01]);
        assert_eq!(encode(2_097_151), [0xFF, 0xFF, 0x7F]);
        assert_eq!(encode(-1), [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_read_back_known_values() {
        for value in [0, 1, 300, 65_535, i32::MAX, -1, i32::MIN] {
            let bytes = encode(value);
            assert_eq!(bytes.len(), varint_len(value), "length of {value}");
            let mut slice = &bytes[..];
            assert_eq!(read_varint(&mut slice).unwrap(), value);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_truncated_varint_is_eof() {
        let mut slice: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            read_varint(&mut slice),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_overlong_varint_rejected() {
        let mut slice: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            read_varint(&mut slice),
            Err(CodecError::VarIntTooLong)
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = encode(-5);
        let mut slice = &bytes[..];
        assert!(matches!(
            read_length(&mut slice),
            Err(CodecError::NegativeLength(-5))
        ));
    }
}
