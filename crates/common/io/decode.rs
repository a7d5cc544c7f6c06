use super::{constants::MAX_ARRAY_SIZE, error::DecodeError};

/// Trait for decoding values from the canonical little-endian binary format.
///
/// [`decode_unfinished`](NeoDecode::decode_unfinished) consumes a value from
/// the front of the slice and returns the remaining bytes; implementors only
/// implement that method. [`decode`](NeoDecode::decode) additionally rejects
/// trailing data, which is what wire-level callers want.
pub trait NeoDecode: Sized {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError>;

    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(buf)?;
        if !remaining.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(decoded)
    }
}

impl NeoDecode for bool {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (byte, rest) = split_first(buf)?;
        match byte {
            0x00 => Ok((false, rest)),
            0x01 => Ok((true, rest)),
            other => Err(DecodeError::MalformedBoolean(other)),
        }
    }
}

impl NeoDecode for u8 {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        split_first(buf)
    }
}

impl NeoDecode for u16 {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (bytes, rest) = split_array::<2>(buf)?;
        Ok((u16::from_le_bytes(bytes), rest))
    }
}

impl NeoDecode for u32 {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (bytes, rest) = split_array::<4>(buf)?;
        Ok((u32::from_le_bytes(bytes), rest))
    }
}

impl NeoDecode for u64 {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (bytes, rest) = split_array::<8>(buf)?;
        Ok((u64::from_le_bytes(bytes), rest))
    }
}

impl NeoDecode for i64 {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (bytes, rest) = split_array::<8>(buf)?;
        Ok((i64::from_le_bytes(bytes), rest))
    }
}

impl<const N: usize> NeoDecode for [u8; N] {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        split_array::<N>(buf)
    }
}

impl<T: NeoDecode> NeoDecode for Vec<T> {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        decode_var_array(buf, MAX_ARRAY_SIZE)
    }
}

/// Reads a `var_int`, rejecting non-minimal encodings (a multi-byte form
/// whose value would have fit in a shorter one).
pub fn read_var_int(buf: &[u8]) -> Result<(u64, &[u8]), DecodeError> {
    let (marker, rest) = split_first(buf)?;
    match marker {
        0x00..=0xfc => Ok((u64::from(marker), rest)),
        0xfd => {
            let (bytes, rest) = split_array::<2>(rest)?;
            let value = u64::from(u16::from_le_bytes(bytes));
            if value < 0xfd {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            Ok((value, rest))
        }
        0xfe => {
            let (bytes, rest) = split_array::<4>(rest)?;
            let value = u64::from(u32::from_le_bytes(bytes));
            if value <= 0xffff {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            Ok((value, rest))
        }
        0xff => {
            let (bytes, rest) = split_array::<8>(rest)?;
            let value = u64::from_le_bytes(bytes);
            if value <= 0xffff_ffff {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            Ok((value, rest))
        }
    }
}

/// Reads `var_bytes` with an explicit length cap.
pub fn read_var_bytes(buf: &[u8], cap: usize) -> Result<(Vec<u8>, &[u8]), DecodeError> {
    let (len, rest) = read_var_int(buf)?;
    if len > cap as u64 {
        return Err(DecodeError::LengthCap { declared: len, cap });
    }
    let len = len as usize;
    if rest.len() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = rest.split_at(len);
    Ok((bytes.to_vec(), rest))
}

/// Reads a UTF-8 `var_string` with a byte-length cap.
pub fn read_var_string(buf: &[u8], cap: usize) -> Result<(String, &[u8]), DecodeError> {
    let (bytes, rest) = read_var_bytes(buf, cap)?;
    let s = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s, rest))
}

/// Reads a `var_int`-prefixed array with an element-count cap.
pub fn decode_var_array<T: NeoDecode>(
    buf: &[u8],
    cap: usize,
) -> Result<(Vec<T>, &[u8]), DecodeError> {
    let (count, mut rest) = read_var_int(buf)?;
    if count > cap as u64 {
        return Err(DecodeError::LengthCap { declared: count, cap });
    }
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let (item, r) = T::decode_unfinished(rest)?;
        items.push(item);
        rest = r;
    }
    Ok((items, rest))
}

fn split_first(buf: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    match buf.split_first() {
        Some((first, rest)) => Ok((*first, rest)),
        None => Err(DecodeError::UnexpectedEof),
    }
}

fn split_array<const N: usize>(buf: &[u8]) -> Result<([u8; N], &[u8]), DecodeError> {
    if buf.len() < N {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = buf.split_at(N);
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(head);
    Ok((bytes, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{write_var_bytes, write_var_int};

    #[test]
    fn var_int_round_trip() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut buf = Vec::new();
            write_var_int(value, &mut buf);
            let (decoded, rest) = read_var_int(&buf).expect("decode");
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn var_int_rejects_non_minimal() {
        // 0x05 padded out to the 3-byte form.
        assert_eq!(
            read_var_int(&[0xfd, 0x05, 0x00]),
            Err(DecodeError::NonCanonicalVarInt)
        );
        // 0xffff padded out to the 5-byte form.
        assert_eq!(
            read_var_int(&[0xfe, 0xff, 0xff, 0x00, 0x00]),
            Err(DecodeError::NonCanonicalVarInt)
        );
    }

    #[test]
    fn var_bytes_honours_cap() {
        let mut buf = Vec::new();
        write_var_bytes(&[0xaa; 32], &mut buf);
        assert!(read_var_bytes(&buf, 31).is_err());
        let (bytes, rest) = read_var_bytes(&buf, 32).expect("within cap");
        assert_eq!(bytes.len(), 32);
        assert!(rest.is_empty());
    }

    #[test]
    fn var_bytes_rejects_truncated_payload() {
        // Declares 16 bytes but carries 4.
        let mut buf = Vec::new();
        write_var_int(16, &mut buf);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(read_var_bytes(&buf, 1024), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_eq!(u16::decode(&[1, 0, 7]), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn bool_rejects_junk() {
        assert_eq!(bool::decode(&[0x02]), Err(DecodeError::MalformedBoolean(2)));
    }
}
