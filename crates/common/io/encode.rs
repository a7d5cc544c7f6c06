use bytes::BufMut;

/// Trait for encoding values into the canonical little-endian binary format.
///
/// Fixed-width integers are written little-endian; collections and byte
/// strings are prefixed with a [`write_var_int`] length. Implementors write
/// their fields in wire order and nothing else — the caller owns framing.
pub trait NeoEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Serialized size in bytes. The default implementation encodes into a
    /// scratch buffer; types on hot paths override it with arithmetic.
    fn encoded_size(&self) -> usize {
        self.encode_to_vec().len()
    }
}

impl NeoEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(u8::from(*self));
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl NeoEncode for u8 {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(*self);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl NeoEncode for u16 {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u16_le(*self);
    }

    fn encoded_size(&self) -> usize {
        2
    }
}

impl NeoEncode for u32 {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u32_le(*self);
    }

    fn encoded_size(&self) -> usize {
        4
    }
}

impl NeoEncode for u64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u64_le(*self);
    }

    fn encoded_size(&self) -> usize {
        8
    }
}

impl NeoEncode for i64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_i64_le(*self);
    }

    fn encoded_size(&self) -> usize {
        8
    }
}

impl<const N: usize> NeoEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_slice(self);
    }

    fn encoded_size(&self) -> usize {
        N
    }
}

impl<T: NeoEncode> NeoEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        write_var_int(self.len() as u64, buf);
        for item in self {
            item.encode(buf);
        }
    }

    fn encoded_size(&self) -> usize {
        var_int_size(self.len() as u64) + self.iter().map(NeoEncode::encoded_size).sum::<usize>()
    }
}

/// Writes a variable-length integer: 1 byte below `0xfd`, otherwise a marker
/// byte followed by a 2/4/8-byte little-endian value.
pub fn write_var_int(value: u64, buf: &mut dyn BufMut) {
    match value {
        0..=0xfc => buf.put_u8(value as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(value);
        }
    }
}

/// Writes `var_int(len) || bytes`.
pub fn write_var_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    write_var_int(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

/// Writes a UTF-8 string as `var_bytes`.
pub fn write_var_string(s: &str, buf: &mut dyn BufMut) {
    write_var_bytes(s.as_bytes(), buf);
}

/// Encoded size of a `var_int`.
pub const fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Encoded size of `var_bytes` for a payload of `len` bytes.
pub const fn var_bytes_size(len: usize) -> usize {
    var_int_size(len as u64) + len
}
