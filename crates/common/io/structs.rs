use super::{decode::NeoDecode, error::DecodeError};

/// # Struct decoding helper
///
/// Walks a buffer field by field, attaching the field name to any error so
/// malformed payloads point at the offending field instead of a bare
/// "unexpected eof".
///
/// ```
/// # use neorex_io::structs::Decoder;
/// let buf = [0x2a, 0x07, 0x00, 0x00, 0x00];
/// let decoder = Decoder::new(&buf);
/// let (a, decoder): (u8, _) = decoder.decode_field("a").unwrap();
/// let (b, decoder): (u32, _) = decoder.decode_field("b").unwrap();
/// decoder.finish().unwrap();
/// assert_eq!((a, b), (0x2a, 7));
/// ```
#[derive(Debug)]
#[must_use = "`Decoder` must be consumed with `finish` to reject trailing data"]
pub struct Decoder<'a> {
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { remaining: buf }
    }

    pub fn decode_field<T: NeoDecode>(self, name: &str) -> Result<(T, Self), DecodeError> {
        let (field, rest) = T::decode_unfinished(self.remaining)
            .map_err(|err| field_decode_error::<T>(name, err))?;
        Ok((field, Self { remaining: rest }))
    }

    /// Runs a closure over the remaining bytes for fields the trait can't
    /// express (capped var_bytes, discriminated unions).
    pub fn decode_with<T>(
        self,
        name: &str,
        f: impl FnOnce(&'a [u8]) -> Result<(T, &'a [u8]), DecodeError>,
    ) -> Result<(T, Self), DecodeError> {
        let (field, rest) = f(self.remaining).map_err(|err| field_decode_error::<T>(name, err))?;
        Ok((field, Self { remaining: rest }))
    }

    /// Rejects trailing data after the last expected field.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.remaining.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes)
        }
    }

    /// Hands back whatever follows the decoded fields, for nested decoding.
    pub const fn rest(self) -> &'a [u8] {
        self.remaining
    }
}

fn field_decode_error<T>(field_name: &str, err: DecodeError) -> DecodeError {
    let typ = std::any::type_name::<T>();
    DecodeError::Custom(format!(
        "error decoding field '{field_name}' of type {typ}: {err}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_reports_field_name() {
        let buf = [0x01u8];
        let decoder = Decoder::new(&buf);
        let (_, decoder): (u8, _) = decoder.decode_field("first").expect("fits");
        let err = decoder.decode_field::<u32>("second").unwrap_err();
        match err {
            DecodeError::Custom(msg) => assert!(msg.contains("second"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn finish_rejects_trailing() {
        let buf = [0x01u8, 0x02];
        let decoder = Decoder::new(&buf);
        let (_, decoder): (u8, _) = decoder.decode_field("only").expect("fits");
        assert_eq!(decoder.finish(), Err(DecodeError::TrailingBytes));
    }
}
