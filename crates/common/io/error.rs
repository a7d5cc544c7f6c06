use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("var_int is not minimally encoded")]
    NonCanonicalVarInt,
    #[error("declared length {declared} exceeds cap {cap}")]
    LengthCap { declared: u64, cap: usize },
    #[error("trailing bytes after last expected field")]
    TrailingBytes,
    #[error("unknown discriminant {value:#04x} for {kind}")]
    UnknownDiscriminant { kind: &'static str, value: u8 },
    #[error("malformed boolean byte {0:#04x}")]
    MalformedBoolean(u8),
    #[error("invalid utf-8 in var_string")]
    InvalidUtf8,
    #[error("{0}")]
    Custom(String),
}
