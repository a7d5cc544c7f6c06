mod constants;
pub mod decode;
pub mod encode;
pub mod error;
pub mod structs;

pub use constants::MAX_ARRAY_SIZE;
pub use decode::NeoDecode;
pub use encode::NeoEncode;
pub use error::DecodeError;
