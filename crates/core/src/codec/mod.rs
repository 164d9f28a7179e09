//! Codec modules for PDF stream decoding and encryption.
//!
//! This module contains:
//! - `arcfour`: RC4 encryption
//! - `ascii85`: ASCII85 and ASCIIHex decoding
//! - `filters`: `/Filter` chain dispatch, Flate and predictors
//! - `lzw`: LZW decompression

pub mod arcfour;
pub mod ascii85;
pub mod filters;
pub mod lzw;

pub use arcfour::{Arcfour, rc4};
pub use ascii85::{ascii85decode, asciihexdecode};
pub use filters::{apply_filter, decode_stream, flate_decode};
pub use lzw::{lzwdecode, lzwdecode_with_earlychange};
