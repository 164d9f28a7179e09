//! LZW decoding on top of weezl.

use crate::error::Result;
use weezl::{BitOrder, decode::Decoder};

/// Decode LZW-encoded data (PDF variant: MSB first, 8-bit).
pub fn lzwdecode(data: &[u8]) -> Result<Vec<u8>> {
    lzwdecode_with_earlychange(data, 1)
}

/// Decode LZW data honoring `/EarlyChange`.
///
/// With `/EarlyChange 1` (the default) the code width grows one code early,
/// which is weezl's TIFF size switch.
pub fn lzwdecode_with_earlychange(data: &[u8], early_change: i64) -> Result<Vec<u8>> {
    let mut decoder = if early_change == 0 {
        Decoder::new(BitOrder::Msb, 8)
    } else {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    };
    let mut output = Vec::new();
    // Corrupt data yields the partial output decoded so far.
    let _ = decoder.into_vec(&mut output).decode(data);
    Ok(output)
}
