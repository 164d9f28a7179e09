//! Stream filter chain.
//!
//! Consumers call [`decode_stream`] on a parsed stream to undo its `/Filter`
//! entries. The parser itself never decompresses.

use super::ascii85::{ascii85decode, asciihexdecode};
use super::lzw::lzwdecode_with_earlychange;
use crate::error::{PdfError, Result};
use crate::model::objects::{PdfDict, PdfStream};
use std::io::Read;

/// Decode a stream body through its whole filter chain.
pub fn decode_stream(stream: &PdfStream) -> Result<Vec<u8>> {
    let filters = stream.filters();
    let parms = stream.decode_parms();
    if filters.is_empty() {
        return Ok(stream.raw_data().to_vec());
    }

    let mut data = stream.raw_data().to_vec();
    for (i, name) in filters.iter().enumerate() {
        data = apply_filter(name, &data, parms.get(i).copied().flatten())?;
    }
    Ok(data)
}

/// Apply one named filter.
pub fn apply_filter(name: &str, data: &[u8], parms: Option<&PdfDict>) -> Result<Vec<u8>> {
    match name {
        "FlateDecode" | "Fl" => {
            let out = flate_decode(data);
            apply_predictor(out, parms)
        }
        "LZWDecode" | "LZW" => {
            let early_change = int_param(parms, "EarlyChange", 1);
            let out = lzwdecode_with_earlychange(data, early_change)?;
            apply_predictor(out, parms)
        }
        "ASCIIHexDecode" | "AHx" => asciihexdecode(data),
        "ASCII85Decode" | "A85" => ascii85decode(data),
        // Identity crypt filter; anything else is handled by the security handler.
        "Crypt" if parms.and_then(|p| p.get("Name")).is_none() => Ok(data.to_vec()),
        other => Err(PdfError::UnsupportedFeature(format!("filter /{}", other))),
    }
}

/// Zlib decompression, lenient on corrupt input.
pub fn flate_decode(data: &[u8]) -> Vec<u8> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    if decoder.read_to_end(&mut out).is_err() {
        return decompress_corrupted(data);
    }
    out
}

/// Best-effort zlib decompression for corrupted streams.
///
/// Returns the output produced up to the point the decoder fails (often a
/// checksum error near the end).
fn decompress_corrupted(data: &[u8]) -> Vec<u8> {
    use flate2::{Decompress, FlushDecompress, Status};
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = [0u8; 4096];
    let mut i = 0usize;
    while i < data.len() {
        let before_out = decoder.total_out();
        let before_in = decoder.total_in();
        let res = decoder.decompress(&data[i..i + 1], &mut buf, FlushDecompress::None);
        let produced = (decoder.total_out() - before_out) as usize;
        if produced > 0 {
            out.extend_from_slice(&buf[..produced]);
        }
        let consumed = (decoder.total_in() - before_in) as usize;
        i += consumed.max(1);
        match res {
            Ok(Status::StreamEnd) | Err(_) => break,
            Ok(_) => {}
        }
    }
    out
}

fn int_param(parms: Option<&PdfDict>, key: &str, default: i64) -> i64 {
    parms
        .and_then(|p| p.get(key))
        .and_then(|v| v.as_int().ok())
        .unwrap_or(default)
}

/// Undo a `/Predictor` from decode parameters, if any.
fn apply_predictor(data: Vec<u8>, parms: Option<&PdfDict>) -> Result<Vec<u8>> {
    let predictor = int_param(parms, "Predictor", 1);
    if predictor <= 1 || data.is_empty() {
        return Ok(data);
    }

    let columns = usize_param(parms, "Columns", 1);
    let colors = usize_param(parms, "Colors", 1);
    let bits = usize_param(parms, "BitsPerComponent", 8);

    match predictor {
        2 => tiff_predictor(&data, columns, colors, bits),
        10..=15 => png_predictor(&data, columns, colors, bits),
        other => Err(PdfError::UnsupportedFeature(format!(
            "predictor {}",
            other
        ))),
    }
}

/// Positive integer parameter; absent, non-positive or oversized values
/// fall back to `default` or saturate.
fn usize_param(parms: Option<&PdfDict>, key: &str, default: i64) -> usize {
    usize::try_from(int_param(parms, key, default).max(1)).unwrap_or(usize::MAX)
}

/// Bytes per row and bytes per pixel for predictor parameters.
///
/// A row wider than the data it applies to is rejected, which also bounds
/// the row buffers by the stream length.
fn row_geometry(data_len: usize, columns: usize, colors: usize, bits: usize) -> Result<(usize, usize)> {
    let row_bytes = colors
        .checked_mul(bits)
        .and_then(|n| n.checked_mul(columns))
        .map(|n| n.div_ceil(8))
        .filter(|&n| n <= data_len)
        .ok_or_else(|| {
            PdfError::malformed(
                0,
                format!(
                    "predictor row of {} columns x {} colors x {} bits exceeds {} data bytes",
                    columns, colors, bits, data_len
                ),
            )
        })?;
    let bpp = (colors * bits / 8).max(1);
    Ok((row_bytes, bpp))
}

/// Reverse PNG row filters (predictors 10-15).
///
/// Every row starts with its own filter type byte.
pub fn png_predictor(data: &[u8], columns: usize, colors: usize, bits: usize) -> Result<Vec<u8>> {
    let (row_bytes, bpp) = row_geometry(data.len(), columns, colors, bits)?;
    let row_size = row_bytes + 1;

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];
    let mut current_row = vec![0u8; row_bytes];

    for row in data.chunks_exact(row_size) {
        let filter_type = row[0];
        let row_data = &row[1..];

        for i in 0..row_bytes {
            let left = if i >= bpp { current_row[i - bpp] } else { 0 };
            let above = prev_row[i];
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let predicted = match filter_type {
                1 => left,
                2 => above,
                3 => ((u16::from(left) + u16::from(above)) / 2) as u8,
                4 => paeth_predictor(left, above, upper_left),
                // 0 and unknown filter types copy the row as-is
                _ => 0,
            };
            current_row[i] = row_data[i].wrapping_add(predicted);
        }

        result.extend_from_slice(&current_row);
        std::mem::swap(&mut prev_row, &mut current_row);
    }

    Ok(result)
}

/// Paeth predictor function.
const fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse TIFF predictor 2 (horizontal differencing) for 8-bit components.
pub fn tiff_predictor(data: &[u8], columns: usize, colors: usize, bits: usize) -> Result<Vec<u8>> {
    let (row_bytes, _) = row_geometry(data.len(), columns, colors, bits)?;
    if bits != 8 {
        // Sub-byte components are passed through unchanged.
        return Ok(data.to_vec());
    }
    let mut out = data.to_vec();
    for row in out.chunks_mut(row_bytes) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(out)
}
