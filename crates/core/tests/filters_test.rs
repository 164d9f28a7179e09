//! Tests for the stream filter chain.

mod common;

use common::deflate;
use quire_core::PdfError;
use quire_core::filters::{apply_filter, decode_stream};
use quire_core::model::{PdfDict, PdfStream, PdfValue, dict};
use weezl::BitOrder;
use weezl::encode::Encoder;

fn stream(filter: PdfValue, parms: Option<PdfValue>, data: Vec<u8>) -> PdfStream {
    let mut d = dict([("Filter", filter)]);
    if let Some(parms) = parms {
        d.insert("DecodeParms".into(), parms);
    }
    PdfStream::new(d, data)
}

fn name(s: &str) -> PdfValue {
    PdfValue::Name(s.into())
}

fn predictor(predictor: i64, columns: i64) -> PdfValue {
    PdfValue::Dictionary(dict([
        ("Predictor", PdfValue::Integer(predictor)),
        ("Columns", PdfValue::Integer(columns)),
    ]))
}

#[test]
fn test_no_filter_returns_raw() {
    let s = PdfStream::new(PdfDict::new(), b"raw bytes".to_vec());
    assert_eq!(decode_stream(&s).unwrap(), b"raw bytes");
}

#[test]
fn test_flate() {
    let text = b"A stream body that compresses well well well well".repeat(10);
    let s = stream(name("FlateDecode"), None, deflate(&text));
    assert_eq!(decode_stream(&s).unwrap(), text);

    let s = stream(name("Fl"), None, deflate(b"short"));
    assert_eq!(decode_stream(&s).unwrap(), b"short");
}

#[test]
fn test_corrupt_flate_keeps_prefix() {
    let text = b"0123456789".repeat(100);
    let mut compressed = deflate(&text);
    // Drop the adler32 checksum.
    compressed.truncate(compressed.len() - 4);
    let out = apply_filter("FlateDecode", &compressed, None).unwrap();
    assert!(!out.is_empty());
    assert!(text.starts_with(&out));
}

#[test]
fn test_flate_with_png_up_predictor() {
    let rows = [2u8, 1, 2, 3, 2, 1, 1, 1];
    let s = stream(name("FlateDecode"), Some(predictor(12, 3)), deflate(&rows));
    assert_eq!(decode_stream(&s).unwrap(), vec![1, 2, 3, 2, 3, 4]);
}

#[test]
fn test_png_sub_predictor() {
    let rows = [1u8, 10, 5, 5];
    let parms = dict([
        ("Predictor", PdfValue::Integer(11)),
        ("Columns", PdfValue::Integer(3)),
    ]);
    let out = apply_filter("FlateDecode", &deflate(&rows), Some(&parms)).unwrap();
    assert_eq!(out, vec![10, 15, 20]);
}

#[test]
fn test_tiff_predictor() {
    let s = stream(
        name("FlateDecode"),
        Some(predictor(2, 4)),
        deflate(&[10, 1, 1, 1, 20, 2, 2, 2]),
    );
    assert_eq!(decode_stream(&s).unwrap(), vec![10, 11, 12, 13, 20, 22, 24, 26]);
}

#[test]
fn test_unsupported_predictor() {
    let s = stream(name("FlateDecode"), Some(predictor(3, 1)), deflate(b"x"));
    assert!(matches!(
        decode_stream(&s),
        Err(PdfError::UnsupportedFeature(_))
    ));
}

#[test]
fn test_predictor_row_wider_than_data() {
    let data = deflate(&[2u8, 1, 2, 3]);
    for (columns, colors) in [(1i64 << 62, 1i64), (i64::MAX, i64::MAX), (1 << 40, 3)] {
        let parms = dict([
            ("Predictor", PdfValue::Integer(12)),
            ("Columns", PdfValue::Integer(columns)),
            ("Colors", PdfValue::Integer(colors)),
        ]);
        assert!(matches!(
            apply_filter("FlateDecode", &data, Some(&parms)),
            Err(PdfError::MalformedObject { .. })
        ));
    }

    let s = stream(name("FlateDecode"), Some(predictor(2, 1 << 40)), data);
    assert!(matches!(
        decode_stream(&s),
        Err(PdfError::MalformedObject { .. })
    ));
}

#[test]
fn test_ascii_hex() {
    let s = stream(name("ASCIIHexDecode"), None, b"48 65 6c 6C 6f>".to_vec());
    assert_eq!(decode_stream(&s).unwrap(), b"Hello");
    assert_eq!(apply_filter("AHx", b"4>", None).unwrap(), vec![0x40]);
}

#[test]
fn test_ascii85() {
    let s = stream(name("ASCII85Decode"), None, b"87cURD]j7BEbo7~>".to_vec());
    assert_eq!(decode_stream(&s).unwrap(), b"Hello world");
    assert_eq!(apply_filter("A85", b"<~F*2M7/c~>", None).unwrap(), b"sure.");
    assert_eq!(
        apply_filter("A85", b"z@:E^~>", None).unwrap(),
        b"\x00\x00\x00\x00abc"
    );
}

#[test]
fn test_lzw_early_change_default() {
    let text = b"TOBEORNOTTOBEORTOBEORNOT".repeat(20);
    let encoded = Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
        .encode(&text)
        .unwrap();
    let s = stream(name("LZWDecode"), None, encoded);
    assert_eq!(decode_stream(&s).unwrap(), text);
}

#[test]
fn test_lzw_without_early_change() {
    let text = b"TOBEORNOTTOBEORTOBEORNOT".repeat(20);
    let encoded = Encoder::new(BitOrder::Msb, 8).encode(&text).unwrap();
    let parms = PdfValue::Dictionary(dict([("EarlyChange", PdfValue::Integer(0))]));
    let s = stream(name("LZW"), Some(parms), encoded);
    assert_eq!(decode_stream(&s).unwrap(), text);
}

#[test]
fn test_filter_chain_applies_in_order() {
    let text = b"chained filters";
    let hex: Vec<u8> = hex::encode_upper(deflate(text)).into_bytes();
    let s = stream(
        PdfValue::Array(vec![name("ASCIIHexDecode"), name("FlateDecode")]),
        None,
        hex,
    );
    assert_eq!(decode_stream(&s).unwrap(), text);
}

#[test]
fn test_decode_parms_array_aligns_with_filters() {
    let rows = [2u8, 1, 2, 3, 2, 1, 1, 1];
    let hex = hex::encode(deflate(&rows)).into_bytes();
    let s = stream(
        PdfValue::Array(vec![name("AHx"), name("Fl")]),
        Some(PdfValue::Array(vec![PdfValue::Null, predictor(12, 3)])),
        hex,
    );
    assert_eq!(decode_stream(&s).unwrap(), vec![1, 2, 3, 2, 3, 4]);
}

#[test]
fn test_identity_crypt_filter() {
    assert_eq!(apply_filter("Crypt", b"plain", None).unwrap(), b"plain");
}

#[test]
fn test_unsupported_filters() {
    for filter in ["DCTDecode", "JBIG2Decode", "RunLengthDecode", "CCITTFaxDecode"] {
        assert!(matches!(
            apply_filter(filter, b"data", None),
            Err(PdfError::UnsupportedFeature(_))
        ));
    }
}
