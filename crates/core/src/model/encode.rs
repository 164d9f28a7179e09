//! PDF syntax encoder for object-model values.
//!
//! Inverse of [`crate::parser::ObjectParser`]: anything written here parses
//! back to an equal value.

use super::objects::{ObjRef, PdfValue};

/// Encode a value into `out`.
pub fn encode_value(value: &PdfValue, out: &mut Vec<u8>) {
    match value {
        PdfValue::Null => out.extend_from_slice(b"null"),
        PdfValue::Boolean(true) => out.extend_from_slice(b"true"),
        PdfValue::Boolean(false) => out.extend_from_slice(b"false"),
        PdfValue::Integer(n) => out.extend_from_slice(n.to_string().as_bytes()),
        PdfValue::Real(r) => encode_real(*r, out),
        PdfValue::Name(name) => encode_name(name, out),
        PdfValue::String(bytes) => encode_string(bytes, out),
        PdfValue::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                encode_value(item, out);
            }
            out.push(b']');
        }
        PdfValue::Dictionary(dict) => encode_dict(dict.iter(), out),
        PdfValue::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.insert(
                "Length".into(),
                PdfValue::Integer(stream.raw_data().len() as i64),
            );
            encode_dict(dict.iter(), out);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(stream.raw_data());
            out.extend_from_slice(b"\nendstream");
        }
        PdfValue::Reference(r) => encode_reference(*r, out),
    }
}

/// Encode a value to a fresh buffer.
pub fn to_bytes(value: &PdfValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(value, &mut out);
    out
}

/// Encode a complete indirect object: `N G obj ... endobj`.
pub fn encode_indirect(r: ObjRef, value: &PdfValue, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{} {} obj\n", r.obj_num, r.gen_num).as_bytes());
    encode_value(value, out);
    out.extend_from_slice(b"\nendobj\n");
}

fn encode_reference(r: ObjRef, out: &mut Vec<u8>) {
    out.extend_from_slice(r.to_string().as_bytes());
}

fn encode_dict<'a, I>(entries: I, out: &mut Vec<u8>)
where
    I: Iterator<Item = (&'a String, &'a PdfValue)>,
{
    out.extend_from_slice(b"<<");
    for (key, value) in entries {
        encode_name(key, out);
        out.push(b' ');
        encode_value(value, out);
    }
    out.extend_from_slice(b">>");
}

fn encode_real(r: f64, out: &mut Vec<u8>) {
    if !r.is_finite() {
        out.extend_from_slice(b"0.0");
        return;
    }
    let text = r.to_string();
    out.extend_from_slice(text.as_bytes());
    // Keep the decimal point so the value does not come back as an integer.
    if !text.contains('.') {
        out.extend_from_slice(b".0");
    }
}

fn encode_name(name: &str, out: &mut Vec<u8>) {
    out.push(b'/');
    // Names hold one char per source byte (Latin-1).
    for c in name.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(b) if is_regular_name_byte(b) => out.push(b),
            Ok(b) => out.extend_from_slice(format!("#{:02X}", b).as_bytes()),
            Err(_) => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.extend_from_slice(format!("#{:02X}", b).as_bytes());
                }
            }
        }
    }
}

const fn is_regular_name_byte(b: u8) -> bool {
    matches!(b, b'!'..=b'~')
        && !matches!(
            b,
            b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
}

fn encode_string(bytes: &[u8], out: &mut Vec<u8>) {
    let binary = bytes
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t')) || b >= 0x7f)
        .count();
    if binary * 4 > bytes.len() {
        out.push(b'<');
        for b in bytes {
            out.extend_from_slice(format!("{:02X}", b).as_bytes());
        }
        out.push(b'>');
        return;
    }

    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}
