//! Object stream decoding.
//!
//! A container stream's decoded body starts with `N` pairs of
//! `object_number relative_offset`, followed (at `/First`) by the object
//! bodies. Each container is decoded at most once per reader.

use crate::codec::filters::decode_stream;
use crate::error::{PdfError, Result};
use crate::model::objects::{ObjRef, PdfStream, PdfValue};
use crate::parser::lexer::{Lexer, Token};
use crate::parser::object::{ParseContext, parse_value};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

/// Objects of one container, in header order.
pub type ContainerObjects = Rc<Vec<(u32, PdfValue)>>;

/// Memoizing decoder for object stream containers.
#[derive(Default)]
pub struct ObjectStreamDecoder {
    containers: RefCell<FxHashMap<u32, ContainerObjects>>,
    decoded: Cell<usize>,
}

impl ObjectStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects of container `container`, decoding it on first use.
    ///
    /// `fetch` loads the (already decrypted) container stream and is only
    /// called on a miss.
    pub fn decode_container(
        &self,
        container: u32,
        fetch: impl FnOnce() -> Result<PdfStream>,
    ) -> Result<ContainerObjects> {
        if let Some(objects) = self.containers.borrow().get(&container) {
            return Ok(Rc::clone(objects));
        }

        let stream = fetch()?;
        let objects = Rc::new(decode_object_stream(&stream)?);
        self.decoded.set(self.decoded.get() + 1);
        debug!(container, objects = objects.len(), "object stream decoded");

        self.containers
            .borrow_mut()
            .insert(container, Rc::clone(&objects));
        Ok(objects)
    }

    /// Number of containers decompressed so far.
    pub fn decode_count(&self) -> usize {
        self.decoded.get()
    }

    /// Drop all decoded containers.
    pub fn clear(&self) {
        self.containers.borrow_mut().clear();
    }
}

/// Decode every object of a container stream.
///
/// Objects inside the container are parsed without decryption: the
/// container body was decrypted as a whole.
pub fn decode_object_stream(stream: &PdfStream) -> Result<Vec<(u32, PdfValue)>> {
    if !matches!(stream.get("Type"), Some(PdfValue::Name(t)) if t == "ObjStm") {
        warn!("object stream container without /Type /ObjStm");
    }
    let count = header_int(stream, "N")?;
    let first = header_int(stream, "First")?;

    let data = Bytes::from(decode_stream(stream)?);
    if first > data.len() {
        return Err(PdfError::malformed(
            first,
            "object stream /First is past the end of its data",
        ));
    }

    let mut lexer = Lexer::new(&data[..first], true);
    let mut header = Vec::with_capacity(count);
    for _ in 0..count {
        match (lexer.next_token()?, lexer.next_token()?) {
            (Some((_, Token::Int(num))), Some((_, Token::Int(offset)))) => {
                let (Ok(num), Ok(offset)) = (u32::try_from(num), usize::try_from(offset)) else {
                    return Err(PdfError::malformed(lexer.tell(), "negative object stream entry"));
                };
                header.push((num, offset));
            }
            _ => {
                warn!(expected = count, found = header.len(), "short object stream header");
                break;
            }
        }
    }

    let ctx = ParseContext::default();
    let mut objects = Vec::with_capacity(header.len());
    for (num, offset) in header {
        let start = first + offset;
        if start >= data.len() {
            warn!(obj = num, offset, "object stream offset out of range");
            continue;
        }
        match parse_value(&data, start, true, ctx.for_object(ObjRef::new(num, 0))) {
            Ok((value, _)) => objects.push((num, value)),
            Err(e) => warn!(obj = num, error = %e, "bad object in object stream"),
        }
    }
    Ok(objects)
}

/// Find object `obj_num`, trying its recorded `index` first.
pub fn find_in_container(objects: &[(u32, PdfValue)], obj_num: u32, index: u32) -> Option<&PdfValue> {
    if let Some((num, value)) = objects.get(index as usize)
        && *num == obj_num
    {
        return Some(value);
    }
    objects
        .iter()
        .find(|(num, _)| *num == obj_num)
        .map(|(_, value)| value)
}

fn header_int(stream: &PdfStream, key: &str) -> Result<usize> {
    stream
        .get(key)
        .and_then(|v| v.as_int().ok())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| PdfError::malformed(0, format!("object stream without valid /{}", key)))
}
