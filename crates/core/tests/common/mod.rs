//! Synthetic PDF builder shared by the integration tests.
//!
//! Writes files with exact, known offsets: classic tables, cross-reference
//! streams, hybrid sections, object streams, incremental updates and
//! RC4-encrypted objects.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use quire_core::model::{PdfDict, PdfStream, PdfValue, dict, encode_indirect, encode_value};
use quire_core::security::StandardSecurityHandler;
use quire_core::{ObjRef, PdfReader};
use std::collections::BTreeMap;
use std::io::Write;

/// Cross-reference entry as the builder will write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    InUse(u64, u16),
    Free,
    Compressed(u32, u32),
}

pub struct PdfBuilder {
    buf: Vec<u8>,
    pending: BTreeMap<u32, Entry>,
    last_xref: Option<u64>,
    security: Option<StandardSecurityHandler>,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n");
        Self {
            buf,
            pending: BTreeMap::new(),
            last_xref: None,
            security: None,
        }
    }

    /// Continue an existing file with an incremental update.
    pub fn append_to(data: Vec<u8>, last_xref: u64) -> Self {
        Self {
            buf: data,
            pending: BTreeMap::new(),
            last_xref: Some(last_xref),
            security: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn last_xref(&self) -> Option<u64> {
        self.last_xref
    }

    /// Pad with whitespace up to `offset`.
    pub fn pad_to(&mut self, offset: u64) {
        assert!(offset >= self.offset(), "cannot pad backwards");
        while self.offset() + 1 < offset {
            self.buf.push(b' ');
        }
        if self.offset() < offset {
            self.buf.push(b'\n');
        }
    }

    /// Encrypt strings and streams of every later `object` call.
    pub fn encrypt_with(&mut self, handler: StandardSecurityHandler) {
        self.security = Some(handler);
    }

    pub fn object(&mut self, num: u32, value: PdfValue) -> u64 {
        self.object_gen(num, 0, value)
    }

    pub fn object_gen(&mut self, num: u32, gen_num: u16, value: PdfValue) -> u64 {
        let value = match &self.security {
            Some(handler) => encrypt_value(handler, num, gen_num, value),
            None => value,
        };
        self.plain_object_gen(num, gen_num, &value)
    }

    /// Write an object that is never encrypted.
    pub fn plain_object(&mut self, num: u32, value: &PdfValue) -> u64 {
        self.plain_object_gen(num, 0, value)
    }

    fn plain_object_gen(&mut self, num: u32, gen_num: u16, value: &PdfValue) -> u64 {
        let offset = self.offset();
        encode_indirect(ObjRef::new(num, gen_num), value, &mut self.buf);
        self.pending.insert(num, Entry::InUse(offset, gen_num));
        offset
    }

    /// Write `N G obj` + `body` + `endobj` verbatim.
    pub fn raw_object(&mut self, num: u32, gen_num: u16, body: &[u8]) -> u64 {
        let offset = self.offset();
        self.buf
            .extend_from_slice(format!("{} {} obj\n", num, gen_num).as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
        self.pending.insert(num, Entry::InUse(offset, gen_num));
        offset
    }

    /// Record an entry without writing an object.
    pub fn entry(&mut self, num: u32, entry: Entry) {
        self.pending.insert(num, entry);
    }

    pub fn free(&mut self, num: u32) {
        self.pending.insert(num, Entry::Free);
    }

    /// Write an object stream holding `objects`.
    pub fn object_stream(&mut self, num: u32, objects: &[(u32, PdfValue)], compress: bool) -> u64 {
        let mut header = Vec::new();
        let mut body = Vec::new();
        for (obj_num, value) in objects {
            header.extend_from_slice(format!("{} {} ", obj_num, body.len()).as_bytes());
            encode_value(value, &mut body);
            body.push(b'\n');
        }
        let first = header.len();
        header.extend_from_slice(&body);

        let mut stream_dict = dict([
            ("Type", PdfValue::Name("ObjStm".into())),
            ("N", PdfValue::Integer(objects.len() as i64)),
            ("First", PdfValue::Integer(first as i64)),
        ]);
        let data = if compress {
            stream_dict.insert("Filter".into(), PdfValue::Name("FlateDecode".into()));
            deflate(&header)
        } else {
            header
        };

        let offset = self.object(num, PdfValue::from(PdfStream::new(stream_dict, data)));
        for (index, (obj_num, _)) in objects.iter().enumerate() {
            self.pending
                .insert(*obj_num, Entry::Compressed(num, index as u32));
        }
        offset
    }

    /// Write a classic table for the pending entries, the trailer and
    /// `startxref`. Compressed entries are written as free.
    pub fn xref_table(&mut self, mut trailer: PdfDict) -> u64 {
        let offset = self.offset();
        if self.last_xref.is_none() {
            self.pending.entry(0).or_insert(Entry::Free);
        }
        if let Some(prev) = self.last_xref {
            trailer
                .entry("Prev".to_string())
                .or_insert(PdfValue::Integer(prev as i64));
        }

        self.buf.extend_from_slice(b"xref\n");
        for (start, run) in runs(&self.pending) {
            self.buf
                .extend_from_slice(format!("{} {}\n", start, run.len()).as_bytes());
            for entry in run {
                let line = match entry {
                    Entry::InUse(off, gen_num) => format!("{:010} {:05} n\r\n", off, gen_num),
                    Entry::Free if start == 0 => "0000000000 65535 f\r\n".to_string(),
                    Entry::Free | Entry::Compressed(..) => "0000000000 00000 f\r\n".to_string(),
                };
                self.buf.extend_from_slice(line.as_bytes());
            }
        }
        self.buf.extend_from_slice(b"trailer\n");
        encode_value(&PdfValue::Dictionary(trailer), &mut self.buf);
        self.finish_section(offset);
        offset
    }

    /// Write a cross-reference stream (object `num`) for the pending entries,
    /// including itself, and `startxref`.
    pub fn xref_stream(&mut self, num: u32, mut trailer: PdfDict) -> u64 {
        let offset = self.offset();
        self.pending.insert(num, Entry::InUse(offset, 0));
        if let Some(prev) = self.last_xref {
            trailer
                .entry("Prev".to_string())
                .or_insert(PdfValue::Integer(prev as i64));
        }
        let entries = self.pending.clone();
        self.write_xref_stream_object(num, trailer, &entries);
        self.finish_section(offset);
        offset
    }

    /// Write the `/XRefStm` half of a hybrid section: a cross-reference
    /// stream holding only the compressed entries. No `startxref` follows.
    pub fn hybrid_stream(&mut self, num: u32) -> u64 {
        let offset = self.offset();
        let compressed: BTreeMap<u32, Entry> = self
            .pending
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Compressed(..)))
            .map(|(n, e)| (*n, *e))
            .collect();
        self.write_xref_stream_object(num, PdfDict::new(), &compressed);
        self.pending.insert(num, Entry::InUse(offset, 0));
        offset
    }

    fn write_xref_stream_object(&mut self, num: u32, mut dict: PdfDict, entries: &BTreeMap<u32, Entry>) {
        let mut index = Vec::new();
        let mut data = Vec::new();
        for (start, run) in runs(entries) {
            index.push(PdfValue::Integer(i64::from(start)));
            index.push(PdfValue::Integer(run.len() as i64));
            for entry in run {
                let (kind, field2, field3) = match entry {
                    Entry::Free => (0u8, 0u32, 0u16),
                    Entry::InUse(off, gen_num) => (1, off as u32, gen_num),
                    Entry::Compressed(container, idx) => (2, container, idx as u16),
                };
                data.push(kind);
                data.extend_from_slice(&field2.to_be_bytes());
                data.extend_from_slice(&field3.to_be_bytes());
            }
        }

        let size = entries.keys().next_back().map_or(1, |n| n + 1);
        dict.entry("Size".to_string())
            .or_insert(PdfValue::Integer(i64::from(size)));
        dict.insert("Type".into(), PdfValue::Name("XRef".into()));
        dict.insert(
            "W".into(),
            PdfValue::Array(vec![
                PdfValue::Integer(1),
                PdfValue::Integer(4),
                PdfValue::Integer(2),
            ]),
        );
        dict.insert("Index".into(), PdfValue::Array(index));
        dict.insert("Filter".into(), PdfValue::Name("FlateDecode".into()));

        let stream = PdfValue::from(PdfStream::new(dict, deflate(&data)));
        let offset = self.offset();
        encode_indirect(ObjRef::new(num, 0), &stream, &mut self.buf);
        debug_assert!(offset > 0);
    }

    fn finish_section(&mut self, offset: u64) {
        self.buf
            .extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", offset).as_bytes());
        self.pending.clear();
        self.last_xref = Some(offset);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Contiguous runs of object numbers.
fn runs(entries: &BTreeMap<u32, Entry>) -> Vec<(u32, Vec<Entry>)> {
    let mut runs: Vec<(u32, Vec<Entry>)> = Vec::new();
    for (&num, &entry) in entries {
        match runs.last_mut() {
            Some((start, run)) if *start + run.len() as u32 == num => run.push(entry),
            _ => runs.push((num, vec![entry])),
        }
    }
    runs
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("deflate write");
    encoder.finish().expect("deflate finish")
}

/// Encrypt strings and stream bodies the way a writer does.
pub fn encrypt_value(
    handler: &StandardSecurityHandler,
    num: u32,
    gen_num: u16,
    value: PdfValue,
) -> PdfValue {
    match value {
        PdfValue::String(s) => PdfValue::String(handler.encrypt_bytes(num, gen_num, &s)),
        PdfValue::Array(items) => PdfValue::Array(
            items
                .into_iter()
                .map(|v| encrypt_value(handler, num, gen_num, v))
                .collect(),
        ),
        PdfValue::Dictionary(d) => PdfValue::Dictionary(encrypt_dict(handler, num, gen_num, d)),
        PdfValue::Stream(stream) => {
            let raw = handler.encrypt_bytes(num, gen_num, stream.raw_data());
            let dict = encrypt_dict(handler, num, gen_num, stream.dict.clone());
            PdfValue::from(PdfStream::new(dict, raw))
        }
        other => other,
    }
}

fn encrypt_dict(handler: &StandardSecurityHandler, num: u32, gen_num: u16, d: PdfDict) -> PdfDict {
    d.into_iter()
        .map(|(k, v)| (k, encrypt_value(handler, num, gen_num, v)))
        .collect()
}

pub fn r(num: u32) -> PdfValue {
    PdfValue::Reference(ObjRef::new(num, 0))
}

pub fn name(s: &str) -> PdfValue {
    PdfValue::Name(s.into())
}

pub fn int(n: i64) -> PdfValue {
    PdfValue::Integer(n)
}

pub fn string(s: &[u8]) -> PdfValue {
    PdfValue::String(s.to_vec())
}

/// A catalog with an empty page tree.
pub fn catalog(pages: u32) -> PdfValue {
    PdfValue::Dictionary(dict([("Type", name("Catalog")), ("Pages", r(pages))]))
}

pub fn trailer(size: i64, root: u32) -> PdfDict {
    dict([("Size", int(size)), ("Root", r(root))])
}

/// One-revision file: catalog (1), empty page tree (2), `objects` from 3 on.
pub fn simple_pdf(objects: &[(u32, PdfValue)]) -> Vec<u8> {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.object(
        2,
        PdfValue::Dictionary(dict([
            ("Type", name("Pages")),
            ("Kids", PdfValue::Array(vec![])),
            ("Count", int(0)),
        ])),
    );
    for (num, value) in objects {
        b.object(*num, value.clone());
    }
    let size = objects.iter().map(|(n, _)| *n).max().unwrap_or(2).max(2) + 1;
    b.xref_table(trailer(i64::from(size), 1));
    b.finish()
}

pub fn open(data: Vec<u8>) -> PdfReader {
    PdfReader::from_bytes(data).expect("open synthetic pdf")
}
