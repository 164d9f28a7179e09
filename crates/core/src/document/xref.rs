//! Cross-reference resolution.
//!
//! Walks the trailer chain from the last `startxref` backward through
//! `/Prev`, merging classic tables, cross-reference streams and hybrid
//! `/XRefStm` sections into one flat table. Newer revisions shadow older
//! ones: a slot is only ever filled while it is still unset, and a free
//! entry counts as set.

use super::window::{ByteSource, Window, WindowPolicy, with_window};
use crate::codec::filters::decode_stream;
use crate::error::{PdfError, Result};
use crate::model::objects::{ObjRef, PdfDict, PdfValue};
use crate::parser::lexer::{Keyword, Lexer, Token, rfind_bytes};
use crate::parser::object::{ObjectParser, ParseContext};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// Default number of bytes scanned from the end of the file for `startxref`.
pub const DEFAULT_TAIL_SCAN: usize = 1024;
/// Default bound on the number of trailers walked.
pub const DEFAULT_MAX_REVISIONS: usize = 4096;

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossRefEntry {
    /// Byte offset of `N G obj`
    Offset { offset: u64, gen_num: u16 },
    /// Index inside a compressed object stream
    InObjectStream { container: u32, index: u32 },
    /// Object number is free
    Free,
}

impl CrossRefEntry {
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Trailer fields consumed by the reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailer {
    pub size: u64,
    pub prev: Option<u64>,
    pub root: Option<ObjRef>,
    /// Reference or direct dictionary
    pub encrypt: Option<PdfValue>,
    /// Reference or direct dictionary
    pub info: Option<PdfValue>,
    /// First element of `/ID`
    pub id: Option<Vec<u8>>,
    pub xref_stream_offset: Option<u64>,
    /// The full trailer dictionary
    pub dict: PdfDict,
}

impl Trailer {
    pub fn from_dict(dict: PdfDict) -> Self {
        let offset = |key: &str| {
            dict.get(key)
                .and_then(|v| v.as_int().ok())
                .and_then(|n| u64::try_from(n).ok())
        };
        let size = offset("Size").unwrap_or(0);
        let prev = offset("Prev");
        let xref_stream_offset = offset("XRefStm");
        let root = dict.get("Root").and_then(|v| v.as_reference().ok());
        let encrypt = dict
            .get("Encrypt")
            .filter(|v| matches!(v, PdfValue::Reference(_) | PdfValue::Dictionary(_)))
            .cloned();
        let info = dict
            .get("Info")
            .filter(|v| matches!(v, PdfValue::Reference(_) | PdfValue::Dictionary(_)))
            .cloned();
        let id = dict
            .get("ID")
            .and_then(|v| v.as_array().ok())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_string().ok())
            .map(<[u8]>::to_vec);

        Self {
            size,
            prev,
            root,
            encrypt,
            info,
            id,
            xref_stream_offset,
            dict,
        }
    }

    /// Take fields from an older trailer only where this one has none.
    fn merge_older(&mut self, older: &Self) {
        if self.root.is_none() {
            self.root = older.root;
        }
        if self.encrypt.is_none() {
            self.encrypt.clone_from(&older.encrypt);
        }
        if self.info.is_none() {
            self.info.clone_from(&older.info);
        }
        if self.id.is_none() {
            self.id.clone_from(&older.id);
        }
        for (key, value) in &older.dict {
            if !self.dict.contains_key(key) {
                self.dict.insert(key.clone(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `xref` ... `trailer`
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// One cross-reference section as read from the file.
#[derive(Debug, Clone)]
pub struct XRefSection {
    pub offset: u64,
    pub kind: SectionKind,
    pub trailer: Trailer,
    /// Entries in file order
    pub entries: Vec<(u32, CrossRefEntry)>,
}

impl XRefSection {
    /// Combine a classic table with its `/XRefStm` section.
    ///
    /// In-use stream entries fill slots the table leaves out or marks free,
    /// which is how hybrid files hide compressed objects from old readers.
    fn absorb_hybrid(&mut self, stream: Self) {
        let mut slots: FxHashMap<u32, usize> = FxHashMap::default();
        for (i, (num, _)) in self.entries.iter().enumerate() {
            slots.insert(*num, i);
        }
        for (num, entry) in stream.entries {
            match slots.get(&num) {
                Some(&i) => {
                    if self.entries[i].1.is_free() && !entry.is_free() {
                        self.entries[i].1 = entry;
                    }
                }
                None => {
                    slots.insert(num, self.entries.len());
                    self.entries.push((num, entry));
                }
            }
        }
    }
}

/// The merged cross-reference table of a document.
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: FxHashMap<u32, CrossRefEntry>,
    trailer: Trailer,
    revisions: usize,
    section_offsets: Vec<u64>,
    /// Object and section offsets, ascending
    sorted_offsets: Vec<u64>,
}

impl XRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, obj_num: u32) -> Option<&CrossRefEntry> {
        self.entries.get(&obj_num)
    }

    /// Merged trailer (newest value of every field).
    pub const fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Number of revisions (trailers) walked.
    pub const fn revisions(&self) -> usize {
        self.revisions
    }

    /// Offsets of every section read, newest first.
    pub fn section_offsets(&self) -> &[u64] {
        &self.section_offsets
    }

    /// Greatest section offset seen.
    pub fn max_section_offset(&self) -> Option<u64> {
        self.section_offsets.iter().copied().max()
    }

    /// In-use object numbers, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        let mut nums: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_free())
            .map(|(n, _)| *n)
            .collect();
        nums.sort_unstable();
        nums
    }

    /// Merge an older section: fill unset slots, keep trailer fields
    /// already set.
    pub fn merge_older_section(&mut self, section: &XRefSection) {
        for (num, entry) in &section.entries {
            self.entries.entry(*num).or_insert(*entry);
        }
        if self.revisions == 0 {
            self.trailer = section.trailer.clone();
        } else {
            self.trailer.merge_older(&section.trailer);
        }
        self.revisions += 1;
        self.section_offsets.push(section.offset);
    }

    /// Build the sorted offset array used by [`Self::extent`].
    pub fn finish(&mut self) {
        let mut offsets: Vec<u64> = self
            .entries
            .values()
            .filter_map(|e| match e {
                CrossRefEntry::Offset { offset, .. } => Some(*offset),
                _ => None,
            })
            .chain(self.section_offsets.iter().copied())
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        self.sorted_offsets = offsets;
    }

    /// Byte range of the object starting at `offset`: up to the next greater
    /// recorded offset, or `file_len` past the last one.
    pub fn extent(&self, offset: u64, file_len: u64) -> (u64, u64) {
        let idx = self.sorted_offsets.partition_point(|&o| o <= offset);
        let end = self.sorted_offsets.get(idx).copied().unwrap_or(file_len);
        (offset, end.max(offset))
    }
}

/// Reads the trailer chain of one file.
pub struct XRefResolver<'a> {
    source: &'a ByteSource,
    policy: WindowPolicy,
    tail_scan: usize,
    max_revisions: usize,
}

impl<'a> XRefResolver<'a> {
    pub fn new(source: &'a ByteSource) -> Self {
        Self {
            source,
            policy: WindowPolicy::default(),
            tail_scan: DEFAULT_TAIL_SCAN,
            max_revisions: DEFAULT_MAX_REVISIONS,
        }
    }

    pub const fn with_policy(mut self, policy: WindowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn with_tail_scan(mut self, tail_scan: usize) -> Self {
        self.tail_scan = tail_scan;
        self
    }

    pub const fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    /// Offset named by the last `startxref` in the file.
    pub fn find_startxref(&self) -> Result<u64> {
        let file_len = self.source.len();
        let mut scan = self.tail_scan.max(32) as u64;
        loop {
            let scan_len = scan.min(file_len);
            let start = file_len - scan_len;
            let tail = self.source.read_at(start, scan_len as usize)?;
            if let Some(pos) = rfind_bytes(&tail, b"startxref") {
                let mut lexer = Lexer::at(&tail, pos + b"startxref".len(), true);
                return match lexer.next_token() {
                    Ok(Some((_, Token::Int(n)))) if n >= 0 => Ok(n as u64),
                    _ => Err(PdfError::MalformedFile(
                        "startxref not followed by an offset".into(),
                    )),
                };
            }
            if scan_len == file_len {
                return Err(PdfError::MalformedFile("startxref not found".into()));
            }
            scan = scan.saturating_mul(2);
        }
    }

    /// Walk the whole chain and build the merged table.
    pub fn resolve(&self) -> Result<XRefTable> {
        let start = self.find_startxref()?;
        let file_len = self.source.len();
        let mut table = XRefTable::new();
        let mut visited: FxHashSet<u64> = FxHashSet::default();
        let mut next = Some(start);

        while let Some(offset) = next.take() {
            if table.revisions() >= self.max_revisions {
                warn!(offset, limit = self.max_revisions, "revision limit reached, chain cut");
                break;
            }
            visited.insert(offset);

            let first = table.revisions() == 0;
            let section = match self.read_section(offset)? {
                Some(section) => section,
                None if first => {
                    return Err(PdfError::MalformedFile(format!(
                        "no cross-reference data at offset {}",
                        offset
                    )));
                }
                None => {
                    warn!(offset, "missing /Prev target, chain stopped");
                    break;
                }
            };
            let mut section = section;

            if section.kind == SectionKind::Table
                && let Some(stm_offset) = section.trailer.xref_stream_offset
                && visited.insert(stm_offset)
            {
                match self.read_section(stm_offset) {
                    Ok(Some(stream)) if stream.kind == SectionKind::Stream => {
                        section.absorb_hybrid(stream);
                    }
                    Ok(_) => warn!(offset = stm_offset, "/XRefStm is not a cross-reference stream"),
                    Err(e) => warn!(offset = stm_offset, error = %e, "unreadable /XRefStm"),
                }
            }

            debug!(
                offset,
                kind = ?section.kind,
                entries = section.entries.len(),
                "xref section loaded"
            );
            table.merge_older_section(&section);

            if let Some(prev) = section.trailer.prev {
                if prev >= offset || visited.contains(&prev) {
                    warn!(offset, prev, "/Prev does not point to an earlier section, chain cut");
                } else if prev >= file_len {
                    warn!(offset, prev, "missing /Prev target, chain stopped");
                } else {
                    next = Some(prev);
                }
            }
        }

        table.finish();
        Ok(table)
    }

    /// Read the section at `offset`; `None` when nothing resembling
    /// cross-reference data starts there.
    pub fn read_section(&self, offset: u64) -> Result<Option<XRefSection>> {
        if offset >= self.source.len() {
            return Ok(None);
        }
        with_window(self.source, offset, 0, &self.policy, |window| {
            parse_section(window)
        })
        .map_err(|e| match e {
            PdfError::MalformedObject { pos, msg } => PdfError::MalformedFile(format!(
                "bad cross-reference section at {}: {} (at +{})",
                offset, msg, pos
            )),
            other => other,
        })
    }
}

fn parse_section(window: &Window) -> Result<Option<XRefSection>> {
    let mut lexer = Lexer::new(&window.data, window.at_eof);
    match lexer.peek_token()? {
        Some((_, Token::Keyword(Keyword::Xref))) => {
            let _ = lexer.next_token()?;
            parse_table(window, lexer.tell()).map(Some)
        }
        Some((_, Token::Int(_))) => parse_stream_section(window).map(Some),
        _ => Ok(None),
    }
}

/// Classic `xref` table plus its `trailer` dictionary.
fn parse_table(window: &Window, pos: usize) -> Result<XRefSection> {
    let mut lexer = Lexer::at(&window.data, pos, window.at_eof);
    let mut entries = Vec::new();

    loop {
        let Some((at, token)) = lexer.next_token()? else {
            return Err(PdfError::MalformedFile("xref table without trailer".into()));
        };
        let start = match token {
            Token::Keyword(Keyword::Trailer) => break,
            Token::Int(n) => table_number(n, at)?,
            _ => {
                return Err(PdfError::MalformedFile(format!(
                    "unexpected token in xref table at {}",
                    window.start + at as u64
                )));
            }
        };
        let count = match lexer.next_token()? {
            Some((at, Token::Int(n))) => table_number(n, at)?,
            _ => return Err(PdfError::MalformedFile("xref subsection without count".into())),
        };

        for i in 0..count {
            let (offset, gen_num, kind) = match (
                lexer.next_token()?,
                lexer.next_token()?,
                lexer.next_token()?,
            ) {
                (
                    Some((_, Token::Int(offset))),
                    Some((_, Token::Int(gen_num))),
                    Some((_, Token::Keyword(Keyword::Unknown(kind)))),
                ) if offset >= 0 && (0..=i64::from(u16::MAX)).contains(&gen_num) => {
                    (offset as u64, gen_num as u16, kind)
                }
                _ => {
                    return Err(PdfError::MalformedFile(format!(
                        "bad entry {} in xref subsection {}",
                        i, start
                    )));
                }
            };
            let num = u32::try_from(start + i)
                .map_err(|_| PdfError::MalformedFile("object number out of range".into()))?;
            let entry = match kind.as_slice() {
                b"n" => CrossRefEntry::Offset { offset, gen_num },
                b"f" => CrossRefEntry::Free,
                _ => {
                    return Err(PdfError::MalformedFile(format!(
                        "xref entry flag must be n or f (object {})",
                        num
                    )));
                }
            };
            entries.push((num, entry));
        }
    }

    let mut parser = ObjectParser::at(
        &window.data,
        lexer.tell(),
        window.at_eof,
        ParseContext::default(),
    );
    let trailer = match parser.parse_object()? {
        PdfValue::Dictionary(dict) => dict,
        other => {
            return Err(PdfError::MalformedFile(format!(
                "trailer is a {}, not a dictionary",
                other.type_name()
            )));
        }
    };

    Ok(XRefSection {
        offset: window.start,
        kind: SectionKind::Table,
        trailer: Trailer::from_dict(trailer),
        entries,
    })
}

fn table_number(n: i64, at: usize) -> Result<u64> {
    u64::try_from(n)
        .map_err(|_| PdfError::MalformedFile(format!("negative number in xref table at +{}", at)))
}

/// Cross-reference stream: an indirect object whose dictionary is the
/// trailer and whose body is the table.
fn parse_stream_section(window: &Window) -> Result<XRefSection> {
    // No resolver: an indirect /Length here falls back to the endstream scan.
    let mut parser = ObjectParser::new(&window.data, window.at_eof, ParseContext::default());
    let (_, value) = parser.parse_indirect(None)?;
    let PdfValue::Stream(stream) = value else {
        return Err(PdfError::MalformedFile(format!(
            "object at {} is not a cross-reference stream",
            window.start
        )));
    };
    if !matches!(stream.get("Type"), Some(PdfValue::Name(t)) if t == "XRef") {
        return Err(PdfError::MalformedFile(format!(
            "stream at {} is not /Type /XRef",
            window.start
        )));
    }

    let widths = stream_widths(&stream.dict)?;
    let size = stream
        .get("Size")
        .and_then(|v| v.as_int().ok())
        .unwrap_or(0);
    let index = stream_index(&stream.dict, size)?;
    let data = decode_stream(&stream)?;
    let entries = decode_stream_entries(&data, widths, &index)?;

    Ok(XRefSection {
        offset: window.start,
        kind: SectionKind::Stream,
        trailer: Trailer::from_dict(stream.dict.clone()),
        entries,
    })
}

fn stream_widths(dict: &PdfDict) -> Result<[usize; 3]> {
    let w = dict
        .get("W")
        .and_then(|v| v.as_array().ok())
        .ok_or_else(|| PdfError::MalformedFile("xref stream without /W".into()))?;
    if w.len() != 3 {
        return Err(PdfError::MalformedFile(format!(
            "/W must have 3 entries, got {}",
            w.len()
        )));
    }
    let mut widths = [0usize; 3];
    for (slot, value) in widths.iter_mut().zip(w) {
        *slot = value
            .as_int()
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n <= 8)
            .ok_or_else(|| PdfError::MalformedFile("invalid /W field width".into()))?;
    }
    Ok(widths)
}

fn stream_index(dict: &PdfDict, size: i64) -> Result<Vec<(u64, u64)>> {
    let Some(index) = dict.get("Index") else {
        return Ok(vec![(0, size.max(0) as u64)]);
    };
    let arr = index
        .as_array()
        .map_err(|_| PdfError::MalformedFile("/Index is not an array".into()))?;
    if arr.len() % 2 != 0 {
        return Err(PdfError::MalformedFile("/Index has an odd length".into()));
    }
    arr.chunks_exact(2)
        .map(|pair| match (pair[0].as_int(), pair[1].as_int()) {
            (Ok(start), Ok(count)) if start >= 0 && count >= 0 => Ok((start as u64, count as u64)),
            _ => Err(PdfError::MalformedFile("invalid /Index pair".into())),
        })
        .collect()
}

/// Decode fixed-width records. Type 0 is free, 1 a file offset, 2 a slot in
/// an object stream.
pub fn decode_stream_entries(
    data: &[u8],
    widths: [usize; 3],
    index: &[(u64, u64)],
) -> Result<Vec<(u32, CrossRefEntry)>> {
    let record = widths.iter().sum::<usize>();
    if record == 0 {
        return Err(PdfError::MalformedFile("/W describes empty records".into()));
    }

    let mut entries = Vec::new();
    let mut records = data.chunks_exact(record);
    for &(start, count) in index {
        for i in 0..count {
            let Some(rec) = records.next() else {
                warn!(
                    expected = start + count,
                    "xref stream shorter than its /Index"
                );
                return Ok(entries);
            };
            let (f1, rest) = rec.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let field2 = read_be(f2);
            let field3 = read_be(f3);

            let num = u32::try_from(start + i)
                .map_err(|_| PdfError::MalformedFile("object number out of range".into()))?;
            let entry = match kind {
                0 => CrossRefEntry::Free,
                1 => CrossRefEntry::Offset {
                    offset: field2,
                    gen_num: u16::try_from(field3).unwrap_or(u16::MAX),
                },
                2 => CrossRefEntry::InObjectStream {
                    container: u32::try_from(field2).map_err(|_| {
                        PdfError::MalformedFile("object stream number out of range".into())
                    })?,
                    index: u32::try_from(field3).map_err(|_| {
                        PdfError::MalformedFile("object stream index out of range".into())
                    })?,
                },
                other => {
                    return Err(PdfError::UnsupportedFeature(format!(
                        "xref stream entry type {}",
                        other
                    )));
                }
            };
            entries.push((num, entry));
        }
    }
    Ok(entries)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
