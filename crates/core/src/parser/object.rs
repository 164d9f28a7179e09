//! PDF object parser - builds object-model values from lexer tokens.
//!
//! Recursion is uniform: every call to [`ObjectParser::parse_event`] yields
//! either a value or a container-end sentinel, and containers loop until
//! they see their own end.

use super::lexer::{Keyword, Lexer, Token, find_bytes, is_whitespace};
use crate::document::security::SecurityHandler;
use crate::error::{PdfError, Result};
use crate::model::objects::{ObjRef, PdfDict, PdfStream, PdfValue};
use bytes::Bytes;
use tracing::warn;

/// Deepest array/dictionary nesting accepted inside one value.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Resolves indirect references met while parsing (e.g. `/Length 12 0 R`).
///
/// Implementations perform a nested dereference and must therefore not
/// hold any state borrowed by the parse that calls them.
pub trait ValueResolver {
    fn resolve_value(&self, r: ObjRef) -> PdfValue;
}

/// Per-object parse state threaded through every parse call.
#[derive(Clone, Copy, Default)]
pub struct ParseContext<'a> {
    /// Number of the indirect object being parsed (decryption key input)
    pub obj_num: u32,
    /// Generation of the indirect object being parsed
    pub gen_num: u16,
    /// Decrypts strings and stream bodies; `None` for unencrypted content
    pub decryptor: Option<&'a dyn SecurityHandler>,
    /// Resolves `/Length` and filter references
    pub resolver: Option<&'a dyn ValueResolver>,
}

impl<'a> ParseContext<'a> {
    /// Context for a specific indirect object.
    pub const fn for_object(mut self, r: ObjRef) -> Self {
        self.obj_num = r.obj_num;
        self.gen_num = r.gen_num;
        self
    }

    /// Same context with decryption switched off.
    pub const fn without_decryption(mut self) -> Self {
        self.decryptor = None;
        self
    }
}

/// Kind of container-end sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndKind {
    /// `]`
    Array,
    /// `>>`
    Dictionary,
    /// `endobj`
    Object,
    /// `endstream`
    Stream,
}

/// Result of one parse step.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Value(PdfValue),
    End(EndKind),
}

/// Parse one value from `window` starting at `start`.
///
/// Returns the value and the window index just past it. A dictionary
/// directly followed by `stream` is read as a stream.
pub fn parse_value(
    window: &Bytes,
    start: usize,
    at_eof: bool,
    ctx: ParseContext<'_>,
) -> Result<(PdfValue, usize)> {
    let mut parser = ObjectParser::at(window, start, at_eof, ctx);
    let value = parser.parse_object()?;
    Ok((value, parser.tell()))
}

/// PDF object parser over a byte window.
pub struct ObjectParser<'a> {
    window: &'a Bytes,
    lexer: Lexer<'a>,
    ctx: ParseContext<'a>,
    /// Containers currently open
    depth: usize,
}

impl<'a> ObjectParser<'a> {
    pub fn new(window: &'a Bytes, at_eof: bool, ctx: ParseContext<'a>) -> Self {
        Self::at(window, 0, at_eof, ctx)
    }

    pub fn at(window: &'a Bytes, start: usize, at_eof: bool, ctx: ParseContext<'a>) -> Self {
        Self {
            window,
            lexer: Lexer::at(window.as_ref(), start, at_eof),
            ctx,
            depth: 0,
        }
    }

    /// Position in the window
    pub const fn tell(&self) -> usize {
        self.lexer.tell()
    }

    pub const fn set_pos(&mut self, pos: usize) {
        self.lexer.set_pos(pos);
    }

    pub fn lexer(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    /// Parse the next value; a container end here is a syntax error.
    pub fn parse_object(&mut self) -> Result<PdfValue> {
        let start = self.tell();
        match self.parse_top_level()? {
            ParseEvent::Value(value) => Ok(value),
            ParseEvent::End(kind) => Err(PdfError::malformed(
                start,
                format!("unexpected {:?} end", kind),
            )),
        }
    }

    /// Parse `N G obj <value>` and return the header reference and value.
    ///
    /// When `expected` is given, the header object number must match it.
    pub fn parse_indirect(&mut self, expected: Option<ObjRef>) -> Result<(ObjRef, PdfValue)> {
        let start = self.tell();
        let header = self.parse_header()?;

        if let Some(expected) = expected {
            if expected.obj_num != header.obj_num {
                return Err(PdfError::malformed(
                    start,
                    format!("expected object {}, found {}", expected, header),
                ));
            }
            if expected.gen_num != header.gen_num {
                warn!(
                    expected = %expected,
                    found = %header,
                    "generation mismatch in object header"
                );
            }
        }

        let saved = self.ctx;
        self.ctx = self.ctx.for_object(header);
        let value = self.parse_object();
        self.ctx = saved;
        let value = value?;

        // Trailing endobj is optional in the wild; consume it when present.
        if let Ok(Some((_, Token::Keyword(Keyword::EndObj)))) = self.lexer.peek_token() {
            let _ = self.lexer.next_token();
        }

        Ok((header, value))
    }

    fn parse_header(&mut self) -> Result<ObjRef> {
        let start = self.tell();
        let obj_num = self.expect_unsigned(start, "object number")?;
        let gen_num = self.expect_unsigned(start, "generation number")?;
        match self.lexer.next_token()? {
            Some((_, Token::Keyword(Keyword::Obj))) => {}
            _ => return Err(PdfError::malformed(start, "expected 'obj' keyword")),
        }
        let obj_num = u32::try_from(obj_num)
            .map_err(|_| PdfError::malformed(start, "object number out of range"))?;
        let gen_num = u16::try_from(gen_num)
            .map_err(|_| PdfError::malformed(start, "generation number out of range"))?;
        Ok(ObjRef::new(obj_num, gen_num))
    }

    fn expect_unsigned(&mut self, start: usize, what: &str) -> Result<i64> {
        match self.lexer.next_token()? {
            Some((_, Token::Int(n))) if n >= 0 => Ok(n),
            _ => Err(PdfError::malformed(start, format!("expected {}", what))),
        }
    }

    /// Top-level step: like [`Self::parse_event`] but a dictionary may turn
    /// into a stream.
    fn parse_top_level(&mut self) -> Result<ParseEvent> {
        let event = self.parse_event()?;
        if let ParseEvent::Value(PdfValue::Dictionary(dict)) = event {
            if let Some((_, Token::Keyword(Keyword::Stream))) = self.lexer.peek_token()? {
                let _ = self.lexer.next_token()?;
                let stream = self.parse_stream_body(dict)?;
                return Ok(ParseEvent::Value(PdfValue::Stream(Box::new(stream))));
            }
            return Ok(ParseEvent::Value(PdfValue::Dictionary(dict)));
        }
        Ok(event)
    }

    /// Parse one value or container-end sentinel.
    pub fn parse_event(&mut self) -> Result<ParseEvent> {
        let Some((pos, token)) = self.lexer.next_token()? else {
            return Err(PdfError::malformed(self.tell(), "unexpected end of file"));
        };

        let value = match token {
            Token::Int(n) => self.integer_or_reference(n)?,
            Token::Real(r) => PdfValue::Real(r),
            Token::Name(name) => PdfValue::Name(name),
            Token::String(bytes) => PdfValue::String(self.decrypt_string(bytes)),
            Token::Keyword(kw) => match kw {
                Keyword::Null => PdfValue::Null,
                Keyword::True => PdfValue::Boolean(true),
                Keyword::False => PdfValue::Boolean(false),
                Keyword::ArrayStart => self.nested(pos, Self::parse_array)?,
                Keyword::DictStart => self.nested(pos, Self::parse_dict)?,
                Keyword::ArrayEnd => return Ok(ParseEvent::End(EndKind::Array)),
                Keyword::DictEnd => return Ok(ParseEvent::End(EndKind::Dictionary)),
                Keyword::EndObj => return Ok(ParseEvent::End(EndKind::Object)),
                Keyword::EndStream => return Ok(ParseEvent::End(EndKind::Stream)),
                other => {
                    return Err(PdfError::malformed(
                        pos,
                        format!(
                            "unexpected keyword: {}",
                            String::from_utf8_lossy(other.as_bytes())
                        ),
                    ));
                }
            },
        };

        Ok(ParseEvent::Value(value))
    }

    /// `N G R` is a reference, anything else leaves the integer alone.
    fn integer_or_reference(&mut self, n: i64) -> Result<PdfValue> {
        let saved = self.tell();
        if let (Ok(obj_num), Some((_, Token::Int(g)))) = (u32::try_from(n), self.lexer.next_token()?)
            && let Ok(gen_num) = u16::try_from(g)
            && let Some((_, Token::Keyword(Keyword::R))) = self.lexer.next_token()?
        {
            return Ok(PdfValue::Reference(ObjRef::new(obj_num, gen_num)));
        }
        self.set_pos(saved);
        Ok(PdfValue::Integer(n))
    }

    /// Parse a container body one level deeper, bounded by
    /// [`MAX_NESTING_DEPTH`].
    fn nested(&mut self, pos: usize, body: fn(&mut Self) -> Result<PdfValue>) -> Result<PdfValue> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(PdfError::malformed(pos, "nesting too deep"));
        }
        self.depth += 1;
        let value = body(self);
        self.depth -= 1;
        value
    }

    /// Parse array contents until ]
    fn parse_array(&mut self) -> Result<PdfValue> {
        let mut arr = Vec::new();
        loop {
            let pos = self.tell();
            match self.parse_event()? {
                ParseEvent::Value(value) => arr.push(value),
                ParseEvent::End(EndKind::Array) => break,
                ParseEvent::End(kind) => {
                    return Err(PdfError::malformed(
                        pos,
                        format!("unexpected {:?} end inside array", kind),
                    ));
                }
            }
        }
        Ok(PdfValue::Array(arr))
    }

    /// Parse dict contents until >>
    fn parse_dict(&mut self) -> Result<PdfValue> {
        let mut dict = PdfDict::new();
        loop {
            let pos = self.tell();
            let key = match self.parse_event()? {
                ParseEvent::End(EndKind::Dictionary) => break,
                ParseEvent::Value(PdfValue::Name(name)) => name,
                ParseEvent::Value(other) => {
                    return Err(PdfError::malformed(
                        pos,
                        format!("expected name as dict key, got {}", other.type_name()),
                    ));
                }
                ParseEvent::End(kind) => {
                    return Err(PdfError::malformed(
                        pos,
                        format!("unexpected {:?} end inside dictionary", kind),
                    ));
                }
            };

            let pos = self.tell();
            match self.parse_event()? {
                ParseEvent::Value(value) => {
                    dict.insert(key, value);
                }
                ParseEvent::End(kind) => {
                    return Err(PdfError::malformed(
                        pos,
                        format!("missing value for /{} before {:?} end", key, kind),
                    ));
                }
            }
        }
        Ok(PdfValue::Dictionary(dict))
    }

    /// Read the body after the `stream` keyword.
    fn parse_stream_body(&mut self, mut dict: PdfDict) -> Result<PdfStream> {
        let data = self.lexer.data();
        let at_eof = self.lexer.at_eof();
        let keyword_end = self.tell();

        // The keyword is followed by CRLF or LF (a lone CR is tolerated).
        let mut start = keyword_end;
        if data.get(start) == Some(&b'\r') {
            start += 1;
        }
        if data.get(start) == Some(&b'\n') {
            start += 1;
        }
        if start >= data.len() && !at_eof {
            return Err(PdfError::Truncated {
                needed: start + 1,
            });
        }

        let declared = match dict.get("Length") {
            Some(PdfValue::Integer(n)) => Some(*n),
            Some(PdfValue::Reference(r)) => self
                .ctx
                .resolver
                .map(|resolver| resolver.resolve_value(*r))
                .and_then(|v| v.as_int().ok()),
            _ => None,
        };

        let declared_end = declared
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|n| start.checked_add(n));

        let (end, after) = match declared_end {
            Some(end) => match self.check_endstream(end)? {
                Some(after) => (end, after),
                None => {
                    warn!(
                        obj = self.ctx.obj_num,
                        declared = ?declared,
                        "stream /Length does not reach endstream, scanning"
                    );
                    self.scan_endstream(start)?
                }
            },
            None => self.scan_endstream(start)?,
        };

        // Fix up /Length to what was actually read when it was indirect or wrong.
        let actual = PdfValue::Integer((end - start) as i64);
        if dict.get("Length") != Some(&actual) {
            dict.insert("Length".into(), actual);
        }

        self.resolve_filter_entries(&mut dict);

        let raw = self.window.slice(start..end);
        let mut stream = PdfStream::new(dict, raw);
        let is_xref = matches!(stream.get("Type"), Some(PdfValue::Name(t)) if t == "XRef");
        if let Some(handler) = self.ctx.decryptor
            && !is_xref
        {
            let plain = handler.decrypt_stream(self.ctx.obj_num, self.ctx.gen_num, stream.raw_data());
            stream.set_decrypted(plain);
        }

        self.set_pos(after);
        Ok(stream)
    }

    /// Whether `endstream` follows `end` (after optional whitespace).
    /// Returns the position just past the keyword.
    fn check_endstream(&self, end: usize) -> Result<Option<usize>> {
        let data = self.lexer.data();
        let at_eof = self.lexer.at_eof();
        let keyword = b"endstream";

        if end > data.len() {
            if at_eof {
                return Ok(None);
            }
            return Err(PdfError::Truncated {
                needed: end + keyword.len() + 2,
            });
        }
        let mut pos = end;
        while pos < data.len() && is_whitespace(data[pos]) {
            pos += 1;
        }
        if pos + keyword.len() > data.len() {
            if at_eof {
                return Ok(None);
            }
            return Err(PdfError::Truncated {
                needed: pos + keyword.len() + 1,
            });
        }
        if &data[pos..pos + keyword.len()] == keyword {
            return Ok(Some(pos + keyword.len()));
        }
        Ok(None)
    }

    /// Fallback: body ends at the next literal `endstream`, minus one EOL.
    fn scan_endstream(&self, start: usize) -> Result<(usize, usize)> {
        let data = self.lexer.data();
        let keyword = b"endstream";
        let Some(found) = find_bytes(&data[start.min(data.len())..], keyword) else {
            if self.lexer.at_eof() {
                return Err(PdfError::malformed(start, "stream without endstream"));
            }
            return Err(PdfError::Truncated {
                needed: data.len().saturating_mul(2).max(start + 1),
            });
        };
        let keyword_pos = start + found;
        let mut end = keyword_pos;
        if end > start && data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && data[end - 1] == b'\r' {
            end -= 1;
        }
        Ok((end, keyword_pos + keyword.len()))
    }

    /// Resolve indirect `/Filter` and `/DecodeParms` entries in place.
    fn resolve_filter_entries(&self, dict: &mut PdfDict) {
        let Some(resolver) = self.ctx.resolver else {
            return;
        };
        for key in ["Filter", "DecodeParms"] {
            let Some(value) = dict.get_mut(key) else {
                continue;
            };
            if let PdfValue::Reference(r) = value {
                *value = resolver.resolve_value(*r);
            }
            if let PdfValue::Array(items) = value {
                for item in items.iter_mut() {
                    if let PdfValue::Reference(r) = item {
                        *item = resolver.resolve_value(*r);
                    }
                }
            }
        }
    }

    fn decrypt_string(&self, bytes: Vec<u8>) -> Vec<u8> {
        match self.ctx.decryptor {
            Some(handler) => handler.decrypt_string(self.ctx.obj_num, self.ctx.gen_num, &bytes),
            None => bytes,
        }
    }
}
