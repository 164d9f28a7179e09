//! Byte-oriented PDF tokenizer.
//!
//! Operates on a bounded window of the file. When a token could continue
//! past the end of the window and the window does not reach the end of the
//! file, the lexer reports [`PdfError::Truncated`] so the caller can grow the
//! window and retry instead of misreading a partial token.

use crate::error::{PdfError, Result};

/// PDF keyword. Structural keywords are zero-allocation variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Keyword {
    // Structural
    ArrayStart, // [
    ArrayEnd,   // ]
    DictStart,  // <<
    DictEnd,    // >>

    // Primitives
    True,
    False,
    Null,

    // Object structure
    Obj,
    EndObj,
    R,
    Stream,
    EndStream,
    Xref,
    Trailer,
    StartXref,

    Unknown(Vec<u8>),
}

impl Keyword {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"[" => Self::ArrayStart,
            b"]" => Self::ArrayEnd,
            b"<<" => Self::DictStart,
            b">>" => Self::DictEnd,
            b"true" => Self::True,
            b"false" => Self::False,
            b"null" => Self::Null,
            b"obj" => Self::Obj,
            b"endobj" => Self::EndObj,
            b"R" => Self::R,
            b"stream" => Self::Stream,
            b"endstream" => Self::EndStream,
            b"xref" => Self::Xref,
            b"trailer" => Self::Trailer,
            b"startxref" => Self::StartXref,
            other => Self::Unknown(other.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::ArrayStart => b"[",
            Self::ArrayEnd => b"]",
            Self::DictStart => b"<<",
            Self::DictEnd => b">>",
            Self::True => b"true",
            Self::False => b"false",
            Self::Null => b"null",
            Self::Obj => b"obj",
            Self::EndObj => b"endobj",
            Self::R => b"R",
            Self::Stream => b"stream",
            Self::EndStream => b"endstream",
            Self::Xref => b"xref",
            Self::Trailer => b"trailer",
            Self::StartXref => b"startxref",
            Self::Unknown(bytes) => bytes,
        }
    }
}

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer value
    Int(i64),
    /// Floating point value.
    ///
    /// Integers too wide for `i64` also land here, rounded to the nearest
    /// `f64`; digits beyond 2^53 are not kept.
    Real(f64),
    /// Name (e.g., /Name), without the slash and with `#xx` escapes decoded
    Name(String),
    /// String (literal or hex), escapes decoded
    String(Vec<u8>),
    /// Keyword or delimiter
    Keyword(Keyword),
}

/// Tokenizer over a byte window.
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
    /// Whether the end of `data` is the end of the file.
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    pub const fn new(data: &'a [u8], at_eof: bool) -> Self {
        Self {
            data,
            pos: 0,
            at_eof,
        }
    }

    /// Lexer positioned at `pos` within the window.
    pub const fn at(data: &'a [u8], pos: usize, at_eof: bool) -> Self {
        Self { data, pos, at_eof }
    }

    /// Current position in the window
    pub const fn tell(&self) -> usize {
        self.pos
    }

    pub const fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    pub const fn at_eof(&self) -> bool {
        self.at_eof
    }

    /// Get remaining unparsed data
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Error for running off the window: a retry signal unless this is the
    /// end of the file.
    pub fn out_of_data(&self, start: usize) -> PdfError {
        if self.at_eof {
            PdfError::malformed(start, "unexpected end of file")
        } else {
            PdfError::Truncated {
                needed: self.data.len() + 1,
            }
        }
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'%' {
                self.pos += 1;
                match find_line_end(&self.data[self.pos..]) {
                    Some(offset) => self.pos += offset + 1,
                    None => self.pos = self.data.len(),
                }
                continue;
            }
            if !is_whitespace(b) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Get the next token with its start position, `None` at end of file.
    pub fn next_token(&mut self) -> Result<Option<(usize, Token)>> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(b) = self.peek() else {
            if self.at_eof {
                return Ok(None);
            }
            return Err(self.out_of_data(start));
        };

        let token = match b {
            b'/' => self.parse_name()?,
            b'(' => self.parse_string()?,
            b'<' => match self.peek_at(1) {
                Some(b'<') => {
                    self.pos += 2;
                    Token::Keyword(Keyword::DictStart)
                }
                None if !self.at_eof => return Err(self.out_of_data(start)),
                _ => self.parse_hex_string()?,
            },
            b'>' => match self.peek_at(1) {
                Some(b'>') => {
                    self.pos += 2;
                    Token::Keyword(Keyword::DictEnd)
                }
                None if !self.at_eof => return Err(self.out_of_data(start)),
                _ => {
                    self.pos += 1;
                    Token::Keyword(Keyword::Unknown(b">".to_vec()))
                }
            },
            b'[' => {
                self.pos += 1;
                Token::Keyword(Keyword::ArrayStart)
            }
            b']' => {
                self.pos += 1;
                Token::Keyword(Keyword::ArrayEnd)
            }
            b'{' | b'}' | b')' => {
                self.pos += 1;
                Token::Keyword(Keyword::Unknown(vec![b]))
            }
            b'+' | b'-' | b'.' => match self.peek_at(1) {
                Some(c) if c.is_ascii_digit() || (c == b'.' && b != b'.') => self.parse_number()?,
                None if !self.at_eof => return Err(self.out_of_data(start)),
                _ => self.parse_keyword()?,
            },
            c if c.is_ascii_digit() => self.parse_number()?,
            _ => self.parse_keyword()?,
        };

        Ok(Some((start, token)))
    }

    /// Peek the next token without consuming it.
    pub fn peek_token(&mut self) -> Result<Option<(usize, Token)>> {
        let saved = self.pos;
        let token = self.next_token();
        self.pos = saved;
        token
    }

    /// Consume bytes up to the next delimiter/whitespace; the run must not
    /// touch the end of a non-final window.
    fn take_regular_run(&mut self, start: usize) -> Result<&'a [u8]> {
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                return Ok(&self.data[start..self.pos]);
            }
            self.pos += 1;
        }
        if !self.at_eof {
            return Err(self.out_of_data(start));
        }
        Ok(&self.data[start..self.pos])
    }

    /// Parse a name (/Name)
    fn parse_name(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let raw = self.take_regular_run(start + 1)?;

        let mut name = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#'
                && let (Some(h), Some(l)) = (
                    raw.get(i + 1).copied().and_then(hex_value),
                    raw.get(i + 2).copied().and_then(hex_value),
                )
            {
                name.push((h << 4) | l);
                i += 3;
                continue;
            }
            name.push(raw[i]);
            i += 1;
        }

        Ok(Token::Name(name_from_bytes(&name)))
    }

    /// Parse a number (integer or real)
    fn parse_number(&mut self) -> Result<Token> {
        let start = self.pos;
        let mut has_dot = false;

        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }

        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else if b == b'.' && !has_dot {
                has_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos >= self.data.len() && !self.at_eof {
            return Err(self.out_of_data(start));
        }

        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| PdfError::malformed(start, "invalid number"))?;
        let text = text.strip_prefix('+').unwrap_or(text);

        if has_dot {
            // "5." and "-.5" are valid PDF reals
            let normalized = if text.ends_with('.') {
                format!("{}0", text)
            } else {
                text.to_string()
            };
            let value: f64 = normalized
                .parse()
                .map_err(|_| PdfError::malformed(start, format!("invalid real: {}", text)))?;
            return Ok(Token::Real(value));
        }

        match text.parse::<i64>() {
            Ok(value) => Ok(Token::Int(value)),
            // Too wide for i64: fall back to a real instead of failing.
            Err(_) => text
                .parse::<f64>()
                .map(Token::Real)
                .map_err(|_| PdfError::malformed(start, format!("invalid int: {}", text))),
        }
    }

    /// Parse a literal string (...)
    fn parse_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut result = Vec::new();
        let mut depth = 1;

        while depth > 0 {
            let Some(b) = self.advance() else {
                return Err(self.out_of_data(start));
            };
            match b {
                b'(' => {
                    depth += 1;
                    result.push(b'(');
                }
                b')' => {
                    depth -= 1;
                    if depth > 0 {
                        result.push(b')');
                    }
                }
                b'\\' => {
                    let Some(escaped) = self.advance() else {
                        return Err(self.out_of_data(start));
                    };
                    match escaped {
                        b'n' => result.push(b'\n'),
                        b'r' => result.push(b'\r'),
                        b't' => result.push(b'\t'),
                        b'b' => result.push(0x08),
                        b'f' => result.push(0x0c),
                        b'(' | b')' | b'\\' => result.push(escaped),
                        b'\r' => {
                            // Line continuation
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        c if (b'0'..=b'7').contains(&c) => {
                            let mut octal = u32::from(c - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d) if (b'0'..=b'7').contains(&d) => {
                                        self.pos += 1;
                                        octal = octal * 8 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            result.push((octal & 0xFF) as u8);
                        }
                        // Unknown escape: the backslash is dropped
                        c => result.push(c),
                    }
                }
                c => result.push(c),
            }
        }

        Ok(Token::String(result))
    }

    /// Parse a hex string <...>
    fn parse_hex_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut result = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let Some(c) = self.advance() else {
                return Err(self.out_of_data(start));
            };
            if c == b'>' {
                break;
            }
            // Anything that is not a hex digit (whitespace included) is skipped
            if let Some(nibble) = hex_value(c) {
                match pending.take() {
                    Some(high) => result.push((high << 4) | nibble),
                    None => pending = Some(nibble),
                }
            }
        }

        // Odd digit count: the missing final digit is 0
        if let Some(high) = pending {
            result.push(high << 4);
        }

        Ok(Token::String(result))
    }

    /// Parse a keyword
    fn parse_keyword(&mut self) -> Result<Token> {
        let start = self.pos;
        let bytes = self.take_regular_run(start)?;
        if bytes.is_empty() {
            // A lone delimiter we do not otherwise handle, e.g. '%' never gets here
            self.pos += 1;
            return Ok(Token::Keyword(Keyword::Unknown(
                self.data[start..self.pos].to_vec(),
            )));
        }
        Ok(Token::Keyword(Keyword::from_bytes(bytes)))
    }
}

/// Check if byte is PDF whitespace
pub const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x00' | b'\x0c')
}

/// Check if byte is a PDF delimiter
pub const fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

const fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn find_line_end(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| b == b'\r' || b == b'\n')
}

/// Names are decoded byte-per-char (Latin-1) so any byte sequence survives.
pub(crate) fn name_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `haystack`.
pub fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
