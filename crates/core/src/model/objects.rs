//! PDF object types.
//!
//! The tagged union every parsed value becomes. Containers own their
//! children; indirect references only carry the object/generation pair and
//! are resolved on demand by [`crate::document::PdfReader`].

use crate::error::{PdfError, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt;

/// Dictionary type. Insertion order is kept so that values re-encode the way
/// they were read.
pub type PdfDict = IndexMap<String, PdfValue>;

/// PDF value - the fundamental type of the object model.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfValue {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating point) value; also integers beyond `i64`, rounded
    Real(f64),
    /// Name object (e.g., /Type, /Font), stored without the slash
    Name(String),
    /// String (literal or hex), as raw bytes
    String(Vec<u8>),
    /// Array of values
    Array(Vec<Self>),
    /// Dictionary (name -> value mapping)
    Dictionary(PdfDict),
    /// Stream (dictionary + raw body)
    Stream(Box<PdfStream>),
    /// Indirect object reference
    Reference(ObjRef),
}

impl PdfValue {
    /// Check if this is a null object
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get as boolean
    pub const fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            _ => Err(self.type_error("bool")),
        }
    }

    /// Get as integer
    pub const fn as_int(&self) -> Result<i64> {
        match self {
            Self::Integer(n) => Ok(*n),
            _ => Err(self.type_error("int")),
        }
    }

    /// Get as real (float)
    pub const fn as_real(&self) -> Result<f64> {
        match self {
            Self::Real(n) => Ok(*n),
            _ => Err(self.type_error("real")),
        }
    }

    /// Get numeric value (int or real coerced to f64)
    pub const fn as_num(&self) -> Result<f64> {
        match self {
            Self::Integer(n) => Ok(*n as f64),
            Self::Real(n) => Ok(*n),
            _ => Err(self.type_error("number")),
        }
    }

    /// Get as name string
    pub fn as_name(&self) -> Result<&str> {
        match self {
            Self::Name(s) => Ok(s),
            _ => Err(self.type_error("name")),
        }
    }

    /// Get as byte string
    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.type_error("string")),
        }
    }

    /// Get as array
    pub const fn as_array(&self) -> Result<&Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            _ => Err(self.type_error("array")),
        }
    }

    /// Get as dictionary
    pub const fn as_dict(&self) -> Result<&PdfDict> {
        match self {
            Self::Dictionary(d) => Ok(d),
            _ => Err(self.type_error("dict")),
        }
    }

    /// Get as stream
    pub fn as_stream(&self) -> Result<&PdfStream> {
        match self {
            Self::Stream(s) => Ok(s),
            _ => Err(self.type_error("stream")),
        }
    }

    /// Get as object reference
    pub const fn as_reference(&self) -> Result<ObjRef> {
        match self {
            Self::Reference(r) => Ok(*r),
            _ => Err(self.type_error("ref")),
        }
    }

    /// Look up a key in a dictionary or in a stream's dictionary.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dictionary(d) => d.get(key),
            Self::Stream(s) => s.dict.get(key),
            _ => None,
        }
    }

    /// Get type name for error messages
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "bool",
            Self::Integer(_) => "int",
            Self::Real(_) => "real",
            Self::Name(_) => "name",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dict",
            Self::Stream(_) => "stream",
            Self::Reference(_) => "ref",
        }
    }

    const fn type_error(&self, expected: &'static str) -> PdfError {
        PdfError::TypeError {
            expected,
            got: self.type_name(),
        }
    }
}

impl From<ObjRef> for PdfValue {
    fn from(r: ObjRef) -> Self {
        Self::Reference(r)
    }
}

impl From<PdfDict> for PdfValue {
    fn from(d: PdfDict) -> Self {
        Self::Dictionary(d)
    }
}

impl From<PdfStream> for PdfValue {
    fn from(s: PdfStream) -> Self {
        Self::Stream(Box::new(s))
    }
}

/// PDF indirect object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    /// Object number
    pub obj_num: u32,
    /// Generation number
    pub gen_num: u16,
}

impl ObjRef {
    /// Create a new object reference.
    pub const fn new(obj_num: u32, gen_num: u16) -> Self {
        Self { obj_num, gen_num }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.obj_num, self.gen_num)
    }
}

/// PDF Stream - dictionary attributes + raw body.
///
/// The body is kept exactly as it sits between `stream` and `endstream`
/// (after decryption, when the document is encrypted). Filters are applied
/// by consumers through [`crate::codec::filters::decode_stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    /// Stream dictionary
    pub dict: PdfDict,
    raw: Bytes,
    decrypted: bool,
}

impl PdfStream {
    /// Create a new stream.
    pub fn new(dict: PdfDict, raw: impl Into<Bytes>) -> Self {
        Self {
            dict,
            raw: raw.into(),
            decrypted: false,
        }
    }

    /// Get raw (undecoded) data.
    pub fn raw_data(&self) -> &[u8] {
        self.raw.as_ref()
    }

    /// Get raw data as shared bytes.
    pub fn raw_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    /// Check if the raw data went through the security handler already.
    pub const fn is_decrypted(&self) -> bool {
        self.decrypted
    }

    /// Replace raw data and mark it as decrypted.
    pub fn set_decrypted(&mut self, data: Vec<u8>) {
        self.raw = Bytes::from(data);
        self.decrypted = true;
    }

    /// Get attribute by name.
    pub fn get(&self, name: &str) -> Option<&PdfValue> {
        self.dict.get(name)
    }

    /// Names of the filters in `/Filter`, in application order.
    ///
    /// Only direct names are reported; the parser resolves indirect filter
    /// entries before the stream is handed out.
    pub fn filters(&self) -> Vec<&str> {
        match self.dict.get("Filter") {
            Some(PdfValue::Name(name)) => vec![name.as_str()],
            Some(PdfValue::Array(arr)) => arr.iter().filter_map(|f| f.as_name().ok()).collect(),
            _ => Vec::new(),
        }
    }

    /// Decode parameters matching each entry of [`Self::filters`].
    pub fn decode_parms(&self) -> Vec<Option<&PdfDict>> {
        let count = self.filters().len();
        match self.dict.get("DecodeParms") {
            Some(PdfValue::Dictionary(d)) => {
                let mut parms = vec![None; count];
                if let Some(first) = parms.first_mut() {
                    *first = Some(d);
                }
                parms
            }
            Some(PdfValue::Array(arr)) => (0..count)
                .map(|i| arr.get(i).and_then(|p| p.as_dict().ok()))
                .collect(),
            _ => vec![None; count],
        }
    }
}

/// Convenience constructor for dictionaries in tests and collaborators.
pub fn dict<I, K>(entries: I) -> PdfDict
where
    I: IntoIterator<Item = (K, PdfValue)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
