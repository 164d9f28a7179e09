//! PDF reader - lazy object resolution over a windowed file.
//!
//! Opening a reader walks the trailer chain once; objects are parsed on
//! first dereference and cached for the lifetime of the reader. A reader
//! is single-threaded: all interior state lives in `RefCell`s.

use super::objstm::{ObjectStreamDecoder, find_in_container};
use super::security::{EncryptionState, SecurityHandler, StandardSecurityHandler};
use super::window::{ByteSource, WindowPolicy, with_window};
use super::xref::{CrossRefEntry, Trailer, XRefResolver, XRefTable};
use crate::api::options::{PageReadCallback, ReaderOptions};
use crate::error::{PdfError, Result};
use crate::model::objects::{ObjRef, PdfDict, PdfStream, PdfValue};
use crate::parser::object::{ObjectParser, ParseContext, ValueResolver};
use bytes::Bytes;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Object cache; unbounded unless a capacity is given, in which case the
/// least recently used entry goes first.
struct ObjectCache {
    capacity: Option<usize>,
    map: IndexMap<u32, PdfValue>,
}

impl ObjectCache {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
        }
    }

    fn get(&mut self, obj_num: u32) -> Option<PdfValue> {
        let index = self.map.get_index_of(&obj_num)?;
        let value = self.map.get_index(index)?.1.clone();
        if self.capacity.is_some() && index + 1 != self.map.len() {
            self.map.move_index(index, self.map.len() - 1);
        }
        Some(value)
    }

    fn insert(&mut self, obj_num: u32, value: PdfValue) {
        if self.capacity == Some(0) {
            return;
        }
        if self.map.contains_key(&obj_num) {
            self.map.shift_remove(&obj_num);
        }
        self.map.insert(obj_num, value);
        if let Some(capacity) = self.capacity
            && self.map.len() > capacity
        {
            self.map.shift_remove_index(0);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

/// Removes an object number from the in-progress set when dropped.
struct ResolvingGuard<'a> {
    set: &'a RefCell<FxHashSet<u32>>,
    obj_num: u32,
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.obj_num);
    }
}

/// An open PDF document.
pub struct PdfReader {
    source: RefCell<Option<ByteSource>>,
    file_len: u64,
    xref: XRefTable,
    security: Option<StandardSecurityHandler>,
    /// Object number of the `/Encrypt` dictionary, which is never decrypted
    encrypt_obj: Option<u32>,
    cache: RefCell<ObjectCache>,
    objstm: ObjectStreamDecoder,
    resolving: RefCell<FxHashSet<u32>>,
    policy: WindowPolicy,
    max_reference_depth: usize,
    pub(crate) on_page_read: RefCell<Option<PageReadCallback>>,
    disposed: Cell<bool>,
}

impl PdfReader {
    /// Open a file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let source = ByteSource::open(path, options.use_mmap)?;
        Self::from_source(source, options)
    }

    /// Open in-memory data (zero-copy for `Bytes`).
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_source(ByteSource::Shared(data.into()), ReaderOptions::default())
    }

    /// Open a seekable stream; windows are read on demand.
    pub fn from_reader<R: Read + Seek + 'static>(reader: R, options: ReaderOptions) -> Result<Self> {
        Self::from_source(ByteSource::from_reader(reader)?, options)
    }

    /// Open any byte source.
    pub fn from_source(source: ByteSource, mut options: ReaderOptions) -> Result<Self> {
        let xref = XRefResolver::new(&source)
            .with_policy(options.window)
            .with_tail_scan(options.tail_scan)
            .with_max_revisions(options.max_revisions)
            .resolve()?;
        debug!(
            revisions = xref.revisions(),
            objects = xref.object_numbers().len(),
            "cross-reference table loaded"
        );

        let mut reader = Self {
            file_len: source.len(),
            source: RefCell::new(Some(source)),
            xref,
            security: None,
            encrypt_obj: None,
            cache: RefCell::new(ObjectCache::new(options.cache_capacity)),
            objstm: ObjectStreamDecoder::new(),
            resolving: RefCell::new(FxHashSet::default()),
            policy: options.window,
            max_reference_depth: options.max_reference_depth,
            on_page_read: RefCell::new(options.on_page_read.take()),
            disposed: Cell::new(false),
        };
        reader.init_security(&mut options)?;
        Ok(reader)
    }

    /// Set up decryption when the trailer names an `/Encrypt` dictionary.
    fn init_security(&mut self, options: &mut ReaderOptions) -> Result<()> {
        let Some(encrypt) = self.xref.trailer().encrypt.clone() else {
            return Ok(());
        };

        // Loaded before the handler exists, so it is read in the clear.
        let dict = match &encrypt {
            PdfValue::Reference(r) => {
                self.encrypt_obj = Some(r.obj_num);
                self.try_get_object(*r)?
            }
            other => other.clone(),
        };
        let dict = dict
            .as_dict()
            .map_err(|_| PdfError::Encryption("/Encrypt is not a dictionary".into()))?;

        let doc_id = self.xref.trailer().id.clone().unwrap_or_default();
        let mut handler = StandardSecurityHandler::from_dict(dict, &doc_id)?;

        let first = options.password.clone().unwrap_or_default();
        let mut authenticated = handler.authenticate(first.as_bytes());
        let mut attempt = 0u32;
        while !authenticated {
            let Some(callback) = options.password_callback.as_mut() else {
                break;
            };
            attempt += 1;
            let Some(password) = callback(attempt) else {
                break;
            };
            authenticated = handler.authenticate(password.as_bytes());
        }
        if !authenticated {
            return Err(PdfError::Encryption("Incorrect password".into()));
        }

        debug!(
            revision = handler.revision(),
            key_bits = handler.key_bits(),
            "document decryption enabled"
        );
        self.security = Some(handler);
        // Anything parsed so far was read without decryption.
        self.cache.get_mut().clear();
        self.objstm.clear();
        Ok(())
    }

    /// Resolve a value: references are followed (transitively, up to the
    /// depth bound); anything else is returned as is. Missing, dangling or
    /// unparsable objects come back as `Null`.
    pub fn get_object(&self, value: &PdfValue) -> PdfValue {
        let mut current = value.clone();
        let mut hops = 0;
        while let PdfValue::Reference(r) = current {
            if hops == self.max_reference_depth {
                warn!(
                    limit = self.max_reference_depth,
                    "reference chain too deep, resolved to null"
                );
                return PdfValue::Null;
            }
            hops += 1;
            current = self.dereference(r);
        }
        current
    }

    /// Resolve a reference (see [`Self::get_object`]).
    pub fn get(&self, r: ObjRef) -> PdfValue {
        self.get_object(&PdfValue::Reference(r))
    }

    /// Load one object by number; errors become `Null`.
    pub fn dereference_by_number(&self, obj_num: u32) -> PdfValue {
        match self.load(obj_num) {
            Ok(value) => value,
            Err(e) => {
                warn!(obj = obj_num, error = %e, "object failed to load, resolved to null");
                PdfValue::Null
            }
        }
    }

    fn dereference(&self, r: ObjRef) -> PdfValue {
        self.dereference_by_number(r.obj_num)
    }

    /// Load one object, reporting failures scoped to that object.
    ///
    /// Missing and free objects still resolve to `Ok(Null)`; after
    /// [`Self::dispose`] this returns [`PdfError::Disposed`].
    pub fn try_get_object(&self, r: ObjRef) -> Result<PdfValue> {
        self.load(r.obj_num)
    }

    fn load(&self, obj_num: u32) -> Result<PdfValue> {
        if self.disposed.get() {
            return Err(PdfError::Disposed);
        }
        if let Some(value) = self.cache.borrow_mut().get(obj_num) {
            trace!(obj = obj_num, "cache hit");
            return Ok(value);
        }
        trace!(obj = obj_num, "cache miss");

        if !self.resolving.borrow_mut().insert(obj_num) {
            return Err(PdfError::malformed(
                0,
                format!("object {} refers to itself while being parsed", obj_num),
            ));
        }
        let _guard = ResolvingGuard {
            set: &self.resolving,
            obj_num,
        };

        let value = match self.xref.get(obj_num) {
            None => {
                warn!(obj = obj_num, "dangling reference, resolved to null");
                return Ok(PdfValue::Null);
            }
            Some(CrossRefEntry::Free) => return Ok(PdfValue::Null),
            Some(&CrossRefEntry::Offset { offset, gen_num }) => {
                self.load_direct(obj_num, gen_num, offset)?
            }
            Some(&CrossRefEntry::InObjectStream { container, index }) => {
                self.load_compressed(obj_num, container, index)?
            }
        };

        self.cache.borrow_mut().insert(obj_num, value.clone());
        Ok(value)
    }

    /// Parse `N G obj` at `offset`, windowed by the object's extent.
    fn load_direct(&self, obj_num: u32, gen_num: u16, offset: u64) -> Result<PdfValue> {
        let source = self.source.borrow();
        let source = source.as_ref().ok_or(PdfError::Disposed)?;
        if offset >= self.file_len {
            warn!(obj = obj_num, offset, "object offset past end of file");
            return Ok(PdfValue::Null);
        }

        let (start, end) = self.xref.extent(offset, self.file_len);
        let estimate = usize::try_from(end - start).unwrap_or(usize::MAX);

        let decryptor = match &self.security {
            Some(handler) if self.encrypt_obj != Some(obj_num) => {
                Some(handler as &dyn SecurityHandler)
            }
            _ => None,
        };
        let ctx = ParseContext {
            obj_num,
            gen_num,
            decryptor,
            resolver: Some(self as &dyn ValueResolver),
        };
        let expected = ObjRef::new(obj_num, gen_num);

        with_window(source, offset, estimate, &self.policy, |window| {
            let mut parser = ObjectParser::new(&window.data, window.at_eof, ctx);
            let (_, value) = parser.parse_indirect(Some(expected))?;
            Ok(value)
        })
    }

    /// Pull an object out of its (memoized) container.
    fn load_compressed(&self, obj_num: u32, container: u32, index: u32) -> Result<PdfValue> {
        let objects = self.objstm.decode_container(container, || {
            match self.load(container)? {
                PdfValue::Stream(stream) => Ok(*stream),
                other => Err(PdfError::malformed(
                    0,
                    format!(
                        "object stream {} is a {}, not a stream",
                        container,
                        other.type_name()
                    ),
                )),
            }
        })?;

        match find_in_container(&objects, obj_num, index) {
            Some(value) => Ok(value.clone()),
            None => {
                warn!(obj = obj_num, container, "object missing from its object stream");
                Ok(PdfValue::Null)
            }
        }
    }

    /// Release the file handle or mapping and drop cached objects.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Ok(mut source) = self.source.try_borrow_mut() {
            source.take();
        }
        if let Ok(mut cache) = self.cache.try_borrow_mut() {
            cache.clear();
        }
        self.objstm.clear();
        debug!("reader disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Merged trailer.
    pub fn trailer(&self) -> &Trailer {
        self.xref.trailer()
    }

    /// Number of revisions in the trailer chain.
    pub fn revisions(&self) -> usize {
        self.xref.revisions()
    }

    /// In-use object numbers, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        self.xref.object_numbers()
    }

    /// Raw cross-reference entry.
    pub fn entry(&self, obj_num: u32) -> Option<CrossRefEntry> {
        self.xref.get(obj_num).copied()
    }

    /// Byte range bounding a directly stored object.
    pub fn object_extent(&self, obj_num: u32) -> Option<(u64, u64)> {
        match self.xref.get(obj_num)? {
            CrossRefEntry::Offset { offset, .. } => Some(self.xref.extent(*offset, self.file_len)),
            _ => None,
        }
    }

    /// File length in bytes.
    pub const fn len(&self) -> u64 {
        self.file_len
    }

    pub const fn is_empty(&self) -> bool {
        self.file_len == 0
    }

    /// Document catalog (`/Root`), `Null` when absent.
    pub fn catalog(&self) -> PdfValue {
        match self.trailer().root {
            Some(root) => self.get(root),
            None => PdfValue::Null,
        }
    }

    /// Document information dictionary, `Null` when absent.
    pub fn info(&self) -> PdfValue {
        match &self.trailer().info {
            Some(info) => self.get_object(info),
            None => PdfValue::Null,
        }
    }

    /// First element of the trailer `/ID`, empty when absent.
    pub fn file_id(&self) -> Vec<u8> {
        self.trailer().id.clone().unwrap_or_default()
    }

    pub const fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// Raw `/P` value; -1 (everything allowed) for unencrypted files.
    pub fn permissions(&self) -> i32 {
        self.security.as_ref().map_or(-1, |h| h.permissions())
    }

    /// Key material in use, if the document is encrypted.
    pub fn encryption(&self) -> Option<EncryptionState> {
        self.security.as_ref().map(StandardSecurityHandler::state)
    }

    /// Number of object stream containers decompressed so far.
    pub fn objects_decoded_from_streams(&self) -> usize {
        self.objstm.decode_count()
    }

    /// Resolve a dictionary entry.
    pub fn resolve_key(&self, dict: &PdfDict, key: &str) -> PdfValue {
        dict.get(key)
            .map_or(PdfValue::Null, |value| self.get_object(value))
    }

    /// Resolve a value expected to be a stream.
    pub fn get_stream(&self, value: &PdfValue) -> Option<PdfStream> {
        match self.get_object(value) {
            PdfValue::Stream(stream) => Some(*stream),
            _ => None,
        }
    }
}

impl ValueResolver for PdfReader {
    fn resolve_value(&self, r: ObjRef) -> PdfValue {
        self.get(r)
    }
}

impl Drop for PdfReader {
    fn drop(&mut self) {
        self.dispose();
    }
}
