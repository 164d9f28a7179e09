//! Reader configuration.
//!
//! Provides `ReaderOptions` plus a fluent builder on top of it.
//!
//! # Example
//! ```ignore
//! use quire_core::api::ReaderBuilder;
//!
//! let reader = ReaderBuilder::new()
//!     .password("secret")
//!     .cache_capacity(512)
//!     .open("document.pdf")?;
//! ```

use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;

use bytes::Bytes;

use crate::document::reader::PdfReader;
use crate::document::window::{ByteSource, WindowPolicy};
use crate::document::xref::{DEFAULT_MAX_REVISIONS, DEFAULT_TAIL_SCAN};
use crate::error::Result;
use crate::model::objects::PdfDict;

/// Default bound on transitive reference chains.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 32;

/// Asked for a password after the previous one failed; receives the attempt
/// number (starting at 1). `None` gives up.
pub type PasswordCallback = Box<dyn FnMut(u32) -> Option<String>>;

/// Called with the page index and the page dictionary (inherited attributes
/// merged in) for every page the page-tree walk reaches.
pub type PageReadCallback = Box<dyn FnMut(usize, &PdfDict)>;

/// Options for opening a [`PdfReader`].
pub struct ReaderOptions {
    /// Password tried first (as user, then as owner password).
    pub password: Option<String>,
    pub password_callback: Option<PasswordCallback>,
    pub on_page_read: Option<PageReadCallback>,
    /// Object cache bound; `None` keeps every parsed object.
    pub cache_capacity: Option<usize>,
    pub window: WindowPolicy,
    /// Bytes scanned from the end of the file for `startxref`.
    pub tail_scan: usize,
    pub max_reference_depth: usize,
    pub max_revisions: usize,
    /// Memory-map paths instead of reading through the file handle.
    pub use_mmap: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            password: None,
            password_callback: None,
            on_page_read: None,
            cache_capacity: None,
            window: WindowPolicy::default(),
            tail_scan: DEFAULT_TAIL_SCAN,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            max_revisions: DEFAULT_MAX_REVISIONS,
            use_mmap: true,
        }
    }
}

impl fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_callback", &self.password_callback.is_some())
            .field("on_page_read", &self.on_page_read.is_some())
            .field("cache_capacity", &self.cache_capacity)
            .field("window", &self.window)
            .field("tail_scan", &self.tail_scan)
            .field("max_reference_depth", &self.max_reference_depth)
            .field("max_revisions", &self.max_revisions)
            .field("use_mmap", &self.use_mmap)
            .finish()
    }
}

/// A builder for configuring and opening a [`PdfReader`].
#[derive(Debug, Default)]
pub struct ReaderBuilder {
    options: ReaderOptions,
}

impl ReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the password for encrypted PDFs.
    pub fn password(mut self, pwd: &str) -> Self {
        self.options.password = Some(pwd.to_string());
        self
    }

    /// Sets a callback asked for further passwords when one fails.
    ///
    /// # Example
    /// ```ignore
    /// let reader = ReaderBuilder::new()
    ///     .on_password(|attempt| (attempt == 1).then(|| "owner".to_string()))
    ///     .open("encrypted.pdf")?;
    /// ```
    pub fn on_password(mut self, callback: impl FnMut(u32) -> Option<String> + 'static) -> Self {
        self.options.password_callback = Some(Box::new(callback));
        self
    }

    /// Sets an observer for the page-tree walk.
    pub fn on_page_read(mut self, callback: impl FnMut(usize, &PdfDict) + 'static) -> Self {
        self.options.on_page_read = Some(Box::new(callback));
        self
    }

    /// Bounds the object cache (least recently used entries are evicted).
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.options.cache_capacity = Some(capacity);
        self
    }

    pub fn window(mut self, policy: WindowPolicy) -> Self {
        self.options.window = policy;
        self
    }

    pub fn tail_scan(mut self, bytes: usize) -> Self {
        self.options.tail_scan = bytes;
        self
    }

    pub fn max_reference_depth(mut self, depth: usize) -> Self {
        self.options.max_reference_depth = depth;
        self
    }

    pub fn max_revisions(mut self, revisions: usize) -> Self {
        self.options.max_revisions = revisions;
        self
    }

    /// Chooses between memory-mapping and positioned reads for paths.
    pub fn use_mmap(mut self, enabled: bool) -> Self {
        self.options.use_mmap = enabled;
        self
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn into_options(self) -> ReaderOptions {
        self.options
    }

    /// Opens a file.
    pub fn open(self, path: impl AsRef<Path>) -> Result<PdfReader> {
        let source = ByteSource::open(path, self.options.use_mmap)?;
        PdfReader::from_source(source, self.options)
    }

    /// Opens in-memory data.
    pub fn open_bytes(self, data: impl Into<Bytes>) -> Result<PdfReader> {
        PdfReader::from_source(ByteSource::Shared(data.into()), self.options)
    }

    /// Opens a seekable stream.
    pub fn open_reader<R: Read + Seek + 'static>(self, reader: R) -> Result<PdfReader> {
        PdfReader::from_source(ByteSource::from_reader(reader)?, self.options)
    }
}
