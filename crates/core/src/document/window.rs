//! Windowed access to the underlying file.
//!
//! Objects are parsed from a bounded window anchored at their offset. When
//! the parser runs off the end of a window that does not reach the end of
//! the file it reports [`PdfError::Truncated`], and [`with_window`] grows the
//! window and retries.

use crate::error::{PdfError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Default first window length.
pub const DEFAULT_INITIAL_WINDOW: usize = 4 * 1024;
/// Default window cap.
pub const DEFAULT_MAX_WINDOW: usize = 256 * 1024 * 1024;

/// Buffer growth policy: start at `initial`, double on every retry, stop
/// at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub initial: usize,
    pub max: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_WINDOW,
            max: DEFAULT_MAX_WINDOW,
        }
    }
}

impl WindowPolicy {
    /// Length of the next attempt after `current` failed wanting `needed`.
    /// `None` once the cap was already tried.
    pub fn grow(&self, current: usize, needed: usize) -> Option<usize> {
        if current >= self.max {
            return None;
        }
        Some(current.saturating_mul(2).max(needed).min(self.max))
    }
}

/// Anything readable and seekable, used for stream-backed readers.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Where document bytes come from.
pub enum ByteSource {
    /// Whole file in memory or memory-mapped (zero-copy windows).
    Shared(Bytes),
    /// Positioned reads on a handle; windows are copied on demand.
    Stream {
        inner: RefCell<Box<dyn ReadSeek>>,
        len: u64,
    },
}

impl ByteSource {
    /// Map a file into memory.
    pub fn mmap(file: &File) -> io::Result<Self> {
        // SAFETY: the mapping is read-only; concurrent truncation of the file
        // by another process is outside what a reader can guard against.
        let mmap = unsafe { Mmap::map(file) }?;
        Ok(Self::Shared(Bytes::from_owner(mmap)))
    }

    /// Open a path, memory-mapped or through positioned reads.
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        if use_mmap {
            Self::mmap(&file)
        } else {
            Self::from_reader(file)
        }
    }

    /// Wrap a seekable reader.
    pub fn from_reader<R: Read + Seek + 'static>(mut reader: R) -> io::Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        Ok(Self::Stream {
            inner: RefCell::new(Box::new(reader)),
            len,
        })
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::Shared(data) => data.len() as u64,
            Self::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`; shorter at the end of the file.
    pub fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let total = self.len();
        if offset >= total {
            return Ok(Bytes::new());
        }
        let available = usize::try_from(total - offset).unwrap_or(usize::MAX);
        let len = len.min(available);
        match self {
            Self::Shared(data) => {
                let start = offset as usize;
                Ok(data.slice(start..start + len))
            }
            Self::Stream { inner, .. } => {
                let mut reader = inner.borrow_mut();
                reader.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(data: Bytes) -> Self {
        Self::Shared(data)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Shared(Bytes::from(data))
    }
}

/// A loaded slice of the file.
#[derive(Debug, Clone)]
pub struct Window {
    /// File offset of `data[0]`
    pub start: u64,
    pub data: Bytes,
    /// Whether the window reaches the end of the file
    pub at_eof: bool,
}

impl Window {
    pub fn load(source: &ByteSource, start: u64, len: usize) -> io::Result<Self> {
        let data = source.read_at(start, len)?;
        let at_eof = start + data.len() as u64 >= source.len();
        Ok(Self {
            start,
            data,
            at_eof,
        })
    }
}

/// Run `parse` over a window at `offset`, growing the window while the
/// parse reports [`PdfError::Truncated`].
///
/// The first window is `max(estimate, policy.initial)` bytes.
pub fn with_window<T>(
    source: &ByteSource,
    offset: u64,
    estimate: usize,
    policy: &WindowPolicy,
    mut parse: impl FnMut(&Window) -> Result<T>,
) -> Result<T> {
    let mut len = estimate.max(policy.initial).min(policy.max.max(1));
    loop {
        let window = Window::load(source, offset, len)?;
        match parse(&window) {
            Err(PdfError::Truncated { needed }) => {
                if window.at_eof {
                    return Err(PdfError::malformed(
                        offset as usize,
                        "unexpected end of file",
                    ));
                }
                let Some(next) = policy.grow(len, needed) else {
                    return Err(PdfError::malformed(
                        offset as usize,
                        format!("object larger than the {} byte window limit", policy.max),
                    ));
                };
                debug!(offset, len = next, "window grown");
                len = next;
            }
            other => return other,
        }
    }
}
