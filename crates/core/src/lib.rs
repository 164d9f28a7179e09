//! quire - lazy PDF object reader.
//!
//! Resolves the cross-reference chain of a PDF file (classic tables,
//! cross-reference streams, hybrid files and incremental updates), parses
//! objects on demand from a bounded window of the file, expands object
//! streams and decrypts RC4-protected documents.

pub mod api;
pub mod codec;
pub mod document;
pub mod error;
pub mod model;
pub mod parser;

// Re-export the main entry points
pub use api::{ReaderBuilder, ReaderOptions, WindowPolicy};
pub use document::{CrossRefEntry, PdfReader, Trailer};
pub use model::objects::{ObjRef, PdfDict, PdfStream, PdfValue};

// Re-export modules under their short names
pub use codec::arcfour;
pub use codec::filters;
pub use document::security;
pub use document::xref;

pub use error::{PdfError, Result};
