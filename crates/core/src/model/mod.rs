//! PDF object model.
//!
//! - `objects` - value types (PdfValue, PdfStream, ObjRef)
//! - `encode` - PDF syntax encoder for values

pub mod encode;
pub mod objects;

// Re-export main types for convenience
pub use encode::{encode_indirect, encode_value, to_bytes};
pub use objects::{ObjRef, PdfDict, PdfStream, PdfValue, dict};
