//! PDF document module - cross references, object resolution, security.
//!
//! This module contains:
//! - `reader` - lazy object resolution (PdfReader)
//! - `xref` - trailer chain and cross-reference tables
//! - `objstm` - object stream containers
//! - `security` - standard security handler (RC4)
//! - `window` - windowed file access
//! - `pages` - page-tree walk

pub mod objstm;
pub mod pages;
pub mod reader;
pub mod security;
pub mod window;
pub mod xref;

// Re-export main types for convenience
pub use objstm::ObjectStreamDecoder;
pub use pages::Page;
pub use reader::PdfReader;
pub use security::{
    EncryptionState, PASSWORD_PADDING, Permissions, SecurityHandler, StandardSecurityHandler,
};
pub use window::{ByteSource, Window, WindowPolicy};
pub use xref::{CrossRefEntry, SectionKind, Trailer, XRefResolver, XRefSection, XRefTable};
