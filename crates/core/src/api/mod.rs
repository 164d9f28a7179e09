//! Public configuration API.
//!
//! # Example
//!
//! ```ignore
//! use quire_core::api::ReaderBuilder;
//!
//! let reader = ReaderBuilder::new().password("secret").open("document.pdf")?;
//! let catalog = reader.catalog();
//! ```

pub mod options;

pub use crate::document::window::WindowPolicy;
pub use options::{
    DEFAULT_MAX_REFERENCE_DEPTH, PageReadCallback, PasswordCallback, ReaderBuilder, ReaderOptions,
};
