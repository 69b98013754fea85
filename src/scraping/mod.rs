pub mod balance_stream;
pub mod document;
pub mod parse;

pub use document::{DomChange, Document, PageError};
