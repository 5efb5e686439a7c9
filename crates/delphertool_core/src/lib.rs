pub mod collect;
pub mod config;
pub mod editor;
pub mod error;
pub mod mediawiki;
pub mod observability;
pub mod runner;
pub mod slice;
pub mod status;
pub mod table;
pub mod urn;
pub mod wikitext;
pub mod worklist;

#[cfg(test)]
mod test_support;

pub use error::{ConfigError, Error, RemoteError, Result, ValidationError};
