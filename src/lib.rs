//! # chunkdex
//!
//! Read, edit and rewrite Android's chunked binary containers: resource tables (ARSC),
//! compiled XML and DEX files.
//!
//! Both formats are trees of length-prefixed blocks whose sizes, counts and offsets depend
//! on everything before them. Edits are made on the typed tree and a refresh recomputes
//! every derived field before the bytes are written back.
//!
//! # Examples
//!
//! ```no_run
//!  use chunkdex::dex::DexLayout;
//!
//!  let bytes = std::fs::read("classes.dex").unwrap();
//!  let mut dex = DexLayout::read(&bytes).unwrap();
//!  dex.sections_mut().get_or_create_string("Hello");
//!  dex.sections_mut().sort_strings();
//!  dex.refresh_full().unwrap();
//!  std::fs::write("classes.dex", dex.to_bytes()).unwrap();
//! ```
//!
//! ```no_run
//!  use chunkdex::chunk::ResourceFile;
//!
//!  let bytes = std::fs::read("resources.arsc").unwrap();
//!  let mut table = ResourceFile::read(&bytes).unwrap();
//!  table.refresh();
//!  println!("{} bytes", table.to_bytes().len());
//! ```

#[macro_use]
pub mod error;
pub mod block;
pub mod chunk;
pub mod config;
pub mod dex;
#[cfg(test)]
mod tests;

pub use error::{BlockError, ErrorKind, Result};
