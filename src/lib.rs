//! # luastructs - Wireshark Lua dissectors from C structs
//!
//! Parses C struct declarations (after `cpp`), applies per-struct rules from
//! YAML files and generates Lua dissectors that walk each struct's memory
//! layout on one or more target platforms.
//!
//! ## Pipeline
//!
//! - **Options & rules**: YAML documents with an `Options` section (run
//!   settings, preprocessor flags) and a `Structs` list (ids, enums, ranges,
//!   bitstrings, custom fields, trailers, conformance files)
//! - **C parser**: a pest grammar over preprocessed C, honouring line markers
//! - **Builder**: one [`Protocol`] per struct or union, one [`Dissector`] per platform
//! - **Codegen**: `ProtoField` definitions, aligned decode statements,
//!   trailer dispatch and the top-level [`Delegator`]
//!
//! ## Example rules
//!
//! ```text
//! Options:
//!     platforms: [Linux-x86-64, Win32]
//! Structs:
//!   - name: packet
//!     id: [10, 11]
//!     enums:
//!       - member: kind
//!         values: {0: DATA, 1: ACK}
//!     ranges:
//!       - member: ttl
//!         min: 1
//!         max: 64
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use luastructs::{ConfigSet, Generator, Options};
//! use std::path::{Path, PathBuf};
//!
//! let mut options = Options::default();
//! let mut configs = ConfigSet::new();
//! configs.load_file(Path::new("rules.yml"), &mut options)?;
//! let mut generator = Generator::new(options, configs)?;
//! generator.run(&[PathBuf::from("include")])?;
//! let files = generator.generate();
//! generator.write(&files)?;
//! # Ok::<(), luastructs::Error>(())
//! ```

pub mod ast;
pub mod builder;
pub mod config;
pub mod conformance;
pub mod cpp;
pub mod delegator;
pub mod dissector;
pub mod driver;
pub mod error;
pub mod field;
pub mod options;
pub mod parser;
pub mod placeholders;
pub mod platform;
pub mod preview;
pub mod rules;
pub mod value;

pub use builder::find_structs;
pub use config::{Config, ConfigSet};
pub use conformance::ConformanceFile;
pub use delegator::Delegator;
pub use dissector::{padding, Dissector, Layout, Protocol, ProtocolRegistry};
pub use driver::{Generator, OutputFile, Summary};
pub use error::{ConfigError, Error, ParseError};
pub use field::{Field, FieldNode, WireType};
pub use options::Options;
pub use parser::parse;
pub use platform::{Endian, Platform};
pub use preview::{preview, Decoded, PreviewError};
pub use rules::Rule;
pub use value::Value;
