//! Build-time cache weaving for compiled modules.
//!
//! A module is read from text (or YAML/JSON), the [`weaver`] rewrites every
//! member marked for caching so that it consults a cache provider before
//! running its original body, and the [`runtime`] interpreter can execute
//! the result against any [`weave_cache::CacheProvider`].

pub mod cli;
pub mod config;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod runtime;
pub mod utils;
pub mod version;
pub mod weaver;

pub use config::WeaveConfig;
pub use weaver::{WeaveError, WeaveReport, Weaver};
