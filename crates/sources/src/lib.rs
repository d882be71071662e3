//! Reference resolution for OpenAPI documents.
//!
//! [`load_and_resolve`] reads a root document and rewrites every `$ref`
//! in place, loading external files through a path-safety gate
//! ([`Fetcher`]) and promoting the schemas, parameters, request bodies,
//! and responses used from those files into the root document's
//! `components` namespace.
//!
//! Resolution is synchronous and single-threaded: the file cache, the
//! in-flight reference set, and the visited-node set are owned by one
//! call and never shared. Callers wanting to resolve several documents
//! in parallel simply issue independent calls.

mod fetch;
mod promote;
mod resolve;

pub use fetch::{Fetcher, MAX_FILE_SIZE};
pub use resolve::{load_and_resolve, resolve_references};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("resolved path {path} escapes every configured search root")]
    Escapes { path: String },
    #[error("reference '{reference}' does not name an existing file under any search root")]
    NotFound { reference: String },
    #[error("{path} is not a regular file")]
    NotRegular { path: String },
    #[error("{path} does not carry an allowed extension (.yaml, .yml, .json)")]
    Extension { path: String },
    #[error("{path} is {size} bytes, over the {limit} byte limit", limit = MAX_FILE_SIZE)]
    TooLarge { path: String, size: u64 },
    #[error("a $ref of {file} is empty")]
    EmptyReference { file: String },
    #[error("pointer '{pointer}' is not present in {file}")]
    PointerNotFound { file: String, pointer: String },
    #[error("reference '{reference}' resolved to a non-mapping value")]
    NotAMapping { reference: String },
    #[error(transparent)]
    Document(#[from] doc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
