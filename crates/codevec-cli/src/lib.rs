//! codevec CLI - Loader, dumper and query runner
//!
//! Each command is a short-lived session against one collection. The
//! commands take a [`VectorStore`] and an [`EmbeddingClient`] so they can
//! run against the HTTP server or the in-memory store alike, and write
//! their user-facing output to any [`std::io::Write`].
//!
//! Author: hephaex@gmail.com

pub mod dump;
pub mod load;
pub mod query;
pub mod render;

pub use dump::dump_collection;
pub use load::{load_file, read_chunks, LoadReport, Loader};
pub use query::{run_queries, QueryKind, QueryMode, QueryOutcome, QueryRunner};

#[doc(no_inline)]
pub use codevec_vector::{EmbeddingClient, VectorStore};
