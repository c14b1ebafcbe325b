//! # Ticket Harness Core
//!
//! Hybrid retrieval over ticket fragments: BM25 lexical scoring, cosine
//! similarity over stored embeddings, Reciprocal Rank Fusion, and
//! priority-ordered context assembly for answer generation.
//!
//! This crate holds no database, HTTP or filesystem code. Callers supply
//! fragments through [`source::FragmentSource`] and, optionally, a query
//! embedder through [`embedding::Embedder`].
//!
//! ```rust
//! use ticket_harness_core::models::{Fragment, FragmentKind};
//! use ticket_harness_core::search::{rank_snapshot, SearchParams};
//! use ticket_harness_core::context::build_context;
//!
//! let snapshot = vec![
//!     Fragment::new("T1", FragmentKind::Summary, "login fails"),
//!     Fragment::new("T1", FragmentKind::Resolution, "restart service"),
//!     Fragment::new("T2", FragmentKind::Summary, "login fails after update"),
//! ];
//! let ranked = rank_snapshot(&snapshot, "login fails", None, &SearchParams::default());
//! assert_eq!(ranked.results[0].fragment_id, "T1-summary");
//!
//! let context = build_context(&ranked.results, 1);
//! assert!(context.starts_with("Ticket: T1\nSection: resolution"));
//! ```

pub mod context;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod lexical;
pub mod models;
pub mod search;
pub mod source;

pub use error::{Result, RetrievalError};
