//! # Ticket Harness
//!
//! Local-first retrieval over support tickets. Ticket exports are split
//! into typed fragments (summary, resolution, remediation steps, ...),
//! stored in SQLite with optional embeddings, and ranked with hybrid
//! BM25 + cosine search fused by Reciprocal Rank Fusion. The best
//! fragments are assembled into a context block that can be handed to a
//! text-generation model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Exports      │──▶│  Ingest      │──▶│  SQLite  │
//! │ JSON/XLSX/.. │   │ Split+Embed  │   │ fragments│
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │
//!                         ticket-harness-core│ (BM25 + dense + RRF)
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │  (tkt)   │         │  server  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tkt init                          # create database
//! tkt ingest exports/jira.xlsx      # load tickets
//! tkt search "vpn drops" --explain  # ranked fragments
//! tkt context "vpn drops"           # context block
//! tkt ask "how do I fix vpn drops?" # generated answer
//! tkt serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite fragment store |
//! | [`extract`] | `.docx` / `.xlsx` text extraction |
//! | [`ingest`] | Ticket export ingestion |
//! | [`embedding`] | Embedding providers |
//! | [`search`] | `search` / `context` commands |
//! | [`generate`] | Answer generation |
//! | [`ask`] | `ask` command |
//! | [`stats`] | Store statistics |
//! | [`server`] | JSON HTTP server |

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
