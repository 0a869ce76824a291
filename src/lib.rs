//! # Tabular RAG
//!
//! Answers natural-language questions over uploaded spreadsheet rows.
//!
//! Each uploaded row is embedded and stored as a [`models::DocumentRecord`].
//! A chat message then flows through a linear pipeline: intent extraction,
//! hybrid (vector + fuzzy) retrieval, intent-aware post-processing, prompt
//! assembly, and a single generation call.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Intent  │──▶│  Hybrid  │──▶│    Post-     │──▶│   Prompt    │──▶│ Generation │
//! │ Extractor│   │ Retriever│   │  processor   │   │  Assembler  │   │   Client   │
//! └──────────┘   └────┬─────┘   └──────────────┘   └─────────────┘   └────────────┘
//!                     │
//!           ┌─────────┴─────────┐
//!           ▼                   ▼
//!     ┌──────────┐        ┌──────────┐
//!     │ Embedding│        │ Document │
//!     │  Client  │        │  Store   │
//!     └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trag init                          # open the vector store
//! trag embed ./uploads/produk.json   # embed an uploaded file
//! trag search "laptop gaming"        # hybrid search
//! trag chat "5 laptop termahal"      # full RAG answer
//! trag serve                         # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed, caller-visible error codes |
//! | [`models`] | Records, metadata values, search results |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Chat model abstraction |
//! | [`store`] | Document store trait plus SQLite and in-memory backends |
//! | [`ingest`] | Column classification, bulk embed, delete by file |
//! | [`intent`] | Rule-based + LLM intent extraction |
//! | [`search`] | Vector, fuzzy and hybrid retrieval |
//! | [`postprocess`] | Superlative sorting and budget filtering |
//! | [`prompt`] | Context rendering and system prompt templates |
//! | [`rag`] | Per-request orchestration |
//! | [`server`] | HTTP API |

pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod intent;
pub mod models;
pub mod postprocess;
pub mod prompt;
pub mod rag;
pub mod search;
pub mod server;
pub mod store;
