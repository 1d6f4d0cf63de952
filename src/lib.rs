//! # docrag
//!
//! Documentation ingestion and semantic retrieval for AI agents.
//!
//! docrag crawls documentation websites and reads local files, splits
//! the text into overlapping chunks, embeds them through a remote
//! embedding service, stores everything in a PostgREST-backed vector
//! store, and answers natural-language queries by similarity search.
//! The whole surface is exposed twice over the same tool layer: as a
//! CLI and as an HTTP tool server for agent integration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Sources    │──▶│   Pipeline   │──▶│   PostgREST   │
//! │ Web / Files  │   │ Chunk+Embed  │   │ pgvector      │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │
//!                           ┌──────────────────┤
//!                           ▼                  ▼
//!                     ┌──────────┐       ┌──────────┐
//!                     │   CLI    │       │   HTTP   │
//!                     │ (docrag) │       │  tools   │
//!                     └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrag ingest ./docs --batch-size 10   # local files, resumable
//! docrag crawl https://docs.example.com/sitemap.xml
//! docrag query "how do I configure retries"
//! docrag serve                           # HTTP tool server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text chunking |
//! | [`discover`] | Local file discovery |
//! | [`crawler`] | Web crawling and text extraction |
//! | [`embedding`] | Remote embedding client with token handling |
//! | [`storage`] | PostgREST storage gateway |
//! | [`registry`] | Source registry upserts |
//! | [`ingest`] | Ingestion pipeline and batch reports |
//! | [`query`] | Similarity search |
//! | [`tools`] | Agent tool surface |
//! | [`server`] | HTTP tool server |

pub mod chunk;
pub mod config;
pub mod crawler;
pub mod discover;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod query;
pub mod registry;
pub mod server;
pub mod storage;
pub mod tools;
