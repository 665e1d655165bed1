//! # Knowledge Harness
//!
//! A local-first knowledge lifecycle service: it learns question/answer
//! pairs from users and chat interactions, answers new questions from what
//! it has learned, and keeps an operational index fed from spreadsheets
//! dropped into an inbox, with scheduled backups and retention.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌────────────────────┐
//! │ Ingest / chat│──▶│ KnowledgeStore │──▶│ learned_qa (SQLite)│
//! │ interactions │   │  + JSON files  │   └────────────────────┘
//! └──────────────┘   └────────────────┘
//! ┌──────────────┐   ┌────────────────┐   ┌────────────────────┐
//! │ inbox/*.xlsx │──▶│ SpreadsheetLdr │──▶│ operations (SQLite)│
//! └──────────────┘   └────────────────┘   └────────────────────┘
//!                 Scheduler: daily ingestion, hourly learning,
//!                 weekly export + retention
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kh init
//! kh ingest pairs.json
//! kh answer "What was Q3 revenue?"
//! kh load ./inbox/report.xlsx
//! kh run                         # start the scheduler
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed library errors |
//! | [`models`] | Core data types |
//! | [`classify`] | Keyword categories and fiscal periods |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait, SQLite and in-memory backends |
//! | [`persist`] | JSON persistence of learned pairs |
//! | [`knowledge`] | Ingest, search, and answer learned knowledge |
//! | [`interactions`] | Chat interaction capture log |
//! | [`spreadsheet`] | Workbook and CSV reading, inbox discovery |
//! | [`loader`] | Batched spreadsheet loading into the index |
//! | [`backup`] | Snapshots, archives, exports, retention |
//! | [`scheduler`] | Timed jobs and their bodies |
//! | [`stats`] | Learning statistics |
//! | [`export`] | Knowledge export document |
//! | [`app`] | Wiring everything from a config |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod backup;
pub mod classify;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod index;
pub mod interactions;
pub mod knowledge;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod persist;
pub mod scheduler;
pub mod spreadsheet;
pub mod stats;
