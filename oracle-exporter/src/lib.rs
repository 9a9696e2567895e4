//! Prometheus exporter for Oracle Database.
//!
//! Each poll of the metrics endpoint opens a connection, checks that the
//! instance answers, runs the enabled probes against it and renders the
//! resulting samples together with the exporter's own metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌──────────┐
//! │ HTTP Server │────>│  Collector  │────>│   Scraper   │────>│  Probes  │
//! │ (/metrics)  │     │ (self-stats)│     │ (liveness)  │     │ (decode) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────────┘
//!                                                 │
//!                                                 v
//!                                          Oracle Database
//! ```
//!
//! # Usage
//!
//! ```bash
//! DATA_SOURCE_NAME=system/oracle@localhost:1521/XEPDB1 \
//!     oracle-exporter --config oracle-exporter.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod exposition;
pub mod http;
pub mod metric;
pub mod probe;
pub mod probes;
pub mod registry;
pub mod scrape;

pub use collector::{OracleCollector, SharedCollector};
pub use config::ExporterConfig;
pub use http::HttpServer;
