//! # Runbook Harness
//!
//! Cross-source retrieval of runbooks and operational documentation for
//! automated incident response.
//!
//! Every configured source (a local documentation tree, a JSON
//! documentation API, or a custom in-process adapter) is queried in
//! parallel behind its own rate limiter and circuit breaker. Each source
//! ranks its documents with a three-stage fuzzy search and a capped,
//! multi-factor confidence score; the registry merges the survivors.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌────────────────┐
//!   CLI (rbh) ──────▶│ SourceRegistry │◀────── HTTP (axum)
//!                    └───────┬────────┘
//!              join_all      │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!   ┌────────────┐    ┌────────────┐    ┌────────────┐
//!   │ filesystem │    │    http    │    │   custom   │
//!   └─────┬──────┘    └─────┬──────┘    └─────┬──────┘
//!         └── SourceGuard ──┴── CacheStore ───┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Results, filters, alerts, health records |
//! | [`error`] | Typed source and registry errors |
//! | [`traits`] | The [`SourceAdapter`](traits::SourceAdapter) contract |
//! | [`registry`] | Fan-out and merge across sources |
//! | [`fuzzy`] | Token-weighted fuzzy index |
//! | [`search`] | Staged search and query variations |
//! | [`confidence`] | Confidence factors and scoring |
//! | [`runbook`] | Runbook validation, synthesis, and relevance |
//! | [`rate_limit`] | Adaptive rate limiter |
//! | [`circuit`] | Circuit breaker |
//! | [`guard`] | Breaker, limiter, and timeout composed per source |
//! | [`cache`] | Content-aware cache |
//! | [`extract`] | Text and JSON extraction into documents |
//! | [`source_fs`] | Local documentation tree source |
//! | [`source_http`] | JSON documentation API source |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command output |

pub mod cache;
pub mod circuit;
pub mod commands;
pub mod confidence;
pub mod config;
pub mod error;
pub mod extract;
pub mod fuzzy;
pub mod guard;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod runbook;
pub mod search;
pub mod server;
pub mod source_fs;
pub mod source_http;
pub mod traits;
