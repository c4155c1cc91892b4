//! # Sustainacore Ask
//!
//! The retrieval and answer orchestration core behind Sustainacore's
//! `/ask2` endpoint.
//!
//! Given an ESG question, the pipeline classifies intent, plans a
//! multi-variant retrieval, runs metadata-filtered vector search against the
//! candidate store, fuses the results into a bounded, deduplicated fact
//! list, and composes a cited answer — degrading gracefully whenever the
//! optional generation service is unavailable.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  POST /ask2 ──▶ │ Orchestrator │──▶ small talk? ──▶ short response
//!                 └──────┬───────┘
//!                        ▼
//!                 ┌──────────────┐   ┌───────────────┐   ┌─────────┐
//!                 │   Planner    │──▶│ Store Adapter │──▶│  Fusion  │
//!                 │ scope+variants│  │  ×K variants  │   │ dedup+cap│
//!                 └──────────────┘   └───────────────┘   └────┬─────┘
//!                                                             ▼
//!                                                       ┌──────────┐
//!                                                       │ Composer │
//!                                                       │ citations│
//!                                                       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`errors`] | Request-path failure taxonomy |
//! | [`intent`] | Small-talk vs. information-request routing |
//! | [`planner`] | Scope filters and query-variant planning |
//! | [`embedding`] | Query-embedding providers and vector utilities |
//! | [`store`] | Metadata-filtered vector KNN over the document table |
//! | [`fuse`] | Dedup, diversification, and cap enforcement |
//! | [`compose`] | Floor gating, narrative, and citation management |
//! | [`generation`] | Bounded chat-completion client |
//! | [`orchestrate`] | Request lifecycle, budgets, degradation |
//! | [`ratelimit`] | Per-client sliding-window rate limiter |
//! | [`server`] | Axum HTTP service |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod compose;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod fuse;
pub mod generation;
pub mod intent;
pub mod migrate;
pub mod models;
pub mod orchestrate;
pub mod planner;
pub mod ratelimit;
pub mod server;
pub mod store;
