//! Long-form conversational memory engine.
//!
//! `mnemon` sits between a chat client and an external LLM provider and,
//! across tens of thousands of dialogue turns, selectively remembers
//! information worth recalling later. Four subsystems cooperate per turn:
//!
//! - [`extract`] mines durable facts from each turn (LLM extraction,
//!   canonicalization, near-duplicate rejection);
//! - [`store`] persists memories in an authoritative SQLite row store and
//!   mirrors embeddings into a derived in-process vector [`index`];
//! - [`retrieve`] scores, tiers, and selects the top-K memories per query
//!   with adaptive weight profiles and a silence verdict;
//! - [`orchestrate`] composes retrieval, prompt assembly, generation, turn
//!   persistence, and the detached write path under strict ordering rules.
//!
//! The [`lifecycle`] worker runs out-of-band: TTL expiry, decay refresh,
//! consolidation, and conflict resolution never touch the request path.

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod lifecycle;
pub mod logging;
pub mod orchestrate;
pub mod providers;
pub mod retrieve;
pub mod store;
