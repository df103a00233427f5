//! PerpSentinel core: an LLM-driven planning/execution orchestrator, an
//! autonomy scan loop, and a trade-contract enforcement layer for a
//! perpetual-futures venue.
//!
//! Only the orchestrator core, the autonomy loop, the trade contract, and
//! the scheduling control plane are implemented here. The LLM backend, the
//! venue client, the persistent store's SQL surface, chat transports, and
//! the dashboard are external collaborators reached through the traits in
//! [`llm`], [`venue`], and [`journal`].

pub mod autonomy;
pub mod cancel;
pub mod config;
pub mod journal;
pub mod limiter;
pub mod llm;
pub mod orchestrator;
pub mod scheduler;
pub mod trade_contract;
pub mod venue;
