//! handoff - session routing and presence engine for live visitor chat
//!
//! This crate provides the core functionality for handoff, including:
//! - Session and presence tracking for visitors and attendants
//! - Ownership arbitration and role-filtered session lists
//! - Write-behind persistence to a pluggable session store
//! - The client-server protocol and TCP server
//!
//! # Architecture
//!
//! handoff runs a single engine task that owns all routing state:
//! - Connection tasks decode frames, do any store reads, and forward commands
//! - The engine applies each command atomically and broadcasts the result
//! - Store writes are queued per session and applied in the background

pub mod assistant;
pub mod auth;
pub mod config;
pub mod engine;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
