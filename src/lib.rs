//! Conversational memory for a chat assistant.
//!
//! Two kinds of memory are kept per owner (a user id):
//!
//! | Kind | Purpose | Lifetime |
//! |------|---------|----------|
//! | **Long-term** | Facts recalled by semantic similarity | Until the owner is deleted |
//! | **Rolling context** | The last few exchanged lines | Capped, cleared after inactivity |
//!
//! # Architecture
//!
//! - **Local backend**: one JSON document per owner and kind, written atomically
//! - **Remote backend**: a vector database over a single multiplexed WebSocket
//!   RPC connection with correlation ids, deadlines, reconnection and keep-alive
//! - **Ranking**: cosine similarity with an optional minimum-score gate
//! - **Housekeeping**: an inactivity reaper that clears idle rolling context
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: Remote RPC connection, wire format and schema
//! - [`embedding`]: Text-to-vector embedding over HTTP
//! - [`error`]: Typed errors shared by stores and transport
//! - [`memory`]: The store contract, both backends, the reaper and the service facade

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
