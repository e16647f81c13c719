//! # corral-cell
//!
//! The Corral cell agent. One instance runs per worker host and:
//!
//! - converges the local container population (executor) with the desired
//!   state recorded in the BBS, through a per-identity serialized operation
//!   queue fed by a periodic bulker and a push event consumer;
//! - represents the cell in auctions, reporting state and accepting
//!   bid-allocation batches;
//! - maintains the cell's presence in the coordination store under a lease;
//! - drains work gracefully on evacuation.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod auction;
pub mod clients;
pub mod config;
pub mod delegate;
pub mod evacuation;
pub mod harmonizer;
pub mod metrics;
pub mod operations;
pub mod presence;
pub mod processors;
pub mod routes;
pub mod server;
pub mod supervisor;
