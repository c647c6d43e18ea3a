//! `TaskHub` server library.
//!
//! The collaboration engine behind the hub: group membership, event
//! fan-out, the task mutation pipeline, the public share lifecycle and the
//! reminder scanner, plus the axum transport that exposes them. Exposed as a
//! library for tests and embedding.

pub mod activity;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod groups;
pub mod hub;
pub mod identity;
pub mod reminders;
pub mod share;
pub mod store;
pub mod tasks;
