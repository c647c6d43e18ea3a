//! Shared protocol definitions for the `TaskHub` wire format.

pub mod codec;
pub mod hub;
pub mod share;
pub mod task;
