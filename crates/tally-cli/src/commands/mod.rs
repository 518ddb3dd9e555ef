//! Command handlers

pub mod queue;
pub mod status;
pub mod sync;
