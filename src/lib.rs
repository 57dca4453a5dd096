//! Realty Watch: real-estate signal extraction from a messaging account.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod platform;
pub mod scan;
pub mod session;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;
