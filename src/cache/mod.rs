//! Cache engine internals: tiers, coordination, invalidation, maintenance

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod index;
pub mod key;
pub mod maintainer;
pub mod tier;
pub mod warmer;
