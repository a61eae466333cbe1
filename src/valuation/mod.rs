//! Valuation engine - multi-source price consensus and comparable-based
//! valuation for residential property

pub mod audit;
pub mod cache;
pub mod comps;
pub mod config;
pub mod consensus;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod sanitize;
pub mod types;

pub use types::*;
