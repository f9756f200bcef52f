//! ndcache - IPv6 Neighbor Discovery cache
//!
//! Address resolution, neighbor unreachability detection, default router
//! selection and prefix on-link tracking for IPv6 hosts and routers, as a
//! sans-IO engine ([`nd::NdEngine`]) plus a tokio service around it.

pub mod config;
pub mod error;
pub mod nd;
pub mod protocol;
pub mod service;
pub mod telemetry;

pub use error::{Error, Result};
