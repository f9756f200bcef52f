//! IPv6 Neighbor Discovery cache (RFC 4861)
//!
//! The engine is sans-IO: it owns the neighbor cache and the tables it
//! depends on, and every operation returns [`NdAction`]s for the caller to
//! carry out. [`crate::service`] drives it from a tokio task.

pub mod action;
pub mod address;
pub mod cache;
mod defrouter;
pub mod engine;
pub mod info;
pub mod interface;
pub mod neighbor;
mod output;
pub mod params;
pub mod prefix_list;
pub mod router_list;
pub mod routing;
mod sweep;
pub mod timer;
pub mod update;

pub use action::{NdAction, RouteChange, UnreachableReason};
pub use address::{AddrFlags, InterfaceAddress};
pub use engine::{FreeOutcome, FreeReason, NdEngine};
pub use info::{InterfaceInfo, NeighborInfo, PrefixInfo, RouterInfo};
pub use interface::{IfFlags, Interface, InterfaceParams};
pub use neighbor::{EntryId, NeighborEntry, NeighborState};
pub use params::NdParams;
pub use prefix_list::Prefix;
pub use router_list::{DefaultRouter, RouterPreference};
pub use routing::{Gateway, Route, RouteFlags, RouteId};
pub use update::{NdMessage, NeighborAdvertisement, NeighborSolicitation};
