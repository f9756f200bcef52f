use crate::protocol::IfIndex;
use std::io;
use std::net::Ipv6Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {ifindex} not found")]
    InterfaceNotFound { ifindex: IfIndex },

    #[error("host unreachable: {dst}")]
    HostUnreachable { dst: Ipv6Addr },

    #[error("network down on interface {ifindex}")]
    NetworkDown { ifindex: IfIndex },

    #[error("no neighbor entry for {dst} and NUD disabled on interface {ifindex}")]
    ResolutionUnavailable { ifindex: IfIndex, dst: Ipv6Addr },

    #[error("neighbor cache exhausted ({limit} entries)")]
    CacheExhausted { limit: usize },

    #[error("ND service has shut down")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
