//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CrawlSource`: Pipeline and seed requests for a sportsbook API
//! - `FetchPort`: Fetch the raw body for a request descriptor
//! - `TransportPort`: Open a bidirectional frame connection
//! - `ChannelProtocol`: Encode subscribe and keepalive frames

mod crawl_source;
mod fetch_port;
mod transport_port;

pub use crawl_source::CrawlSource;
pub use fetch_port::{FetchError, FetchPort};
pub use transport_port::{
    ChannelProtocol, CloseStatus, Connection, FrameSink, FrameStream, InboundFrame,
    TransportError, TransportPort, WireFrame,
};
