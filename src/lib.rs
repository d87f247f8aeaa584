//! Ring-buffer fan-out streaming server
//!
//! A lightweight real-time media/message streaming server. Publishers
//! deposit framed slots into per-track ring buffers; subscribers follow
//! with private cursors and shed load by skipping ahead when they fall
//! behind. Streams are grouped as channel → source → track, admitted
//! through a per-channel stream key, and carried over WebSocket, raw TCP
//! (optionally TLS) or UDP using the RSSP framing.
//!
//! # Architecture
//!
//! - [`media`]: slots, ring buffers, tracks and sources (the data plane)
//! - [`registry`]: channels, sessions, bridges and the studio singleton
//! - [`protocol`]: the RSSP wire codec (TCP prefix, UDP suffix, REXT)
//! - [`flow`]: the publisher/subscriber loops shared by every transport
//! - [`server`]: the WebSocket/TCP/UDP endpoints
//! - [`client`]: outbound bridge dialers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rssp_rs::registry::{Limits, Studio};
//! use rssp_rs::server::{run_http_server, AppState, ServerConfig};
//!
//! # async fn example() -> rssp_rs::error::Result<()> {
//! let config = Arc::new(ServerConfig::default());
//! let studio = Arc::new(Studio::new("studio", Limits::default()));
//! studio.load_channels(config.channels_path())?;
//!
//! run_http_server(AppState { studio, config }).await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod flow;
pub mod id;
pub mod media;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod server;
pub mod transport;

pub use error::{Error, Result};
