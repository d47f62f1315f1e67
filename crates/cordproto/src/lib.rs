//! cordproto - Discord plumbing for cordrelay
//!
//! This crate owns everything that talks to Discord:
//! - `model` and `ids`: the entities we read, with snowflake ids
//! - `route` and `rest`: outbound REST requests and the HTTP transport
//! - `gateway`: the WebSocket connection that pushes state changes
//! - `governor`: per-route and global rate-limit windows
//! - `cache`: single-writer entity cache with lock-free snapshots
//! - `session`: [`RemoteSession`], which ties the above together
//!
//! The MCP side lives in `cordrelay`; nothing here knows about tools.
//!
//! Both transports are traits so tests can swap in the doubles from the
//! `testing` module (enable the `testing` feature downstream).

pub mod cache;
pub mod error;
pub mod gateway;
pub mod governor;
pub mod ids;
pub mod model;
pub mod rest;
pub mod route;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheSnapshot, CacheUpdate, EntityCache};
pub use error::{GatewayError, RemoteError, TransportError};
pub use gateway::{
    CloseReason, GatewayConnector, GatewayEvent, GatewaySignal, Intents, ResumeInfo, WsGateway,
};
pub use governor::{Admission, RateGovernor, RateWindow, Reservation};
pub use ids::Snowflake;
pub use model::{
    Application, ApplicationCommand, Channel, ChannelKind, Emoji, Guild, Member, Message,
    Reaction, Role, ThreadMetadata, User, Webhook,
};
pub use rest::{HttpRest, RateHeaders, RestResponse, RestTransport};
pub use route::{encode_emoji, Method, RestRequest, RouteKey};
pub use session::{RemoteSession, SessionConfig, SessionState};
