//! facedeck-client: REST and live subscription client for the recognition appliance.
//!
//! [`ApiClient`] wraps the dashboard REST endpoints, [`Dashboard`] runs the
//! request/render cycle for each view, and [`LiveFeed`] owns the single
//! push subscription that streams recognition events.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod live;
pub mod notify;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::ApiClient;
pub use config::{Config, ConfigError};
pub use dashboard::{Dashboard, HealthStatus, Panel};
pub use error::{ClientError, Result};
pub use live::{EndpointResolver, FeedError, LiveFeed};
pub use notify::{Notice, Notifier};
pub use transport::{Closer, Connector, Subscription, TransportEvent, WsConnector};
