pub mod aprs_is;
pub mod battery;
pub mod beacon;
pub mod config;
pub mod dedup;
pub mod digipeat;
pub mod frame;
pub mod gateway;
pub mod log_format;
pub mod metrics;
pub mod radio;
pub mod relay;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aprs_is::{AprsIsConfig, AprsIsConfigBuilder, Session, SessionError, SessionState};
pub use config::GatewayConfig;
pub use dedup::DuplicateSuppressor;
pub use frame::{Frame, PathElement};
pub use gateway::Gateway;
pub use relay::{RelayEngine, RelaySettings, RelayStats};
