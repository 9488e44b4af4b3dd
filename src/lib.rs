//! speedbeacon -- LAN throughput benchmark with broadcast server discovery.
//!
//! A reflector (server) advertises its transfer ports with a periodic
//! broadcast Offer.  A client waits for one Offer, then runs any number of
//! concurrent TCP and UDP transfer sessions against it and reports per-session
//! throughput and, for UDP, delivery percentage.

pub mod config;
pub mod discovery;
pub mod reflector;
pub mod throughput;
pub mod wire;

pub use config::BeaconConfig;
pub use discovery::Offer;
pub use throughput::orchestrator::{RunParams, RunReport};
