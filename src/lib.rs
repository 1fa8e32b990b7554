//! Live AIS monitoring: ingest the aisstream.io feed for the SF Bay bounding
//! box, track per-vessel state and trajectory history, flag movement
//! anomalies, and stream enriched history points to WebSocket subscribers.

pub mod ais;
pub mod anomaly;
pub mod circle;
pub mod config;
pub mod dispatch;
pub mod enrich;
pub mod hub;
pub mod lookup;
pub mod server;
pub mod store;
pub mod stream;
