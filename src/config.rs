//! Process configuration from the environment.

use std::env;

use anyhow::{Context, Result};

/// Upstream feed endpoint.
pub const UPSTREAM_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Subscription bounding box: SF Bay, [[north-west], [south-east]] corners
/// as [lat, lon]. Compiled in; the coverage area is not runtime-tunable.
pub const BBOX_SF_BAY: [[f64; 2]; 2] = [[38.2, -123.0], [37.2, -121.5]];

#[derive(Debug, Clone)]
pub struct Config {
    pub ais_api_key: String,
    /// Consumed by the chat-assistant sidecar; the pipeline never reads it.
    pub llm_api_key: Option<String>,
    pub listen_addr: String,
}

impl Config {
    /// Missing upstream API key is fatal; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let ais_api_key = env::var("AIS_STREAM_API_KEY")
            .context("AIS_STREAM_API_KEY environment variable not set")?;
        let llm_api_key = env::var("LLM_API_KEY").ok();
        let listen_addr =
            env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        Ok(Self {
            ais_api_key,
            llm_api_key,
            listen_addr,
        })
    }
}
