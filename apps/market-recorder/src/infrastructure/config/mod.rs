//! Configuration Module
//!
//! Configuration loading for the recorder.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DB_PATH, DEFAULT_ENDPOINT, DEFAULT_MARKET,
    DEFAULT_REALM, RecorderConfig, TransportSettings,
};
