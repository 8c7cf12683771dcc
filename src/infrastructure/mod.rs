pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod persistent_store;
pub mod storage;
pub mod youtube_client;
