//! # trackerconf - LoRa APRS Tracker Configuration
//!
//! Reads, edits, validates and writes back the settings of a LoRa APRS tracker
//! over its USB serial console or its Wi-Fi admin page.
//!
//! ## Features
//!
//! - **Typed Settings**: The tracker's JSON document as plain serde structs with
//!   the device's exact field names.
//! - **Schema Validation**: One static field table drives range checks, the HTTP
//!   form encoder and the CLI listing.
//! - **Two Links**: Serial opcode protocol (`g` / `s<json>`) and the HTTP admin
//!   page (`/configuration.json`, form post, `/status` polling).
//! - **Local Cache**: The last valid settings survive restarts; rapid edits are
//!   debounced into a single write.
//! - **Backups**: Export and transactional import of the settings document.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trackerconf::config::Config;
//! use trackerconf::store::{cache::FileCache, SettingsStore};
//! use trackerconf::sync::SyncController;
//! use trackerconf::transport::serial::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("trackerconf.toml").await?;
//!     let store = SettingsStore::open(
//!         config.schema(),
//!         Box::new(FileCache::new(&config.cache.dir)),
//!         config.debounce(),
//!     );
//!     let transport = SerialTransport::new(&config.device.port, config.device.baud_rate);
//!     let mut sync = SyncController::new(Box::new(transport), store, config.sync_options());
//!
//!     sync.connect().await?;
//!     sync.store_mut().update(|s| s.lora.power = 17);
//!     sync.save_current().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`settings`] - settings model and validation schema
//! - [`codec`] - serial and HTTP wire formats
//! - [`store`] - in-memory settings with validity, dirty tracking and cache
//! - [`sync`] - connection lifecycle, save and acknowledgment
//! - [`transport`] - serial, HTTP and scripted links
//! - [`config`] - tool configuration file
//! - [`error`] - error types
//! - [`logutil`] - log formatting helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Sync Controller │ ← lifecycle, save / ack
//! └─────────────────┘
//!     │         │
//! ┌───────┐ ┌───────────┐
//! │ Store │ │ Transport │ ← serial / HTTP
//! └───────┘ └───────────┘
//!     │         │
//! ┌───────┐ ┌───────────┐
//! │ Cache │ │   Codec   │
//! └───────┘ └───────────┘
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod logutil;
pub mod settings;
pub mod store;
pub mod sync;
pub mod transport;

pub use error::{ProtocolError, SyncError, TransportError};
pub use settings::Settings;
