//! User configuration stored in `~/.strikewatch/config.ini`.
//!
//! [`ConfigFile`] is loaded with [`ConfigFile::load_from`] and converted into
//! the runtime objects the rest of the crate consumes:
//!
//! ```
//! use strikewatch::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let coordinator = config.coordinator_config();
//! assert_eq!(coordinator.strike_namespace, "blitzortung/1.1");
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    BrokerSettings, ConfigFile, FeedSettings, RegionSettings, TrackingSettings,
    DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_IDLE_RESET_MINUTES, DEFAULT_KEEPALIVE_SECS,
    DEFAULT_MAX_TRACKED, DEFAULT_RADIUS_KM, DEFAULT_TICK_INTERVAL_SECS,
    DEFAULT_TIME_WINDOW_MINUTES,
};
