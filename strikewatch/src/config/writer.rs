//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let client_id = config.broker.client_id.as_deref().unwrap_or("");
    let server_stats = if config.feed.server_stats {
        "true"
    } else {
        "false"
    };

    format!(
        r#"[region]
; Centre of the watched area in decimal degrees
latitude = {}
longitude = {}
; Strikes farther than this from the centre are ignored
radius_km = {}

[broker]
host = {}
port = {}
; Keep-alive interval (seconds); the session is dropped after 1.5x with no traffic
keepalive_secs = {}
; Leave empty to generate one per run
client_id = {}

[feed]
; Topic prefix strike messages are published under
strike_namespace = {}
; Topic announcing new releases
hello_topic = {}
; Subscribe to broker $SYS statistics
server_stats = {}

[tracking]
; Minutes without a strike before the area counts as inactive (0 disables)
idle_reset_minutes = {}
; Nearby strikes kept as markers (0 disables tracking)
max_tracked = {}
; Minutes a marker lives after its strike
time_window_minutes = {}
; Seconds between expiry sweeps
tick_interval_secs = {}
"#,
        config.region.latitude,
        config.region.longitude,
        config.region.radius_km,
        config.broker.host,
        config.broker.port,
        config.broker.keepalive_secs,
        client_id,
        config.feed.strike_namespace,
        config.feed.hello_topic,
        server_stats,
        config.tracking.idle_reset_minutes,
        config.tracking.max_tracked,
        config.tracking.time_window_minutes,
        config.tracking.tick_interval_secs,
    )
}
