//! Run command - watch the live feed around the configured region.

use std::path::{Path, PathBuf};

use clap::Args;
use strikewatch::config::{config_file_path, ConfigFile};
use strikewatch::logging::{default_log_dir, default_log_file, init_logging};
use strikewatch::pubsub::{ConnectionState, TcpTransport};
use strikewatch::strike::{BrokerStat, StrikeCoordinator, StrikeEvent, VersionAnnouncement};
use strikewatch::window::{MarkerEvent, NearbyStrikeTracker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Config file to read (default: ~/.strikewatch/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the region latitude
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Override the region longitude
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Override the region radius in kilometres
    #[arg(long)]
    pub radius: Option<f64>,

    /// Override the broker host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the broker port
    #[arg(long)]
    pub port: Option<u16>,
}

/// Run the watch loop until Ctrl-C.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let path = args.config.clone().unwrap_or_else(config_file_path);
    let config = load_config(&path, &args)?;

    let _logging_guard = init_logging(default_log_dir(), default_log_file())
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;
    tracing::info!(config = %path.display(), "Loaded configuration");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    runtime.block_on(watch(config, shutdown))
}

/// Load the config file and apply command-line overrides.
fn load_config(path: &Path, args: &RunArgs) -> Result<ConfigFile, CliError> {
    let mut config = ConfigFile::load_from(path)?;

    if let Some(lat) = args.lat {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CliError::InvalidArgument(format!(
                "latitude must be between -90 and 90, got {}",
                lat
            )));
        }
        config.region.latitude = lat;
    }
    if let Some(lon) = args.lon {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CliError::InvalidArgument(format!(
                "longitude must be between -180 and 180, got {}",
                lon
            )));
        }
        config.region.longitude = lon;
    }
    if let Some(radius) = args.radius {
        if radius.is_nan() || radius < 0.0 {
            return Err(CliError::InvalidArgument(format!(
                "radius must be a non-negative number of kilometres, got {}",
                radius
            )));
        }
        config.region.radius_km = radius;
    }
    if let Some(host) = &args.host {
        config.broker.host = host.clone();
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }

    Ok(config)
}

async fn watch(config: ConfigFile, shutdown: CancellationToken) -> Result<(), CliError> {
    let broker = config.broker_config();
    tracing::info!(
        broker = %broker.address(),
        client_id = %broker.client_id,
        region = %config.region(),
        "Starting strikewatch"
    );

    let coordinator = StrikeCoordinator::new(
        config.coordinator_config(),
        TcpTransport::new(broker),
        config.client_options(),
    )?;
    for topic in coordinator.topics() {
        tracing::info!(topic = %topic, "Watching");
    }

    coordinator.register_listener(|strike: &StrikeEvent| {
        tracing::info!(
            time = %strike.time,
            latitude = strike.latitude,
            longitude = strike.longitude,
            distance_km = strike.distance_km,
            azimuth = strike.azimuth_degrees,
            "Lightning strike"
        );
    });
    coordinator.register_version_listener(|announcement: &VersionAnnouncement| {
        tracing::info!(
            version = %announcement.version,
            title = %announcement.title,
            "{}",
            announcement.message
        );
    });
    coordinator.register_connection_listener(|state: ConnectionState| {
        tracing::info!(state = %state, "Broker connection changed");
    });
    if config.feed.server_stats {
        coordinator.register_stat_listener(|stat: &BrokerStat| {
            tracing::info!(key = %stat.key, value = %stat.value, "Broker statistic");
        });
    }

    let markers = config.tracker_config().map(|tracker_config| {
        let (tracker, events) = NearbyStrikeTracker::channel(tracker_config);
        coordinator.register_listener(tracker);
        tokio::spawn(log_markers(events))
    });

    if let Err(e) = coordinator.connect().await {
        tracing::warn!(error = %e, "Initial connection failed, retrying in the background");
    }

    shutdown.cancelled().await;
    tracing::info!("Shutting down");

    let diagnostics = coordinator.diagnostics();
    tracing::info!(
        accepted = diagnostics.accepted,
        rejected = diagnostics.rejected,
        malformed = diagnostics.malformed,
        "Session summary"
    );

    coordinator.disconnect().await;
    // The tracker is dropped with the coordinator worker, closing its channel
    if let Some(markers) = markers {
        if let Err(e) = markers.await {
            tracing::warn!(error = %e, "Marker logger ended abnormally");
        }
    }

    Ok(())
}

async fn log_markers(mut events: mpsc::UnboundedReceiver<MarkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MarkerEvent::Added(record) => tracing::info!(
                id = %record.id,
                distance_km = record.event.distance_km,
                azimuth = record.event.azimuth_degrees,
                "Marker added"
            ),
            MarkerEvent::Removed(record) => {
                tracing::info!(id = %record.id, time = %record.event.time, "Marker removed")
            }
        }
    }
}
