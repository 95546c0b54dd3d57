//! Cover command - show the subscriptions for a region.

use clap::Args;
use strikewatch::geohash::{coverage, search_box, GeohashCover};
use strikewatch::strike::{strike_topic, DEFAULT_STRIKE_NAMESPACE};

use crate::error::CliError;

/// Arguments for the cover command.
#[derive(Debug, Args)]
pub struct CoverArgs {
    /// Latitude of the region centre in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude of the region centre in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Region radius in kilometres
    #[arg(long, default_value = "100")]
    pub radius: f64,

    /// Topic prefix strikes are published under
    #[arg(long, default_value = DEFAULT_STRIKE_NAMESPACE)]
    pub namespace: String,
}

/// Run the cover command.
pub fn run(args: CoverArgs) -> Result<(), CliError> {
    if args.radius.is_nan() || args.radius < 0.0 {
        return Err(CliError::InvalidArgument(format!(
            "radius must be a non-negative number of kilometres, got {}",
            args.radius
        )));
    }

    let cover = coverage(args.lat, args.lon, args.radius)?;
    let bbox = search_box(args.lat, args.lon, args.radius);

    println!("Region:");
    println!("  Centre: {}, {}", args.lat, args.lon);
    println!("  Radius: {} km", args.radius);
    println!(
        "  Search box: S {:.4}  W {:.4}  N {:.4}  E {:.4}",
        bbox.south, bbox.west, bbox.north, bbox.east
    );
    println!();
    for line in describe(&cover, &args.namespace) {
        println!("{}", line);
    }
    Ok(())
}

/// Cover summary followed by one line per cell and its topic.
fn describe(cover: &GeohashCover, namespace: &str) -> Vec<String> {
    let mut lines = Vec::with_capacity(cover.len() + 1);
    lines.push(format!(
        "Cover: {} cell(s) at precision {}",
        cover.len(),
        cover.precision
    ));
    for cell in cover.iter() {
        lines.push(format!("  {:<12} {}", cell, strike_topic(namespace, cell)));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_every_cell() {
        let cover = coverage(52.23, 21.01, 50.0).unwrap();
        let lines = describe(&cover, "blitzortung/1.1");

        assert_eq!(lines.len(), cover.len() + 1);
        assert!(lines[0].contains(&format!("precision {}", cover.precision)));
        for (line, cell) in lines[1..].iter().zip(cover.iter()) {
            assert!(line.contains(cell));
            assert!(line.trim_end().ends_with("/#"));
            assert!(line.contains("blitzortung/1.1/"));
        }
    }

    #[test]
    fn test_rejects_negative_radius() {
        let result = run(CoverArgs {
            lat: 0.0,
            lon: 0.0,
            radius: -1.0,
            namespace: DEFAULT_STRIKE_NAMESPACE.to_string(),
        });
        assert!(matches!(result, Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_invalid_latitude() {
        let result = run(CoverArgs {
            lat: 95.0,
            lon: 0.0,
            radius: 10.0,
            namespace: DEFAULT_STRIKE_NAMESPACE.to_string(),
        });
        assert!(matches!(result, Err(CliError::Region(_))));
    }
}
