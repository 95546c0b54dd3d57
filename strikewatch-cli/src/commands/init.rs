//! Init command - write a default configuration file.

use std::path::PathBuf;

use clap::Args;
use strikewatch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Arguments for the init command.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Config file to write (default: ~/.strikewatch/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Overwrite an existing file with defaults
    #[arg(long)]
    pub force: bool,
}

/// Run the init command.
pub fn run(args: InitArgs) -> Result<(), CliError> {
    let path = args.config.unwrap_or_else(config_file_path);

    if args.force {
        ConfigFile::default().save_to(&path)?;
    } else if !ConfigFile::ensure_exists_at(&path)? {
        println!("Configuration file already exists: {}", path.display());
        println!("Use --force to replace it with defaults.");
        return Ok(());
    }

    println!("Configuration file: {}", path.display());
    println!();
    println!("Set [region] latitude, longitude and radius_km to your location.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_defaults_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        run(InitArgs {
            config: Some(path.clone()),
            force: false,
        })
        .unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());

        std::fs::write(&path, "[region]\nradius_km = 5\n").unwrap();
        run(InitArgs {
            config: Some(path.clone()),
            force: false,
        })
        .unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap().region.radius_km, 5.0);

        run(InitArgs {
            config: Some(path.clone()),
            force: true,
        })
        .unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }
}
