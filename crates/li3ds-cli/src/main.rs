//! li3ds - Command line importer for the LI3DS metadata API
//!
//! Every subcommand builds a collection of records and publishes it,
//! either to the remote API or, without an API URL, to an in-memory
//! staging area for a dry run.

mod config;
mod import;
mod remote;
mod template;

use anyhow::Result;
use clap::{Parser, Subcommand};
use li3ds_core::{Backend, StagingBackend, Store};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::import::ept::EptArgs;
use crate::import::extcalib::ExtcalibArgs;
use crate::import::image::ImageArgs;
use crate::import::json::JsonArgs;
use crate::import::ori::OriArgs;
use crate::import::orimatis::OrimatisArgs;
use crate::import::sbet::SbetArgs;
use crate::import::trajectory::TrajectoryArgs;
use crate::import::CalibrationArgs;
use crate::remote::RemoteBackend;

#[derive(Parser, Debug)]
#[command(name = "li3ds")]
#[command(about = "The li3ds command line")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "li3ds.toml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// The li3ds API URL (dry run in staging mode when unset)
    #[arg(short = 'u', long, global = true)]
    api_url: Option<String>,

    /// The li3ds API key (required with an API URL)
    #[arg(short = 'k', long, global = true)]
    api_key: Option<String>,

    /// Disable all proxy settings
    #[arg(long, global = true)]
    no_proxy: bool,

    /// The data owner (default is the login name)
    #[arg(short, long, global = true)]
    owner: Option<String>,

    /// Number of spaces for pretty print indenting
    #[arg(long, global = true)]
    indent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a configuration file holding every default, then exit
    InitConfig,
    /// Import a sample platform configuration for Stereopolis
    ImportPlatform,
    /// Import autocal files (intrinsic camera calibration)
    ImportAutocal(CalibrationArgs),
    /// Import blinis files (camera block calibration)
    ImportBlinis(CalibrationArgs),
    /// Import ori files (camera pose and calibration)
    ImportOri(OriArgs),
    /// Import orimatis files (georeferenced image orientations)
    ImportOrimatis(OrimatisArgs),
    /// Import extcalib files (extrinsic calibration)
    ImportExtcalib(ExtcalibArgs),
    /// Import Stereopolis images as datasources
    ImportImage(ImageArgs),
    /// Import trajectory files as foreign point clouds
    ImportTrajectory(TrajectoryArgs),
    /// Import sbet files (INS trajectories of a session)
    ImportSbet(SbetArgs),
    /// Import an ept directory (lidar echo/pulse data of a session)
    ImportEpt(EptArgs),
    /// Import one or several JSON bundles
    ImportJson(JsonArgs),
}

fn open_store(config: &config::Config) -> Result<Store<Box<dyn Backend>>> {
    let backend: Box<dyn Backend> = if config.api.url.is_some() {
        let remote = RemoteBackend::new(&config.api)?;
        info!(url = config.api.url.as_deref().unwrap_or_default(), "Using remote API");
        Box::new(remote)
    } else {
        info!("! Staging mode (use -u/-k options to provide an api url and key)");
        Box::new(StagingBackend::new())
    };
    Ok(Store::new(backend)
        .with_retry(config.retry_policy())
        .with_indent(config.import.indent))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::InitConfig = args.command {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    config.apply(config::Overrides {
        api_url: args.api_url,
        api_key: args.api_key,
        no_proxy: args.no_proxy,
        owner: args.owner,
        indent: args.indent,
    });
    config.validate()?;

    let owner = config.owner();
    let mut store = open_store(&config)?;

    match &args.command {
        Command::InitConfig => Ok(()),
        Command::ImportPlatform => import::platform::import(&mut store, &owner),
        Command::ImportAutocal(autocal) => import::autocal::import(&mut store, autocal, &owner),
        Command::ImportBlinis(blinis) => import::blinis::import(&mut store, blinis, &owner),
        Command::ImportOri(ori) => import::ori::import(&mut store, ori, &owner),
        Command::ImportOrimatis(orimatis) => import::orimatis::import(&mut store, orimatis, &owner),
        Command::ImportExtcalib(extcalib) => import::extcalib::import(&mut store, extcalib, &owner),
        Command::ImportImage(image) => import::image::import(&mut store, image),
        Command::ImportTrajectory(trajectory) => import::trajectory::import(&mut store, trajectory),
        Command::ImportSbet(sbet) => import::sbet::import(&mut store, sbet),
        Command::ImportEpt(ept) => import::ept::import(&mut store, ept),
        Command::ImportJson(json) => import::json::import(&mut store, json, &owner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "li3ds",
            "import-blinis",
            "-u",
            "http://localhost/api",
            "-k",
            "key",
            "--sensor-id",
            "3",
            "block.xml",
        ])
        .unwrap();
        assert_eq!(args.api_url.as_deref(), Some("http://localhost/api"));
        match args.command {
            Command::ImportBlinis(blinis) => {
                assert_eq!(blinis.sensor_id, Some(3));
                assert_eq!(blinis.files, [PathBuf::from("block.xml")]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_json_defaults() {
        let args = Args::try_parse_from(["li3ds", "import-json", "*.json"]).unwrap();
        match args.command {
            Command::ImportJson(json) => {
                assert_eq!(json.json_dir, PathBuf::from("."));
                assert_eq!(json.uri, "{uri}");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_pointcloud_options() {
        let args = Args::try_parse_from([
            "li3ds",
            "import-sbet",
            "--project",
            "Paris",
            "-f",
            "/data",
            "-s",
            "trajectories",
            "*.out",
        ])
        .unwrap();
        match args.command {
            Command::ImportSbet(sbet) => {
                assert_eq!(sbet.project, "Paris");
                assert_eq!(sbet.srid_input, 4326);
                assert_eq!(sbet.srid_output, 2154);
                assert_eq!(sbet.pointcloud.chdir, PathBuf::from("/data"));
                assert_eq!(sbet.pointcloud.database_schema, "trajectories");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_calibration_options() {
        let args = Args::try_parse_from([
            "li3ds",
            "import-extcalib",
            "-s",
            "cam",
            "--validity-start",
            "2017-01-01T00:00:00",
            "calib.xml",
        ])
        .unwrap();
        match args.command {
            Command::ImportExtcalib(extcalib) => {
                assert_eq!(extcalib.calibration.sensor.as_deref(), Some("cam"));
                assert_eq!(extcalib.calibration.files, [PathBuf::from("calib.xml")]);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::try_parse_from(["li3ds", "import-image", "-z", "2048", "1024", "*.jpg"]).unwrap();
        match args.command {
            Command::ImportImage(image) => {
                assert_eq!(image.image_size, Some(vec![2048.0, 1024.0]));
                assert_eq!(image.patterns, ["*.jpg"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_init_config() {
        let args = Args::try_parse_from(["li3ds", "init-config", "-c", "out.toml"]).unwrap();
        assert!(matches!(args.command, Command::InitConfig));
        assert_eq!(args.config, PathBuf::from("out.toml"));
    }

    #[test]
    fn test_staging_store_without_url() {
        let config = config::Config::default();
        let mut store = open_store(&config).unwrap();
        import::platform::import(&mut store, "alice").unwrap();
    }
}
