//! tdcpix command-line interface.
//!
//! Runs simulated acquisitions against the controller, dumps the default
//! configuration and inspects raw histogram files.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use tdcpix_core::{Attribute, QuantileHistogram};
use tdcpix_daq::registry::{ACCU_XYT, LIVE_XY};
use tdcpix_daq::{
    AcquisitionController, ControllerConfig, ControllerEvent, SaveMode, SimDriver,
};
use tdcpix_io::naming::FILE_COUNTER_LIMIT;
use tdcpix_io::read_raw;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TdcpixIo(#[from] tdcpix_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tdcpix_core::Error),

    #[error("Acquisition error: {0}")]
    Daq(#[from] tdcpix_daq::Error),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Accumulation save format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum SaveFormat {
    /// Float TIFF stack of the whole cube
    Tiff,
    /// Single-page float TIFF of the XY projection
    XyTiff,
    /// Text matrix of the XY projection
    XyText,
    /// HDF5 dataset of the whole cube
    #[cfg_attr(not(feature = "hdf5"), value(skip))]
    Hdf5,
}

impl TryFrom<SaveFormat> for SaveMode {
    type Error = CliError;

    fn try_from(format: SaveFormat) -> Result<Self> {
        match format {
            SaveFormat::Tiff => Ok(SaveMode::CubeTiff),
            SaveFormat::XyTiff => Ok(SaveMode::XyTiff),
            SaveFormat::XyText => Ok(SaveMode::XyText),
            #[cfg(feature = "hdf5")]
            SaveFormat::Hdf5 => Ok(SaveMode::CubeHdf5),
            #[cfg(not(feature = "hdf5"))]
            SaveFormat::Hdf5 => Err(CliError::Unsupported(
                "built without the hdf5 feature".to_string(),
            )),
        }
    }
}

/// Histogram engine and acquisition control for delay-line TDC detectors.
#[derive(Parser)]
#[command(name = "tdcpix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an acquisition against the built-in simulator
    Simulate {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run time in seconds
        #[arg(short, long, default_value = "3")]
        seconds: u64,

        /// Accumulate into the XYT cube instead of live view only
        #[arg(short, long)]
        accumulate: bool,

        /// Save the accumulation when it stops
        #[arg(long, value_enum, requires = "accumulate")]
        save: Option<SaveFormat>,

        /// Save directory, overrides the configuration
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of the first save, overrides the configuration
        #[arg(long)]
        file_counter: Option<u32>,

        /// Number of time slices in the accumulation cube
        #[arg(long, default_value = "64")]
        cube_tsize: i64,

        /// Simulator seed
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Simulated events per measurement
        #[arg(long, default_value = "20000")]
        events: usize,
    },

    /// Print the configuration as JSON
    Config {
        /// Load and validate this file instead of printing the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show shape and statistics of a raw histogram file
    Inspect {
        /// Raw binary file
        input: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::FrameUpdated {
            name,
            width,
            height,
        } => log::debug!("{name} updated ({width}x{height})"),
        ControllerEvent::AccumulationStopped => info!("accumulation stopped"),
        ControllerEvent::Saved { path } => info!("saved {}", path.display()),
        ControllerEvent::Message(msg) => warn!("{msg}"),
        ControllerEvent::StateChanged(state) => info!("state: {state:?}"),
    }
}

fn simulate(
    config: ControllerConfig,
    seconds: u64,
    accumulate: bool,
    save: Option<SaveFormat>,
    cube_tsize: i64,
    driver: SimDriver,
) -> Result<()> {
    let run = Duration::from_secs(seconds);
    let mut config = config;
    if accumulate {
        config.exposure_accu_ms = run.as_millis() as u64;
    }
    let controller = AcquisitionController::new(config, Arc::new(driver))?;
    if let Some(mut cube) = controller.registry().lock(ACCU_XYT) {
        cube.set(Attribute::RoiTSize, cube_tsize)?;
    }
    let (cube_bytes, cube_size) = controller.accumulation_cube_size();
    if cube_bytes > 0 {
        println!("Accumulation cube: {cube_size}");
    }
    if save.is_some() {
        println!("File counter: {:03}", controller.file_counter());
    }

    let events = controller.subscribe();
    controller.bind()?;
    match (accumulate, save) {
        (true, Some(format)) => controller.accumulation_start_and_save(format.try_into()?)?,
        (true, None) => controller.accumulation_start()?,
        (false, _) => controller.acquisition_start()?,
    }
    controller.start_ticker();

    // a pending save gets some slack past the run time
    let grace = if save.is_some() {
        Duration::from_secs(10)
    } else {
        Duration::ZERO
    };
    let start = Instant::now();
    let deadline = start + run;
    let mut saved = None;
    loop {
        let now = Instant::now();
        let limit = if saved.is_none() && save.is_some() {
            deadline + grace
        } else {
            deadline
        };
        if now >= limit {
            break;
        }
        match events.recv_timeout((limit - now).min(Duration::from_millis(100))) {
            Ok(event) => {
                log_event(&event);
                match event {
                    ControllerEvent::Saved { path } => saved = Some(path),
                    ControllerEvent::Message(_) if save.is_some() => break,
                    _ => {}
                }
                if saved.is_some() && Instant::now() >= deadline {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    controller.stop_ticker();
    if controller.is_accumulating() {
        controller.accumulation_stop();
    } else {
        controller.acquisition_stop();
    }
    let settle = Instant::now() + Duration::from_secs(2);
    while controller.is_acquiring() && Instant::now() < settle {
        std::thread::sleep(Duration::from_millis(10));
    }
    controller.wait_idle();

    println!("Ran for {:.2}s", start.elapsed().as_secs_f64());
    println!("Count rate: {:.1} counts/s", controller.counts_per_second());
    if accumulate {
        println!("Accumulated: {} ms", controller.accumulated_time_ms());
    }
    if let Some(stats) = controller.image_statistics(LIVE_XY) {
        println!("Live XY: max {}, q998 {}", stats.max, stats.q998);
    }
    if let Some(stats) = controller.last_statistics() {
        println!(
            "Driver: {} events in {} measurements",
            stats.events_received, stats.measurements
        );
    }
    if let Some(path) = saved {
        println!("Saved: {}", path.display());
        println!(
            "Next file counter: {:03}",
            (controller.file_counter() + 1) % FILE_COUNTER_LIMIT
        );
    }
    controller.unbind()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            seconds,
            accumulate,
            save,
            out,
            file_counter,
            cube_tsize,
            seed,
            events,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(out) = out {
                config.save_dir = out;
            }
            if let Some(counter) = file_counter {
                config.file_counter = counter;
            }
            info!(
                "simulating {seconds}s of {} with seed {seed}",
                if accumulate { "accumulation" } else { "live view" }
            );
            simulate(
                config,
                seconds,
                accumulate,
                save,
                cube_tsize,
                SimDriver::with_events(seed, events),
            )?;
        }

        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            println!("{}", config.to_json_pretty()?);
        }

        Commands::Inspect { input } => {
            let raw = read_raw(&input)?;
            let values = raw.values_u32()?;
            let mut stats = QuantileHistogram::default();
            stats.update(&values);

            println!("File: {}", input.display());
            println!(
                "Shape: {} x {} x {} ({} bytes per pixel)",
                raw.width, raw.height, raw.zsize, raw.bytes_per_pixel
            );
            println!("Byte order: {:?}", raw.order);
            println!("Max: {}", stats.max());
            println!("Q998: {}", stats.quantile(0.998));
        }
    }

    Ok(())
}
