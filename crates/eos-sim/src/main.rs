//! Ground simulator for the onboard anomaly-detection library.
//!
//! Plays observation files through the detectors the way the flight
//! executive would, with parameters from a JSON config, and generates
//! synthetic observation files for testing the loaders.

mod config;
mod encode;

use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use clap::{Parser, Subcommand};
use thiserror::Error;

use eos_core::data::{header_start, ETHEMIS_MAGIC, MISE_MAGIC};
use eos_core::{
    Eos, EosError, EosInitParams, EosParams, EthemisDetectionResult, EthemisObservation,
    LogLevel, LogSink, MiseDetectionResult, MiseObservation, PimsEvent, PimsObservationsFile,
    PimsState, ETHEMIS_N_BANDS,
};

#[derive(Debug, Error)]
enum SimError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("detection library: {0}")]
    Eos(#[from] EosError),
}

/// Observation playback and file generation for the detection library.
#[derive(Debug, Parser)]
#[command(name = "eos-sim")]
#[command(about = "Ground simulator for the onboard anomaly-detection library")]
struct Cli {
    /// Echo debug-level library log messages.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the thermal detector over an observation file.
    Ethemis {
        /// Observation file path.
        #[arg(long)]
        input: PathBuf,
        /// JSON parameter config.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Requested detections per band.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Run the spectral RX detector over an observation file.
    Mise {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Requested detections.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Stream a particle observation file through the transition detector.
    Pims {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write synthetic observation files for loader and detector testing.
    Generate {
        /// Instrument: ethemis, mise, or pims.
        #[arg(long)]
        instrument: String,
        /// Output file path.
        #[arg(long)]
        output: PathBuf,
    },
}

/// Library log sink: human-readable lines on stderr, metric lines on
/// stdout for scraping.
fn log_sink(verbose: bool) -> LogSink {
    Box::new(move |level, message: &str| match level {
        LogLevel::Debug if !verbose => {}
        LogLevel::Debug => eprintln!("DEBUG: {message}"),
        LogLevel::Info => eprintln!("INFO: {message}"),
        LogLevel::Warn => eprintln!("WARNING: {message}"),
        LogLevel::Error => eprintln!("ERROR: {message}"),
        LogLevel::KeyValue => println!("{message}"),
    })
}

fn init_library(params: &EosParams, mise_max_bands: u32, verbose: bool) -> Result<Eos, SimError> {
    let init = EosInitParams {
        pims_params: params.pims,
        mise_max_bands,
    };
    Ok(Eos::init(&init, None, Some(log_sink(verbose)))?)
}

/// Band dimensions from a thermal file header, for sizing the destination.
fn peek_ethemis_dims(bytes: &[u8]) -> Result<[(u32, u32); ETHEMIS_N_BANDS], SimError> {
    let off = header_start(ETHEMIS_MAGIC.len());
    if bytes.len() < off + 8 * 4 {
        return Err(SimError::Config("thermal file too short to size".into()));
    }
    let mut dims = [(0u32, 0u32); ETHEMIS_N_BANDS];
    for (band, dim) in dims.iter_mut().enumerate() {
        let cols = BigEndian::read_u32(&bytes[off + (2 + 2 * band) * 4..]);
        let rows = BigEndian::read_u32(&bytes[off + (3 + 2 * band) * 4..]);
        *dim = (cols, rows);
    }
    Ok(dims)
}

/// Cube dimensions from a spectral file header.
fn peek_mise_dims(bytes: &[u8]) -> Result<(u32, u32, u32), SimError> {
    let off = header_start(MISE_MAGIC.len());
    if bytes.len() < off + 5 * 4 {
        return Err(SimError::Config("spectral file too short to size".into()));
    }
    Ok((
        BigEndian::read_u32(&bytes[off + 2 * 4..]),
        BigEndian::read_u32(&bytes[off + 3 * 4..]),
        BigEndian::read_u32(&bytes[off + 4 * 4..]),
    ))
}

fn run_ethemis(
    input: &Path,
    config: Option<&Path>,
    top: usize,
    verbose: bool,
) -> Result<(), SimError> {
    let bytes = std::fs::read(input)?;
    let params = config::load(config)?;
    let mut eos = init_library(&params, 0, verbose)?;

    let dims = peek_ethemis_dims(&bytes)?;
    let mut obs =
        EthemisObservation::with_capacity(dims.map(|(cols, rows)| (cols * rows) as usize));
    eos.load_ethemis(&bytes, &mut obs)?;

    let mut result = EthemisDetectionResult::with_capacity([top; ETHEMIS_N_BANDS]);
    eos.ethemis_detect_anomaly(&params.ethemis, &obs, &mut result)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for band in 0..ETHEMIS_N_BANDS {
        writeln!(out, "band {band}: {} detections", result.n_results[band])?;
        for det in &result.band_results[band][..result.n_results[band] as usize] {
            writeln!(out, "  ({}, {}) value {}", det.row, det.col, det.score)?;
        }
    }
    Ok(())
}

fn run_mise(
    input: &Path,
    config: Option<&Path>,
    top: usize,
    verbose: bool,
) -> Result<(), SimError> {
    let bytes = std::fs::read(input)?;
    let params = config::load(config)?;

    let (cols, rows, bands) = peek_mise_dims(&bytes)?;
    let mut eos = init_library(&params, bands, verbose)?;
    let mut obs = MiseObservation::with_capacity((cols * rows * bands) as usize);
    eos.load_mise(&bytes, &mut obs)?;

    let mut result = MiseDetectionResult::with_capacity(top);
    eos.mise_detect_anomaly(&params.mise, &obs, &mut result)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{} detections", result.n_results)?;
    for det in &result.results[..result.n_results as usize] {
        writeln!(out, "  ({}, {}) score {:.6}", det.row, det.col, det.score)?;
    }
    Ok(())
}

/// True when two stream observations share a bin grid, within the same
/// tolerance the detector uses.
fn same_bin_grid(a: &eos_core::PimsObservationRef<'_>, b: &eos_core::PimsObservationRef<'_>) -> bool {
    a.bin_log_energies.len() == b.bin_log_energies.len()
        && a.bin_log_energies
            .iter()
            .zip(b.bin_log_energies)
            .all(|(x, y)| (x - y).abs() <= 1e-6)
}

fn run_pims(input: &Path, config: Option<&Path>, verbose: bool) -> Result<(), SimError> {
    let bytes = std::fs::read(input)?;
    let mut params = config::load(config)?;
    let mut eos = init_library(&params, 0, verbose)?;

    let attrs = eos.pims_observation_attributes(&bytes)?;
    eprintln!(
        "INFO: sizing for NUM_MODES = {}, MAX_BINS = {}, NUM_OBS = {}",
        attrs.num_modes, attrs.max_bins, attrs.num_observations
    );
    let mut file =
        PimsObservationsFile::with_capacity(attrs.num_modes, attrs.max_bins, attrs.num_observations);
    eos.load_pims(&bytes, &mut file)?;

    // The declared envelope must match the data actually on disk.
    params.pims.common.max_bins = attrs.max_bins;
    let mut eos = init_library(&params, 0, verbose)?;

    let req = eos.pims_state_request(&params.pims)?;
    let mut state = PimsState::for_request(&req);
    eos.pims_init(&params.pims, &mut state)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for i in 0..file.num_observations as usize {
        let obs = file.observation(i);
        // A changed bin grid means a new instrument mode: restart the
        // stream rather than reject the observation.
        if i > 0 && !same_bin_grid(&file.observation(i - 1), &obs) {
            eprintln!(
                "INFO: Bin definitions changed for observation with ID {}; resetting stream.",
                obs.observation_id
            );
            eos.pims_init(&params.pims, &mut state)?;
        }
        let det = eos.pims_on_recv(obs, &params.pims, &mut state)?;
        let flag = match det.event {
            PimsEvent::Transition => " TRANSITION",
            PimsEvent::NoTransition => "",
        };
        writeln!(out, "t={} score={:.1}{flag}", det.timestamp, det.score)?;
    }
    Ok(())
}

fn run_generate(instrument: &str, output: &Path) -> Result<(), SimError> {
    let bytes = match instrument.to_ascii_lowercase().as_str() {
        "ethemis" => encode::encode_ethemis(&encode::synthetic_ethemis(64, 64)),
        "mise" => encode::encode_mise(&encode::synthetic_mise(16, 16, 32)),
        "pims" => encode::encode_pims(&encode::synthetic_pims(30, 20)),
        other => {
            return Err(SimError::Config(format!("unknown instrument \"{other}\"")));
        }
    };
    std::fs::write(output, &bytes)?;
    eprintln!("INFO: wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Ethemis { input, config, top } => {
            run_ethemis(input, config.as_deref(), *top, cli.verbose)
        }
        Command::Mise { input, config, top } => {
            run_mise(input, config.as_deref(), *top, cli.verbose)
        }
        Command::Pims { input, config } => run_pims(input, config.as_deref(), cli.verbose),
        Command::Generate { instrument, output } => run_generate(instrument, output),
    };
    if let Err(err) = outcome {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_files_run_end_to_end() {
        let dir = std::env::temp_dir().join("eos-sim-self-test");
        std::fs::create_dir_all(&dir).unwrap();

        for instrument in ["ethemis", "mise", "pims"] {
            let path = dir.join(format!("{instrument}.dat"));
            run_generate(instrument, &path).unwrap();
            match instrument {
                "ethemis" => run_ethemis(&path, None, 5, false).unwrap(),
                "mise" => run_mise(&path, None, 5, false).unwrap(),
                _ => run_pims(&path, None, false).unwrap(),
            }
        }
    }

    #[test]
    fn header_peeks_reject_short_files() {
        assert!(peek_ethemis_dims(b"EOS_ETHEMIS").is_err());
        assert!(peek_mise_dims(b"EOS_MISE").is_err());
    }
}
