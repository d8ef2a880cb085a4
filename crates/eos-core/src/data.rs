//! Binary observation loaders.
//!
//! All three instrument formats share one framing convention: an ASCII
//! magic string, pad bytes up to the next 4-byte boundary (a full unit of
//! padding when none would otherwise be needed), and a one-byte format
//! version, followed by a version-specific big-endian record. Loaders
//! consume in-memory byte slices and fill caller-allocated observation
//! structures; multi-byte fields are converted to host order as they are
//! read, so no mixed-endian data survives past this module.

use byteorder::{BigEndian, ByteOrder};

use crate::log::{log_debug, log_error, log_info, log_warn, Logger};
use crate::status::EosError;
use crate::types::{
    BinCount, EthemisObservation, MiseObservation, ObsShape, PimsFileAttributes, PimsMode,
    PimsObservationsFile, BIN_COUNT_MAX, ETHEMIS_N_BANDS, MISE_N_BANDS,
};

const FRAME_ALIGNMENT: usize = 4;
const VERSION_BYTES: usize = 1;
pub const FORMAT_VERSION_1: u8 = 0x01;

pub const ETHEMIS_MAGIC: &[u8] = b"EOS_ETHEMIS";
pub const MISE_MAGIC: &[u8] = b"EOS_MISE";
pub const PIMS_MAGIC: &[u8] = b"EOS_PIMS";

/// id, timestamp, then (cols, rows) for each of the three bands.
const ETHEMIS_HEADER_ENTRIES: usize = 8;
/// id, timestamp, cols, rows, bands.
const MISE_HEADER_ENTRIES: usize = 5;
/// file id, num_modes, max_bins, num_observations.
const PIMS_FILE_HEADER_ENTRIES: usize = 4;
/// observation id, timestamp, num_bins, mode.
const PIMS_OBS_HEADER_ENTRIES: usize = 4;

/// Pad bytes between the magic string and the version byte, chosen so the
/// framed prefix is a non-zero multiple of the alignment.
pub fn padding_nbytes(magic_len: usize) -> usize {
    let padding = (FRAME_ALIGNMENT - (magic_len + VERSION_BYTES) % FRAME_ALIGNMENT)
        % FRAME_ALIGNMENT;
    if padding == 0 { FRAME_ALIGNMENT } else { padding }
}

/// Offset of the version-specific record.
pub fn header_start(magic_len: usize) -> usize {
    magic_len + padding_nbytes(magic_len) + VERSION_BYTES
}

/// Validate framing and dispatch on the version byte; returns the offset
/// of the version-1 record.
fn check_frame(
    log: &mut Logger,
    bytes: &[u8],
    magic: &[u8],
    what: &str,
    load_err: EosError,
    version_err: EosError,
) -> Result<usize, EosError> {
    let start = header_start(magic.len());
    if bytes.len() < start {
        log_error!(log, "{what} file too small for header.");
        return Err(load_err);
    }
    if &bytes[..magic.len()] != magic {
        log_error!(log, "Unexpected {what} header string.");
        return Err(load_err);
    }
    let version = bytes[magic.len() + padding_nbytes(magic.len())];
    if version != FORMAT_VERSION_1 {
        log_error!(log, "Unknown {what} version {version}");
        return Err(version_err);
    }
    Ok(start)
}

// ---------------------------------------------------------------------------
// E-THEMIS
// ---------------------------------------------------------------------------

pub(crate) fn load_ethemis(
    log: &mut Logger,
    bytes: &[u8],
    obs: &mut EthemisObservation,
) -> Result<(), EosError> {
    let header_off = check_frame(
        log,
        bytes,
        ETHEMIS_MAGIC,
        "E-THEMIS",
        EosError::EthemisLoad,
        EosError::EthemisVersion,
    )?;

    let full_header = header_off + ETHEMIS_HEADER_ENTRIES * 4;
    if bytes.len() < full_header {
        log_error!(log, "E-THEMIS file truncated before header.");
        return Err(EosError::EthemisLoad);
    }
    let mut header = [0u32; ETHEMIS_HEADER_ENTRIES];
    BigEndian::read_u32_into(&bytes[header_off..full_header], &mut header);

    obs.observation_id = header[0];
    obs.timestamp = header[1];

    // Band dimensions start at header entry 2.
    let mut offset = full_header as u64;
    for band in 0..ETHEMIS_N_BANDS {
        let cols = header[2 + 2 * band];
        let rows = header[3 + 2 * band];
        let band_size = u64::from(cols) * u64::from(rows);
        let band_space = obs.band_data[band].len() as u64;
        if band_size > band_space {
            log_error!(
                log,
                "Insufficient space ({band_space}) in destination to hold \
                 {band_size} band {band} data entries in E-THEMIS file."
            );
            return Err(EosError::EthemisLoad);
        }

        let band_data_bytes = band_size * 2;
        if offset + band_data_bytes > bytes.len() as u64 {
            log_error!(
                log,
                "E-THEMIS file truncated; expected at least {} bytes while \
                 reading band {band}, but file size is {}",
                offset + band_data_bytes,
                bytes.len()
            );
            return Err(EosError::EthemisLoad);
        }

        if band_size > 0 {
            let src = &bytes[offset as usize..(offset + band_data_bytes) as usize];
            BigEndian::read_u16_into(src, &mut obs.band_data[band][..band_size as usize]);
        }
        obs.band_shape[band] = ObsShape {
            rows,
            cols,
            bands: 1,
        };
        offset += band_data_bytes;
    }

    if bytes.len() as u64 > offset {
        log_warn!(
            log,
            "Expected {offset} bytes in E-THEMIS file but got {}.",
            bytes.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MISE
// ---------------------------------------------------------------------------

pub(crate) fn load_mise(
    log: &mut Logger,
    bytes: &[u8],
    obs: &mut MiseObservation,
) -> Result<(), EosError> {
    let header_off = check_frame(
        log,
        bytes,
        MISE_MAGIC,
        "MISE",
        EosError::MiseLoad,
        EosError::MiseVersion,
    )?;

    let full_header = header_off + MISE_HEADER_ENTRIES * 4;
    if bytes.len() < full_header {
        log_error!(log, "MISE file truncated before header.");
        return Err(EosError::MiseLoad);
    }
    let mut header = [0u32; MISE_HEADER_ENTRIES];
    BigEndian::read_u32_into(&bytes[header_off..full_header], &mut header);

    obs.observation_id = header[0];
    obs.timestamp = header[1];
    obs.shape = ObsShape {
        cols: header[2],
        rows: header[3],
        bands: header[4],
    };
    if obs.shape.bands != MISE_N_BANDS {
        log_info!(
            log,
            "Read {} MISE bands (expecting {MISE_N_BANDS})",
            obs.shape.bands
        );
    }

    let n_data_values =
        obs.shape.n_pixels() * u64::from(obs.shape.bands);
    if n_data_values > obs.data.len() as u64 {
        log_error!(
            log,
            "Insufficient space ({}) in destination to hold {n_data_values} \
             data entries in MISE file.",
            obs.data.len()
        );
        return Err(EosError::MiseLoad);
    }
    let data_bytes = n_data_values * 2;
    if full_header as u64 + data_bytes > bytes.len() as u64 {
        log_error!(
            log,
            "MISE file truncated; expected at least {} bytes, but file size is {}",
            full_header as u64 + data_bytes,
            bytes.len()
        );
        return Err(EosError::MiseLoad);
    }
    if n_data_values > 0 {
        let src = &bytes[full_header..full_header + data_bytes as usize];
        BigEndian::read_u16_into(src, &mut obs.data[..n_data_values as usize]);
    }

    if bytes.len() as u64 > full_header as u64 + data_bytes {
        log_warn!(
            log,
            "Expected {} bytes in MISE file but got {}.",
            full_header as u64 + data_bytes,
            bytes.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PIMS
// ---------------------------------------------------------------------------

fn pims_mode_from_tag(tag: u32) -> Option<PimsMode> {
    match tag {
        0 => Some(PimsMode::Transition),
        1 => Some(PimsMode::Magnetospheric),
        2 => Some(PimsMode::Ionospheric),
        _ => None,
    }
}

/// Peek num_modes, max_bins, and num_observations so a caller can size
/// destination storage before the full load.
pub(crate) fn pims_observation_attributes(
    log: &mut Logger,
    bytes: &[u8],
) -> Result<PimsFileAttributes, EosError> {
    let header_off = header_start(PIMS_MAGIC.len());
    let full_header = header_off + PIMS_FILE_HEADER_ENTRIES * 4;
    if bytes.len() < full_header {
        log_error!(log, "PIMS file truncated before header.");
        return Err(EosError::PimsLoad);
    }
    let mut header = [0u32; PIMS_FILE_HEADER_ENTRIES];
    BigEndian::read_u32_into(&bytes[header_off..full_header], &mut header);
    Ok(PimsFileAttributes {
        num_modes: header[1],
        max_bins: header[2],
        num_observations: header[3],
    })
}

pub(crate) fn load_pims(
    log: &mut Logger,
    bytes: &[u8],
    file: &mut PimsObservationsFile,
) -> Result<(), EosError> {
    let header_off = check_frame(
        log,
        bytes,
        PIMS_MAGIC,
        "PIMS",
        EosError::PimsLoad,
        EosError::PimsVersion,
    )?;

    let full_header = header_off + PIMS_FILE_HEADER_ENTRIES * 4;
    if bytes.len() < full_header {
        log_error!(log, "PIMS file truncated before header.");
        return Err(EosError::PimsLoad);
    }
    let mut header = [0u32; PIMS_FILE_HEADER_ENTRIES];
    BigEndian::read_u32_into(&bytes[header_off..full_header], &mut header);

    let num_modes = header[1];
    let max_bins = header[2];
    let num_observations = header[3];
    log_info!(
        log,
        "Reading PIMS file: ID = {}, NUM_MODES = {num_modes}, MAX_BINS = {max_bins}, \
         NUM_OBSERVATIONS = {num_observations}",
        header[0]
    );

    let modes_space = file.modes_info.len() as u64;
    let obs_space = file.observations.len() as u64;
    let bins_space = file
        .modes_info
        .first()
        .map_or(0, |m| m.bin_log_energies.len() as u64);
    let counts_space = file
        .observations
        .first()
        .map_or(0, |o| o.bin_counts.len() as u64);
    if u64::from(num_modes) > modes_space
        || u64::from(num_observations) > obs_space
        || (num_modes > 0 && u64::from(max_bins) > bins_space)
        || (num_observations > 0 && u64::from(max_bins) > counts_space)
    {
        log_error!(
            log,
            "Insufficient space in destination for {num_modes} modes of \
             {max_bins} bins and {num_observations} observations."
        );
        return Err(EosError::PimsLoad);
    }

    file.file_id = header[0];
    file.num_modes = num_modes;
    file.max_bins = max_bins;
    file.num_observations = num_observations;

    // Mode table: max_bins log-centre energies per mode, terminated early
    // by positive infinity.
    let bin_defs_bytes = u64::from(max_bins) * 4;
    let modes_end = full_header as u64 + u64::from(num_modes) * bin_defs_bytes;
    if (bytes.len() as u64) < modes_end {
        log_error!(log, "PIMS file truncated before mode information.");
        return Err(EosError::PimsLoad);
    }
    for mode in 0..num_modes as usize {
        let off = full_header + mode * bin_defs_bytes as usize;
        let info = &mut file.modes_info[mode];
        info.num_bins = max_bins;
        for i in 0..max_bins as usize {
            let value = BigEndian::read_f32(&bytes[off + 4 * i..off + 4 * i + 4]);
            if value == f32::INFINITY {
                info.num_bins = i as u32;
                break;
            }
            info.bin_log_energies[i] = value;
        }
        if info.num_bins == 0 {
            log_error!(log, "Mode {mode} has 0 bins.");
            return Err(EosError::PimsLoad);
        }
        log_info!(log, "- Mode {mode} has {} bins.", info.num_bins);
    }

    // Observation records: one header plus max_bins counts each.
    let obs_header_bytes = PIMS_OBS_HEADER_ENTRIES * 4;
    let obs_size = obs_header_bytes as u64 + u64::from(max_bins) * 4;
    let obs_end = modes_end + u64::from(num_observations) * obs_size;
    if (bytes.len() as u64) < obs_end {
        log_error!(log, "PIMS file truncated before observations.");
        return Err(EosError::PimsLoad);
    }
    for i in 0..num_observations as usize {
        let off = (modes_end + i as u64 * obs_size) as usize;
        let mut obs_header = [0u32; PIMS_OBS_HEADER_ENTRIES];
        BigEndian::read_u32_into(&bytes[off..off + obs_header_bytes], &mut obs_header);

        let Some(mode) = pims_mode_from_tag(obs_header[3]) else {
            log_error!(log, "Observation {i} has unknown mode tag {}.", obs_header[3]);
            return Err(EosError::PimsLoad);
        };
        if obs_header[3] >= num_modes {
            log_error!(
                log,
                "Observation {i} references mode {} but the file defines {num_modes}.",
                obs_header[3]
            );
            return Err(EosError::PimsLoad);
        }
        log_debug!(
            log,
            "Reading PIMS observation: ID = {}, TIMESTAMP = {}, NUM_BINS = {}, MODE = {}",
            obs_header[0],
            obs_header[1],
            obs_header[2],
            obs_header[3]
        );

        let record = &mut file.observations[i];
        record.observation_id = obs_header[0];
        record.timestamp = obs_header[1];
        record.num_bins = obs_header[2];
        record.mode = mode;

        // Counts are clipped, not wrapped, to the compile-time count width.
        let counts_off = off + obs_header_bytes;
        for bin in 0..max_bins as usize {
            let raw = BigEndian::read_u32(&bytes[counts_off + 4 * bin..counts_off + 4 * bin + 4]);
            record.bin_counts[bin] = raw.min(BIN_COUNT_MAX) as BinCount;
        }

        let mode_bins = file.modes_info[obs_header[3] as usize].num_bins;
        if record.num_bins != mode_bins {
            log_error!(
                log,
                "Observation {i} has {} bins, but associated mode {} has only {mode_bins} bins.",
                record.num_bins,
                obs_header[3]
            );
            return Err(EosError::PimsLoad);
        }
    }

    if bytes.len() as u64 > obs_end {
        log_warn!(log, "Expected {obs_end} bytes in PIMS file but got {}.", bytes.len());
    }
    Ok(())
}
