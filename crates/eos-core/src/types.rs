//! Public data model: observation shapes, per-instrument observations,
//! detection results, and parameter bundles.
//!
//! Observation and result buffers are caller-owned; the library only
//! borrows them during a call. The `with_capacity` constructors exist so a
//! flight executive can allocate everything up front (typically from the
//! attributes peek of a file) and stay heap-free afterwards.

/// Row/column/band extent of one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObsShape {
    pub rows: u32,
    pub cols: u32,
    pub bands: u32,
}

impl ObsShape {
    /// Pixel count (`rows * cols`), widened so large frames cannot wrap.
    pub fn n_pixels(&self) -> u64 {
        u64::from(self.rows) * u64::from(self.cols)
    }
}

/// One per-pixel detection, shared by the thermal and spectral detectors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelDetection {
    pub row: u32,
    pub col: u32,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// E-THEMIS (thermal imager)
// ---------------------------------------------------------------------------

/// Number of thermal imager bands.
pub const ETHEMIS_N_BANDS: usize = 3;

/// A thermal observation: three independent bands of row-major u16 samples.
#[derive(Debug, Clone)]
pub struct EthemisObservation {
    pub observation_id: u32,
    pub timestamp: u32,
    pub band_shape: [ObsShape; ETHEMIS_N_BANDS],
    pub band_data: [Box<[u16]>; ETHEMIS_N_BANDS],
}

impl EthemisObservation {
    /// Allocate per-band sample storage; `band_capacity` is the maximum
    /// pixel count the loader may write into each band.
    pub fn with_capacity(band_capacity: [usize; ETHEMIS_N_BANDS]) -> Self {
        Self {
            observation_id: 0,
            timestamp: 0,
            band_shape: [ObsShape::default(); ETHEMIS_N_BANDS],
            band_data: band_capacity.map(|n| vec![0u16; n].into_boxed_slice()),
        }
    }
}

/// Per-band hot-pixel thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthemisParams {
    pub band_threshold: [u16; ETHEMIS_N_BANDS],
}

/// Caller-owned top-K result arrays, one per band. The length of each
/// `band_results` slice is the requested result count; `n_results` receives
/// the count actually produced.
#[derive(Debug, Clone)]
pub struct EthemisDetectionResult {
    pub n_results: [u32; ETHEMIS_N_BANDS],
    pub band_results: [Box<[PixelDetection]>; ETHEMIS_N_BANDS],
}

impl EthemisDetectionResult {
    pub fn with_capacity(n_results: [usize; ETHEMIS_N_BANDS]) -> Self {
        Self {
            n_results: [0; ETHEMIS_N_BANDS],
            band_results: n_results
                .map(|n| vec![PixelDetection::default(); n].into_boxed_slice()),
        }
    }
}

// ---------------------------------------------------------------------------
// MISE (spectral imager)
// ---------------------------------------------------------------------------

/// Design band count of the spectral imager.
pub const MISE_N_BANDS: u32 = 421;

/// A spectral observation: one cube of u16 samples in band-interleaved-by-
/// pixel order (all bands of pixel (r, c) stored consecutively).
#[derive(Debug, Clone)]
pub struct MiseObservation {
    pub observation_id: u32,
    pub timestamp: u32,
    pub shape: ObsShape,
    pub data: Box<[u16]>,
}

impl MiseObservation {
    /// Allocate sample storage for up to `n_samples` values
    /// (`rows * cols * bands`).
    pub fn with_capacity(n_samples: usize) -> Self {
        Self {
            observation_id: 0,
            timestamp: 0,
            shape: ObsShape::default(),
            data: vec![0u16; n_samples].into_boxed_slice(),
        }
    }
}

/// Spectral anomaly-detection algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MiseAlgorithm {
    #[default]
    Rx,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiseParams {
    pub alg: MiseAlgorithm,
}

/// Caller-owned top-K result array for the spectral detector.
#[derive(Debug, Clone)]
pub struct MiseDetectionResult {
    pub n_results: u32,
    pub results: Box<[PixelDetection]>,
}

impl MiseDetectionResult {
    pub fn with_capacity(n_results: usize) -> Self {
        Self {
            n_results: 0,
            results: vec![PixelDetection::default(); n_results].into_boxed_slice(),
        }
    }
}

// ---------------------------------------------------------------------------
// PIMS (charged-particle spectrometer)
// ---------------------------------------------------------------------------

/// Storage width of per-bin particle counts, selected at build time.
#[cfg(feature = "u16-counts")]
pub type BinCount = u16;
#[cfg(not(feature = "u16-counts"))]
pub type BinCount = u32;

/// Saturation limit matching [`BinCount`]; the loader clips file counts
/// here before narrowing.
pub const BIN_COUNT_MAX: u32 = BinCount::MAX as u32;

/// Spectrometer operating regime; doubles as the index into a file's mode
/// table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PimsMode {
    #[default]
    Transition = 0,
    Magnetospheric = 1,
    Ionospheric = 2,
}

/// Borrowed view of one particle observation. Count and energy slices are
/// trimmed to the observation's bin count and reference storage owned by
/// the loaded file (or by a caller-built observation).
#[derive(Debug, Clone, Copy, Default)]
pub struct PimsObservationRef<'a> {
    pub observation_id: u32,
    pub timestamp: u32,
    pub mode: PimsMode,
    pub bin_counts: &'a [BinCount],
    pub bin_log_energies: &'a [f32],
}

impl PimsObservationRef<'_> {
    pub fn num_bins(&self) -> u32 {
        self.bin_counts.len() as u32
    }
}

/// One mode's bin grid: `num_bins` valid log-centre energies.
#[derive(Debug, Clone, Default)]
pub struct PimsModeInfo {
    pub num_bins: u32,
    pub bin_log_energies: Box<[f32]>,
}

/// One observation as stored in a loaded file. `bin_counts` is allocated
/// to the file's `max_bins`; the first `num_bins` entries are valid.
#[derive(Debug, Clone, Default)]
pub struct PimsStoredObservation {
    pub observation_id: u32,
    pub timestamp: u32,
    pub num_bins: u32,
    pub mode: PimsMode,
    pub bin_counts: Box<[BinCount]>,
}

/// A loaded particle observation file: a mode table plus the observation
/// records that reference it.
#[derive(Debug, Clone, Default)]
pub struct PimsObservationsFile {
    pub file_id: u32,
    pub num_modes: u32,
    pub max_bins: u32,
    pub num_observations: u32,
    pub modes_info: Box<[PimsModeInfo]>,
    pub observations: Box<[PimsStoredObservation]>,
}

impl PimsObservationsFile {
    /// Allocate storage sized from a file-attributes peek.
    pub fn with_capacity(num_modes: u32, max_bins: u32, num_observations: u32) -> Self {
        let mode = PimsModeInfo {
            num_bins: 0,
            bin_log_energies: vec![0f32; max_bins as usize].into_boxed_slice(),
        };
        let obs = PimsStoredObservation {
            bin_counts: vec![0 as BinCount; max_bins as usize].into_boxed_slice(),
            ..PimsStoredObservation::default()
        };
        Self {
            file_id: 0,
            num_modes: 0,
            max_bins: 0,
            num_observations: 0,
            modes_info: vec![mode; num_modes as usize].into_boxed_slice(),
            observations: vec![obs; num_observations as usize].into_boxed_slice(),
        }
    }

    /// View of observation `index`, with counts and its mode's energy grid
    /// trimmed to the observation's bin count.
    pub fn observation(&self, index: usize) -> PimsObservationRef<'_> {
        let obs = &self.observations[index];
        let n = obs.num_bins as usize;
        let mode = &self.modes_info[obs.mode as usize];
        PimsObservationRef {
            observation_id: obs.observation_id,
            timestamp: obs.timestamp,
            mode: obs.mode,
            bin_counts: &obs.bin_counts[..n],
            bin_log_energies: &mode.bin_log_energies[..n],
        }
    }
}

/// Header attributes of a particle file, peeked before allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PimsFileAttributes {
    pub num_modes: u32,
    pub max_bins: u32,
    pub num_observations: u32,
}

/// Streaming anomaly-detection algorithms for the particle spectrometer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PimsAlgorithm {
    #[default]
    None,
    Baseline,
}

/// Per-bin smoothing filters applied across the recent-observation queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PimsFilter {
    #[default]
    None,
    Min,
    Mean,
    Median,
    Max,
}

/// Parameters shared by every particle algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PimsCommonParams {
    pub filter: PimsFilter,
    pub max_observations: u32,
    pub threshold: f32,
    pub max_bins: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PimsParams {
    pub alg: PimsAlgorithm,
    pub common: PimsCommonParams,
}

/// Transition flag for one streaming step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PimsEvent {
    #[default]
    NoTransition,
    Transition,
}

/// Result of one streaming step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PimsDetection {
    pub event: PimsEvent,
    pub timestamp: u32,
    pub score: f32,
}

/// State sizing request produced by an algorithm for its caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PimsStateRequest {
    pub queue_size: u32,
    pub max_bins: u32,
}

// ---------------------------------------------------------------------------
// Parameter bundles
// ---------------------------------------------------------------------------

/// All detector parameter sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EosParams {
    pub ethemis: EthemisParams,
    pub mise: MiseParams,
    pub pims: PimsParams,
}

/// Worst-case envelope the library is initialized against; fixes the arena
/// size for every subsequent call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EosInitParams {
    pub pims_params: PimsParams,
    pub mise_max_bands: u32,
}
