//! Streaming anomaly detection for the charged-particle spectrometer.
//!
//! Algorithms are routed through a small dispatch layer so the simulator
//! and flight executive select them by tag. State is caller-owned and
//! sized up front through a state request; the detector only borrows it
//! for the lifetime of a stream.

pub mod baseline;
pub(crate) mod filters;
pub mod queue;

pub use queue::PimsQueue;

use crate::log::{log_error, Logger};
use crate::memory::LifoStack;
use crate::status::EosError;
use crate::types::{
    BinCount, PimsAlgorithm, PimsDetection, PimsMode, PimsObservationRef, PimsParams,
    PimsStateRequest,
};

/// The state-owned smoothed spectrum. Counts live in the state's own
/// buffer (sized to `max_bins` at construction); the energy grid is shared
/// by reference with the observations of the stream.
#[derive(Debug)]
pub struct PimsSmoothedObservation<'a> {
    pub observation_id: u32,
    pub timestamp: u32,
    pub mode: PimsMode,
    pub num_bins: u32,
    pub bin_counts: Box<[BinCount]>,
    pub bin_log_energies: &'a [f32],
}

/// Per-stream state for the baseline algorithm.
#[derive(Debug)]
pub struct PimsBaselineState<'a> {
    pub queue: PimsQueue<'a>,
    pub last_smoothed: PimsSmoothedObservation<'a>,
}

/// Caller-owned state for whichever algorithm is selected.
#[derive(Debug)]
pub struct PimsState<'a> {
    alg: PimsAlgorithm,
    pub baseline: PimsBaselineState<'a>,
}

impl<'a> PimsState<'a> {
    /// Allocate state storage for a request produced by
    /// [`alg_state_request`] (exposed publicly through the library
    /// handle). No algorithm is selected yet.
    pub fn for_request(req: &PimsStateRequest) -> PimsState<'a> {
        PimsState {
            alg: PimsAlgorithm::None,
            baseline: PimsBaselineState {
                queue: PimsQueue::with_max_size(req.queue_size),
                last_smoothed: PimsSmoothedObservation {
                    observation_id: 0,
                    timestamp: 0,
                    mode: PimsMode::default(),
                    num_bins: 0,
                    bin_counts: vec![0 as BinCount; req.max_bins as usize].into_boxed_slice(),
                    bin_log_energies: &[],
                },
            },
        }
    }

    /// The algorithm selected by the last initialization, if any.
    pub fn algorithm(&self) -> PimsAlgorithm {
        self.alg
    }
}

/// State sizing for the selected algorithm.
pub(crate) fn alg_state_request(
    log: &mut Logger,
    params: &PimsParams,
) -> Result<PimsStateRequest, EosError> {
    match params.alg {
        PimsAlgorithm::Baseline => Ok(baseline::state_request(&params.common)),
        PimsAlgorithm::None => {
            log_error!(log, "Invalid PIMS algorithm specified.");
            Err(EosError::Value)
        }
    }
}

/// Arena requirement of initialization for the selected algorithm.
pub(crate) fn alg_init_mreq(params: &PimsParams) -> u64 {
    match params.alg {
        PimsAlgorithm::Baseline => baseline::init_mreq(&params.common),
        PimsAlgorithm::None => 0,
    }
}

/// Arena requirement of one streaming step for the selected algorithm.
pub(crate) fn alg_on_recv_mreq(params: &PimsParams) -> u64 {
    match params.alg {
        PimsAlgorithm::Baseline => baseline::on_recv_mreq(&params.common),
        PimsAlgorithm::None => 0,
    }
}

/// Select and initialize an algorithm over caller-owned state. Also the
/// stream reset used when bin definitions change.
pub(crate) fn alg_init(
    log: &mut Logger,
    params: &PimsParams,
    state: &mut PimsState<'_>,
) -> Result<(), EosError> {
    state.alg = params.alg;
    match params.alg {
        PimsAlgorithm::Baseline => baseline::init(&mut state.baseline),
        PimsAlgorithm::None => {
            log_error!(log, "Invalid PIMS algorithm specified.");
            Err(EosError::Value)
        }
    }
}

/// One streaming step through the selected algorithm.
pub(crate) fn alg_on_recv<'a>(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    obs: PimsObservationRef<'a>,
    params: &PimsParams,
    state: &mut PimsState<'a>,
) -> Result<PimsDetection, EosError> {
    match state.alg {
        PimsAlgorithm::Baseline => {
            baseline::on_recv(stack, log, obs, &params.common, &mut state.baseline)
        }
        PimsAlgorithm::None => {
            log_error!(log, "PIMS algorithm state is not initialized.");
            Err(EosError::PimsNotInitialized)
        }
    }
}
