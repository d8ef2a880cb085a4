//! # eos-core
//!
//! Onboard anomaly detection for a planetary spacecraft carrying three
//! science instruments: a thermal imager (E-THEMIS), a spectral imager
//! (MISE), and a charged-particle spectrometer (PIMS). Observations arrive
//! one at a time; each call surfaces the most anomalous pixels or flags a
//! mode transition, inside a pre-declared memory budget and without heap
//! allocation in steady state.
//!
//! All public calls go through the [`Eos`] handle, which owns the three
//! process-lifetime resources: the LIFO arena, the log sink, and the
//! recorded initialization envelope. Everything else (observations,
//! result arrays, streaming state) is caller-owned and only borrowed for
//! the duration of a call. The library is single-threaded by contract:
//! every entry point runs to completion, takes its arena scratch in LIFO
//! order, and releases it before returning.

#![deny(unsafe_code)]

pub mod data;
mod ethemis;
pub mod heap;
pub mod log;
#[allow(unsafe_code)]
pub mod memory;
mod mise;
pub mod params;
pub mod pims;
pub mod status;
pub mod types;
pub mod util;

pub use log::{LogLevel, LogSink, Logger};
pub use params::init_default_params;
pub use pims::{PimsBaselineState, PimsQueue, PimsSmoothedObservation, PimsState};
pub use status::EosError;
pub use types::*;

use crate::log::log_info;
use crate::memory::{LifoArena, ALIGN_SIZE, STACK_MAX_DEPTH};

/// The library handle. One instance owns the arena and the log sink; its
/// methods are the public entry points.
pub struct Eos {
    arena: LifoArena,
    log: Logger,
    init_params: EosInitParams,
}

impl Eos {
    /// Arena bytes needed to support any call made within `params`'
    /// worst-case envelope: the pointwise maximum over every entry point's
    /// own requirement, plus one alignment unit of slack per stack slot.
    pub fn memory_requirement(params: &EosInitParams) -> u64 {
        let mut call_size = 0u64;
        // Thermal detection takes no scratch.
        call_size = call_size.max(mise::detect_anomaly_rx_mreq(u64::from(params.mise_max_bands)));
        call_size = call_size.max(pims::alg_init_mreq(&params.pims_params));
        call_size = call_size.max(pims::alg_on_recv_mreq(&params.pims_params));
        call_size + STACK_MAX_DEPTH as u64 * ALIGN_SIZE
    }

    /// Bind the arena and log sink. `initial_memory` of `None` allocates a
    /// region of exactly the computed requirement once, here; a provided
    /// region has any leading misalignment trimmed and must still cover
    /// the requirement.
    pub fn init(
        params: &EosInitParams,
        initial_memory: Option<Box<[u8]>>,
        log_sink: Option<LogSink>,
    ) -> Result<Self, EosError> {
        let mut log = Logger::new(log_sink);
        let required_nbytes = Self::memory_requirement(params);
        let arena = match initial_memory {
            Some(region) => LifoArena::with_region(region, required_nbytes, &mut log)?,
            None => {
                log_info!(
                    log,
                    "No memory provided, so allocate our own memory ({required_nbytes} bytes)."
                );
                LifoArena::self_allocated(required_nbytes)
            }
        };
        log_info!(log, "Memory initialization successful.");
        Ok(Self {
            arena,
            log,
            init_params: *params,
        })
    }

    /// Release the arena and the log sink. Explicit form of dropping the
    /// handle.
    pub fn teardown(self) {}

    /// The worst-case envelope the handle was initialized with.
    pub fn init_params(&self) -> &EosInitParams {
        &self.init_params
    }

    /// Per-band hot-pixel scan. Each band's requested result count is the
    /// length of its result slice; `result.n_results` receives the counts
    /// actually produced, in descending score order.
    pub fn ethemis_detect_anomaly(
        &mut self,
        params: &EthemisParams,
        observation: &EthemisObservation,
        result: &mut EthemisDetectionResult,
    ) -> Result<(), EosError> {
        params::ethemis_params_check(&mut self.log, params)?;
        for band in 0..ETHEMIS_N_BANDS {
            result.n_results[band] = ethemis::detect_anomaly_band(
                observation.band_shape[band],
                &observation.band_data[band],
                params.band_threshold[band],
                &mut result.band_results[band],
            )?;
        }
        Ok(())
    }

    /// Rank all pixels of a spectral cube by RX score and return the
    /// strongest `result.results.len()` of them, descending.
    pub fn mise_detect_anomaly(
        &mut self,
        params: &MiseParams,
        observation: &MiseObservation,
        result: &mut MiseDetectionResult,
    ) -> Result<(), EosError> {
        params::mise_params_check(&mut self.log, params)?;
        let Self { arena, log, .. } = self;
        let mut stack = arena.stack();
        match params.alg {
            MiseAlgorithm::Rx => mise::detect_anomaly_rx(
                &mut stack,
                log,
                observation.shape,
                &observation.data,
                result,
            ),
        }
    }

    /// State sizing for the selected particle algorithm; feed the request
    /// to [`PimsState::for_request`] before initializing.
    pub fn pims_state_request(
        &mut self,
        params: &PimsParams,
    ) -> Result<PimsStateRequest, EosError> {
        pims::alg_state_request(&mut self.log, params)
    }

    /// Select and initialize a particle algorithm over caller-owned state.
    /// Also the stream reset to use when bin definitions change.
    pub fn pims_init(
        &mut self,
        params: &PimsParams,
        state: &mut PimsState<'_>,
    ) -> Result<(), EosError> {
        params::pims_params_check(&mut self.log, params)?;
        pims::alg_init(&mut self.log, params, state)
    }

    /// One particle streaming step: smooth the observation against recent
    /// history, score the change, and flag a transition at the threshold.
    pub fn pims_on_recv<'a>(
        &mut self,
        observation: PimsObservationRef<'a>,
        params: &PimsParams,
        state: &mut PimsState<'a>,
    ) -> Result<PimsDetection, EosError> {
        let Self { arena, log, .. } = self;
        let mut stack = arena.stack();
        pims::alg_on_recv(&mut stack, log, observation, params, state)
    }

    /// Parse a thermal observation file into caller-allocated storage.
    pub fn load_ethemis(
        &mut self,
        bytes: &[u8],
        observation: &mut EthemisObservation,
    ) -> Result<(), EosError> {
        data::load_ethemis(&mut self.log, bytes, observation)
    }

    /// Parse a spectral observation file into caller-allocated storage.
    pub fn load_mise(
        &mut self,
        bytes: &[u8],
        observation: &mut MiseObservation,
    ) -> Result<(), EosError> {
        data::load_mise(&mut self.log, bytes, observation)
    }

    /// Parse a particle observation file into caller-allocated storage
    /// (size it with [`Eos::pims_observation_attributes`] first).
    pub fn load_pims(
        &mut self,
        bytes: &[u8],
        file: &mut PimsObservationsFile,
    ) -> Result<(), EosError> {
        data::load_pims(&mut self.log, bytes, file)
    }

    /// Peek a particle file's header so destination storage can be
    /// allocated before the full load.
    pub fn pims_observation_attributes(
        &mut self,
        bytes: &[u8],
    ) -> Result<PimsFileAttributes, EosError> {
        data::pims_observation_attributes(&mut self.log, bytes)
    }
}

impl core::fmt::Debug for Eos {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Eos")
            .field("arena_bytes", &self.arena.usable_size())
            .field("init_params", &self.init_params)
            .finish()
    }
}
