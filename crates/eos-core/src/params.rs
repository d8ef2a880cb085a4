//! Parameter defaults and validation guards.
//!
//! Each detector validates its parameter bundle on entry. A failed check
//! logs the textual form of the failing condition and surfaces as the
//! generic parameter error; the log carries the specific cause.

use crate::log::{log_error, Logger};
use crate::status::EosError;
use crate::types::{
    EosParams, EthemisParams, MiseAlgorithm, MiseParams, PimsAlgorithm, PimsCommonParams,
    PimsFilter, PimsParams,
};

// Default E-THEMIS parameters.
const DEFAULT_ETHEMIS_BAND_THRESHOLD: u16 = 0;

// Default MISE parameters.
const DEFAULT_MISE_ALG: MiseAlgorithm = MiseAlgorithm::Rx;

// Default PIMS parameters.
const DEFAULT_PIMS_ALG: PimsAlgorithm = PimsAlgorithm::Baseline;
const DEFAULT_PIMS_FILTER: PimsFilter = PimsFilter::Median;
const DEFAULT_PIMS_THRESHOLD: f32 = 0.0;
const DEFAULT_PIMS_MAX_OBS: u32 = 1000;
const DEFAULT_PIMS_MAX_BINS: u32 = 100;

pub(crate) fn base_check(log: &mut Logger, ok: bool, check_str: &str) -> Result<(), EosError> {
    if ok {
        Ok(())
    } else {
        log_error!(log, "Parameter check \"{check_str}\" failed");
        Err(EosError::Param)
    }
}

/// Validate a condition, logging its textual form on failure.
macro_rules! param_check {
    ($log:expr, $cond:expr) => {
        $crate::params::base_check($log, $cond, stringify!($cond))
    };
}

macro_rules! param_gte_one {
    ($log:expr, $p:expr) => {
        $crate::params::base_check($log, $p >= 1, concat!(stringify!($p), " >= 1"))
    };
}

/// Fill every parameter set with its defaults.
pub fn init_default_params() -> EosParams {
    EosParams {
        ethemis: EthemisParams {
            band_threshold: [DEFAULT_ETHEMIS_BAND_THRESHOLD; 3],
        },
        mise: MiseParams {
            alg: DEFAULT_MISE_ALG,
        },
        pims: PimsParams {
            alg: DEFAULT_PIMS_ALG,
            common: PimsCommonParams {
                filter: DEFAULT_PIMS_FILTER,
                max_observations: DEFAULT_PIMS_MAX_OBS,
                threshold: DEFAULT_PIMS_THRESHOLD,
                max_bins: DEFAULT_PIMS_MAX_BINS,
            },
        },
    }
}

pub(crate) fn ethemis_params_check(
    _log: &mut Logger,
    _params: &EthemisParams,
) -> Result<(), EosError> {
    // No range constraints at present; thresholds cover the full u16 span.
    Ok(())
}

pub(crate) fn mise_params_check(
    _log: &mut Logger,
    params: &MiseParams,
) -> Result<(), EosError> {
    // The algorithm enum is exhaustive today; the match keeps this check in
    // the call path for when more algorithms land.
    match params.alg {
        MiseAlgorithm::Rx => Ok(()),
    }
}

pub(crate) fn pims_params_check(log: &mut Logger, params: &PimsParams) -> Result<(), EosError> {
    // Only 'baseline' exists currently.
    param_check!(log, params.alg == PimsAlgorithm::Baseline)?;
    param_gte_one!(log, params.common.max_bins)?;
    param_gte_one!(log, params.common.max_observations)?;
    Ok(())
}

/// Validate every parameter set.
pub fn params_check(log: &mut Logger, params: &EosParams) -> Result<(), EosError> {
    ethemis_params_check(log, &params.ethemis)?;
    mise_params_check(log, &params.mise)?;
    pims_params_check(log, &params.pims)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_their_own_checks() {
        let mut log = Logger::disabled();
        let params = init_default_params();
        params_check(&mut log, &params).expect("defaults must be valid");
        assert_eq!(params.ethemis.band_threshold, [0, 0, 0]);
        assert_eq!(params.pims.common.max_observations, 1000);
        assert_eq!(params.pims.common.max_bins, 100);
        assert_eq!(params.pims.common.filter, PimsFilter::Median);
        assert_eq!(params.pims.common.threshold, 0.0);
    }

    #[test]
    fn unselected_pims_algorithm_is_a_parameter_error() {
        let mut log = Logger::disabled();
        let mut params = init_default_params();
        params.pims.alg = PimsAlgorithm::None;
        assert_eq!(
            params_check(&mut log, &params),
            Err(EosError::Param)
        );
    }

    #[test]
    fn zero_pims_limits_are_parameter_errors() {
        let mut log = Logger::disabled();
        let mut params = init_default_params();
        params.pims.common.max_bins = 0;
        assert_eq!(params_check(&mut log, &params), Err(EosError::Param));

        let mut params = init_default_params();
        params.pims.common.max_observations = 0;
        assert_eq!(params_check(&mut log, &params), Err(EosError::Param));
    }
}
