//! JSON parameter configuration.
//!
//! Every field is optional; omitted settings keep the library defaults.
//! Unknown algorithm or filter names fall back to "none" with a warning,
//! so a typo degrades loudly instead of silently picking a detector.

use std::path::Path;

use serde::Deserialize;

use eos_core::{
    init_default_params, EosParams, EthemisParams, MiseAlgorithm, PimsAlgorithm, PimsFilter,
    ETHEMIS_N_BANDS,
};

use crate::SimError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub ethemis: EthemisConfig,
    #[serde(default)]
    pub mise: MiseConfig,
    #[serde(default)]
    pub pims: PimsConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EthemisConfig {
    pub band_threshold: Option<[u16; ETHEMIS_N_BANDS]>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiseConfig {
    pub algorithm: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PimsConfig {
    pub algorithm: Option<String>,
    pub filter: Option<String>,
    pub threshold: Option<f32>,
    pub max_observations: Option<u32>,
}

pub fn parse_mise_algorithm(name: &str) -> Option<MiseAlgorithm> {
    match name.to_ascii_lowercase().as_str() {
        "rx" => Some(MiseAlgorithm::Rx),
        _ => None,
    }
}

pub fn parse_pims_algorithm(name: &str) -> PimsAlgorithm {
    match name.to_ascii_lowercase().as_str() {
        "baseline" => PimsAlgorithm::Baseline,
        _ => {
            eprintln!("WARNING: Algorithm will be set to 'none' as no options matched.");
            PimsAlgorithm::None
        }
    }
}

pub fn parse_pims_filter(name: &str) -> PimsFilter {
    match name.to_ascii_lowercase().as_str() {
        "none" => PimsFilter::None,
        "min" => PimsFilter::Min,
        "mean" => PimsFilter::Mean,
        "median" => PimsFilter::Median,
        "max" => PimsFilter::Max,
        _ => {
            eprintln!("WARNING: Filter will be set to 'none' as no options matched.");
            PimsFilter::None
        }
    }
}

impl ConfigFile {
    /// Overlay this file on the library defaults.
    pub fn into_params(self) -> Result<EosParams, SimError> {
        let mut params = init_default_params();

        if let Some(thresholds) = self.ethemis.band_threshold {
            params.ethemis = EthemisParams {
                band_threshold: thresholds,
            };
        }
        if let Some(name) = self.mise.algorithm.as_deref() {
            params.mise.alg = parse_mise_algorithm(name)
                .ok_or_else(|| SimError::Config(format!("unknown MISE algorithm \"{name}\"")))?;
        }
        if let Some(name) = self.pims.algorithm.as_deref() {
            params.pims.alg = parse_pims_algorithm(name);
        }
        if let Some(name) = self.pims.filter.as_deref() {
            params.pims.common.filter = parse_pims_filter(name);
        }
        if let Some(threshold) = self.pims.threshold {
            params.pims.common.threshold = threshold;
        }
        if let Some(max_observations) = self.pims.max_observations {
            params.pims.common.max_observations = max_observations;
        }
        Ok(params)
    }
}

/// Load parameters from an optional JSON config path; `None` keeps every
/// default.
pub fn load(path: Option<&Path>) -> Result<EosParams, SimError> {
    let Some(path) = path else {
        eprintln!("INFO: No config file provided; using defaults.");
        return Ok(init_default_params());
    };
    let text = std::fs::read_to_string(path)?;
    let file: ConfigFile = serde_json::from_str(&text)?;
    file.into_params()
}
