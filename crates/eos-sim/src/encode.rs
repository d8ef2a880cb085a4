//! Wire-format writers for synthetic observation files.
//!
//! The generators exist so the simulator can exercise the onboard loaders
//! without flight data on hand: anything written here must load back
//! through the core byte-for-byte.

use byteorder::{BigEndian, ByteOrder};

use eos_core::data::{
    padding_nbytes, ETHEMIS_MAGIC, FORMAT_VERSION_1, MISE_MAGIC, PIMS_MAGIC,
};
use eos_core::{
    EthemisObservation, MiseObservation, ObsShape, PimsObservationsFile, ETHEMIS_N_BANDS,
};

fn frame(magic: &[u8]) -> Vec<u8> {
    let mut bytes = magic.to_vec();
    bytes.resize(magic.len() + padding_nbytes(magic.len()), 0xFF);
    bytes.push(FORMAT_VERSION_1);
    bytes
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    let mut raw = [0u8; 4];
    BigEndian::write_u32(&mut raw, value);
    bytes.extend_from_slice(&raw);
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    let mut raw = [0u8; 2];
    BigEndian::write_u16(&mut raw, value);
    bytes.extend_from_slice(&raw);
}

fn push_f32(bytes: &mut Vec<u8>, value: f32) {
    let mut raw = [0u8; 4];
    BigEndian::write_f32(&mut raw, value);
    bytes.extend_from_slice(&raw);
}

/// Serialize a thermal observation.
pub fn encode_ethemis(obs: &EthemisObservation) -> Vec<u8> {
    let mut bytes = frame(ETHEMIS_MAGIC);
    push_u32(&mut bytes, obs.observation_id);
    push_u32(&mut bytes, obs.timestamp);
    for band in 0..ETHEMIS_N_BANDS {
        push_u32(&mut bytes, obs.band_shape[band].cols);
        push_u32(&mut bytes, obs.band_shape[band].rows);
    }
    for band in 0..ETHEMIS_N_BANDS {
        let n = (obs.band_shape[band].rows * obs.band_shape[band].cols) as usize;
        for &sample in &obs.band_data[band][..n] {
            push_u16(&mut bytes, sample);
        }
    }
    bytes
}

/// Serialize a spectral observation.
pub fn encode_mise(obs: &MiseObservation) -> Vec<u8> {
    let mut bytes = frame(MISE_MAGIC);
    push_u32(&mut bytes, obs.observation_id);
    push_u32(&mut bytes, obs.timestamp);
    push_u32(&mut bytes, obs.shape.cols);
    push_u32(&mut bytes, obs.shape.rows);
    push_u32(&mut bytes, obs.shape.bands);
    let n = (obs.shape.n_pixels() * u64::from(obs.shape.bands)) as usize;
    for &sample in &obs.data[..n] {
        push_u16(&mut bytes, sample);
    }
    bytes
}

/// Serialize a particle observation file. Mode bin lists shorter than
/// `max_bins` are closed with the infinity sentinel.
pub fn encode_pims(file: &PimsObservationsFile) -> Vec<u8> {
    let mut bytes = frame(PIMS_MAGIC);
    push_u32(&mut bytes, file.file_id);
    push_u32(&mut bytes, file.num_modes);
    push_u32(&mut bytes, file.max_bins);
    push_u32(&mut bytes, file.num_observations);

    for mode in &file.modes_info[..file.num_modes as usize] {
        for bin in 0..file.max_bins {
            if bin < mode.num_bins {
                push_f32(&mut bytes, mode.bin_log_energies[bin as usize]);
            } else {
                push_f32(&mut bytes, f32::INFINITY);
            }
        }
    }
    for obs in &file.observations[..file.num_observations as usize] {
        push_u32(&mut bytes, obs.observation_id);
        push_u32(&mut bytes, obs.timestamp);
        push_u32(&mut bytes, obs.num_bins);
        push_u32(&mut bytes, obs.mode as u32);
        for bin in 0..file.max_bins as usize {
            push_u32(&mut bytes, u32::from(obs.bin_counts[bin]));
        }
    }
    bytes
}

/// A synthetic thermal observation: a low gradient with a few planted hot
/// pixels per band.
pub fn synthetic_ethemis(rows: u32, cols: u32) -> EthemisObservation {
    let shape = ObsShape {
        rows,
        cols,
        bands: 1,
    };
    let mut obs = EthemisObservation::with_capacity([(rows * cols) as usize; ETHEMIS_N_BANDS]);
    obs.observation_id = 1;
    obs.timestamp = 0;
    for band in 0..ETHEMIS_N_BANDS {
        obs.band_shape[band] = shape;
        for row in 0..rows {
            for col in 0..cols {
                obs.band_data[band][(row * cols + col) as usize] =
                    ((row + col) % 16) as u16 + band as u16;
            }
        }
        if rows > 0 && cols > 0 {
            // One hot pixel per band, away from the origin.
            let hot = ((rows / 2) * cols + cols / 2) as usize;
            obs.band_data[band][hot] = 4000 + 100 * band as u16;
        }
    }
    obs
}

/// A synthetic spectral cube: smooth spectra with one anomalous pixel.
pub fn synthetic_mise(rows: u32, cols: u32, bands: u32) -> MiseObservation {
    let mut obs = MiseObservation::with_capacity((rows * cols * bands) as usize);
    obs.observation_id = 1;
    obs.timestamp = 0;
    obs.shape = ObsShape { rows, cols, bands };
    for pixel in 0..(rows * cols) {
        for band in 0..bands {
            obs.data[(pixel * bands + band) as usize] = (100 + band % 37) as u16;
        }
    }
    if rows > 0 && cols > 0 {
        let anomaly = (rows / 2) * cols + cols / 2;
        for band in 0..bands {
            obs.data[(anomaly * bands + band) as usize] = (900 + band % 23) as u16;
        }
    }
    obs
}

/// A synthetic particle file: one mode, flat spectra with a step change
/// halfway through the stream.
pub fn synthetic_pims(num_bins: u32, num_observations: u32) -> PimsObservationsFile {
    let mut file = PimsObservationsFile::with_capacity(1, num_bins, num_observations);
    file.file_id = 1;
    file.num_modes = 1;
    file.max_bins = num_bins;
    file.num_observations = num_observations;

    file.modes_info[0].num_bins = num_bins;
    for bin in 0..num_bins as usize {
        file.modes_info[0].bin_log_energies[bin] = 0.1 * bin as f32;
    }

    for i in 0..num_observations as usize {
        let obs = &mut file.observations[i];
        obs.observation_id = i as u32;
        obs.timestamp = 10 * i as u32;
        obs.num_bins = num_bins;
        let level = if i as u32 >= num_observations / 2 { 40 } else { 10 };
        for bin in 0..num_bins as usize {
            obs.bin_counts[bin] = level;
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use eos_core::{init_default_params, Eos, EosInitParams};

    fn handle() -> Eos {
        let params = EosInitParams {
            pims_params: init_default_params().pims,
            mise_max_bands: 8,
        };
        Eos::init(&params, None, None).unwrap()
    }

    #[test]
    fn ethemis_round_trips_through_the_loader() {
        let obs = synthetic_ethemis(6, 4);
        let bytes = encode_ethemis(&obs);

        let mut eos = handle();
        let mut loaded = EthemisObservation::with_capacity([24; ETHEMIS_N_BANDS]);
        eos.load_ethemis(&bytes, &mut loaded).expect("round trip");

        assert_eq!(loaded.observation_id, obs.observation_id);
        for band in 0..ETHEMIS_N_BANDS {
            assert_eq!(loaded.band_shape[band], obs.band_shape[band]);
            assert_eq!(loaded.band_data[band][..24], obs.band_data[band][..24]);
        }
    }

    #[test]
    fn mise_round_trips_through_the_loader() {
        let obs = synthetic_mise(3, 3, 5);
        let bytes = encode_mise(&obs);

        let mut eos = handle();
        let mut loaded = MiseObservation::with_capacity(45);
        eos.load_mise(&bytes, &mut loaded).expect("round trip");
        assert_eq!(loaded.shape, obs.shape);
        assert_eq!(loaded.data, obs.data);
    }

    #[test]
    fn pims_round_trips_through_the_loader() {
        let file = synthetic_pims(10, 4);
        let bytes = encode_pims(&file);

        let mut eos = handle();
        let attrs = eos.pims_observation_attributes(&bytes).expect("peek");
        assert_eq!(attrs.num_modes, 1);
        assert_eq!(attrs.max_bins, 10);
        assert_eq!(attrs.num_observations, 4);

        let mut loaded =
            PimsObservationsFile::with_capacity(attrs.num_modes, attrs.max_bins, attrs.num_observations);
        eos.load_pims(&bytes, &mut loaded).expect("round trip");
        assert_eq!(loaded.modes_info[0].num_bins, 10);
        for i in 0..4 {
            let a = loaded.observation(i);
            let b = file.observation(i);
            assert_eq!(a.bin_counts, b.bin_counts);
            assert_eq!(a.bin_log_energies, b.bin_log_energies);
        }
    }
}
