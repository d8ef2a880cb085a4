//! Baseline streaming change detector.
//!
//! Keeps the last smoothed spectrum and a queue of recent unsmoothed
//! observations. Each arriving observation is smoothed against the queue,
//! scored by its squared-L2 distance from the previous smoothed spectrum,
//! and flagged as a transition when the score reaches the threshold. Bin
//! definitions must stay stable within a stream; the caller re-initializes
//! the state on a mode change.

use crate::log::{log_error, Logger};
use crate::memory::{aligned_nbytes, LifoStack};
use crate::status::EosError;
use crate::types::{
    BinCount, PimsCommonParams, PimsDetection, PimsEvent, PimsObservationRef, PimsStateRequest,
};
use crate::util::uabs_diff;

use super::filters;
use super::{PimsBaselineState, PimsSmoothedObservation};

/// State sizing for the caller: one queue slot per retained observation
/// plus the smoothed count buffer.
pub(crate) fn state_request(params: &PimsCommonParams) -> PimsStateRequest {
    PimsStateRequest {
        queue_size: params.max_observations,
        max_bins: params.max_bins,
    }
}

pub(crate) fn init_mreq(_params: &PimsCommonParams) -> u64 {
    // Initialization only resets indices.
    0
}

pub(crate) fn init(state: &mut PimsBaselineState<'_>) -> Result<(), EosError> {
    state.queue.reset();
    Ok(())
}

/// Arena bytes per streaming step: the smoothed copy plus whatever the
/// configured filter takes.
pub(crate) fn on_recv_mreq(params: &PimsCommonParams) -> u64 {
    let count_size = core::mem::size_of::<BinCount>() as u64;
    aligned_nbytes(count_size * u64::from(params.max_bins)) + filters::filter_mreq(params)
}

/// True when `obs` carries the same bin layout as the stored spectrum,
/// with log-energies agreeing within 1e-6.
fn bin_definitions_match(
    last: &PimsSmoothedObservation<'_>,
    obs: &PimsObservationRef<'_>,
) -> bool {
    if last.num_bins as usize != obs.bin_counts.len()
        || last.bin_log_energies.len() != obs.bin_log_energies.len()
    {
        return false;
    }
    last.bin_log_energies
        .iter()
        .zip(obs.bin_log_energies)
        .all(|(a, b)| (a - b).abs() <= 1e-6)
}

/// Deep-copy `obs` into the state-owned smoothed slot. Counts land in the
/// slot's own buffer; the energy grid is shared by reference.
fn store_observation<'a>(
    obs: &PimsObservationRef<'a>,
    counts: &[BinCount],
    dst: &mut PimsSmoothedObservation<'a>,
) -> Result<(), EosError> {
    let n = counts.len();
    if n > dst.bin_counts.len() {
        return Err(EosError::Assert);
    }
    dst.observation_id = obs.observation_id;
    dst.timestamp = obs.timestamp;
    dst.mode = obs.mode;
    dst.num_bins = n as u32;
    dst.bin_counts[..n].copy_from_slice(counts);
    dst.bin_log_energies = obs.bin_log_energies;
    Ok(())
}

/// Squared-L2 distance between two count vectors of equal length, with the
/// per-bin difference widened to 64 bits before squaring.
fn squared_l2_diff(a: &[BinCount], b: &[BinCount]) -> u64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = u64::from(uabs_diff(u32::from(*x), u32::from(*y)));
            diff * diff
        })
        .sum()
}

/// One streaming step. The queue holds unsmoothed history; only the
/// stored "last" spectrum is smoothed.
pub(crate) fn on_recv<'a>(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    obs: PimsObservationRef<'a>,
    params: &PimsCommonParams,
    state: &mut PimsBaselineState<'a>,
) -> Result<PimsDetection, EosError> {
    let mut result = PimsDetection {
        event: PimsEvent::NoTransition,
        timestamp: obs.timestamp,
        score: 0.0,
    };

    if !state.queue.is_empty() {
        if !bin_definitions_match(&state.last_smoothed, &obs) {
            log_error!(
                log,
                "Observation {} bin definitions disagree with the stream.",
                obs.observation_id
            );
            return Err(EosError::PimsBinsMismatch);
        }

        let num_bins = obs.bin_counts.len();
        let count_size = core::mem::size_of::<BinCount>() as u64;
        let mut smoothed_buf = stack.allocate_checked(
            count_size * num_bins as u64,
            "smoothed bin counts buffer",
            log,
        )?;
        let smoothed = smoothed_buf.as_counts_mut(num_bins);
        smoothed.copy_from_slice(obs.bin_counts);

        filters::apply(params.filter, stack, log, smoothed, &state.queue)?;

        let score = squared_l2_diff(&state.last_smoothed.bin_counts[..num_bins], smoothed);
        store_observation(&obs, smoothed, &mut state.last_smoothed)?;

        result.score = score as f32;
        if result.score >= params.threshold {
            result.event = PimsEvent::Transition;
        }

        stack.deallocate(smoothed_buf, log)?;
    } else {
        // First observation of the stream seeds the smoothed spectrum.
        store_observation(&obs, obs.bin_counts, &mut state.last_smoothed)?;
    }

    if state.queue.is_full() {
        state.queue.pop()?;
    }
    state.queue.push(obs)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LifoArena;
    use crate::pims::PimsState;
    use crate::types::{PimsFilter, PimsStateRequest};

    const NUM_BINS: usize = 30;

    fn params(filter: PimsFilter, threshold: f32, max_observations: u32) -> PimsCommonParams {
        PimsCommonParams {
            filter,
            max_observations,
            threshold,
            max_bins: NUM_BINS as u32,
        }
    }

    fn obs<'a>(
        id: u32,
        counts: &'a [BinCount],
        energies: &'a [f32],
    ) -> PimsObservationRef<'a> {
        PimsObservationRef {
            observation_id: id,
            timestamp: 1000 + id,
            bin_counts: counts,
            bin_log_energies: energies,
            ..PimsObservationRef::default()
        }
    }

    fn state_for<'a>(params: &PimsCommonParams) -> PimsState<'a> {
        let mut state = PimsState::for_request(&PimsStateRequest {
            queue_size: params.max_observations,
            max_bins: params.max_bins,
        });
        init(&mut state.baseline).unwrap();
        state
    }

    fn step<'a>(
        arena: &mut LifoArena,
        obs_ref: PimsObservationRef<'a>,
        params: &PimsCommonParams,
        state: &mut PimsState<'a>,
    ) -> Result<PimsDetection, EosError> {
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let result = on_recv(&mut stack, &mut log, obs_ref, params, &mut state.baseline);
        if result.is_ok() {
            assert_eq!(stack.depth(), 0, "scratch must be released");
        }
        result
    }

    #[test]
    fn identity_filter_scores_the_step_change() {
        let params = params(PimsFilter::None, 60.0, 4);
        let energies = [0.25f32; NUM_BINS];
        let counts: Vec<[BinCount; NUM_BINS]> =
            (0..4).map(|v| [v as BinCount; NUM_BINS]).collect();
        let mut state = state_for(&params);
        let mut arena = LifoArena::self_allocated(on_recv_mreq(&params) + 20 * 8);

        let first = step(&mut arena, obs(0, &counts[0], &energies), &params, &mut state).unwrap();
        assert_eq!(first.event, PimsEvent::NoTransition);
        assert_eq!(first.score, 0.0);
        assert_eq!(first.timestamp, 1000);

        let second = step(&mut arena, obs(1, &counts[1], &energies), &params, &mut state).unwrap();
        assert_eq!(second.score, 30.0);
        assert_eq!(second.event, PimsEvent::NoTransition, "30 < 60");

        // A 31-bin observation is rejected and leaves the stream untouched.
        let wide_counts = [2 as BinCount; NUM_BINS + 1];
        let wide_energies = [0.25f32; NUM_BINS + 1];
        assert_eq!(
            step(&mut arena, obs(2, &wide_counts, &wide_energies), &params, &mut state),
            Err(EosError::PimsBinsMismatch)
        );
        assert_eq!(state.baseline.queue.size(), 2);
        assert_eq!(
            state.baseline.queue.tail_obs().unwrap().observation_id,
            1
        );

        // The jump from the last accepted spectrum (all ones) to all threes
        // is 4 * 30 = 120, at or above the threshold.
        let fourth = step(&mut arena, obs(3, &counts[3], &energies), &params, &mut state).unwrap();
        assert_eq!(fourth.score, 120.0);
        assert_eq!(fourth.event, PimsEvent::Transition);
    }

    #[test]
    fn transition_fires_exactly_at_the_threshold() {
        let params = params(PimsFilter::None, 30.0, 4);
        let energies = [1.0f32; NUM_BINS];
        let zeros = [0 as BinCount; NUM_BINS];
        let ones = [1 as BinCount; NUM_BINS];
        let mut state = state_for(&params);
        let mut arena = LifoArena::self_allocated(on_recv_mreq(&params) + 20 * 8);

        step(&mut arena, obs(0, &zeros, &energies), &params, &mut state).unwrap();
        let det = step(&mut arena, obs(1, &ones, &energies), &params, &mut state).unwrap();
        assert_eq!(det.score, 30.0);
        assert_eq!(det.event, PimsEvent::Transition, "score == threshold fires");
    }

    #[test]
    fn median_filter_over_three_prior_observations() {
        let params = params(PimsFilter::Median, 0.0, 3);
        let energies = [2.0f32; NUM_BINS];
        let counts: Vec<[BinCount; NUM_BINS]> =
            (0..6).map(|v| [v as BinCount; NUM_BINS]).collect();
        let mut state = state_for(&params);
        let mut arena = LifoArena::self_allocated(on_recv_mreq(&params) + 20 * 8);

        let mut scores = Vec::new();
        let mut smoothed_bin0 = Vec::new();
        for (id, c) in counts.iter().enumerate() {
            let det = step(&mut arena, obs(id as u32, c, &energies), &params, &mut state).unwrap();
            scores.push(det.score);
            smoothed_bin0.push(state.baseline.last_smoothed.bin_counts[0]);
        }

        assert_eq!(smoothed_bin0, vec![0, 0, 1, 1, 2, 3]);
        assert_eq!(scores, vec![0.0, 0.0, 30.0, 0.0, 30.0, 30.0]);
    }

    #[test]
    fn queue_drops_the_oldest_once_full() {
        let params = params(PimsFilter::None, f32::MAX, 2);
        let energies = [0.5f32; NUM_BINS];
        let counts: Vec<[BinCount; NUM_BINS]> =
            (0..4).map(|v| [v as BinCount; NUM_BINS]).collect();
        let mut state = state_for(&params);
        let mut arena = LifoArena::self_allocated(on_recv_mreq(&params) + 20 * 8);

        for (id, c) in counts.iter().enumerate() {
            step(&mut arena, obs(id as u32, c, &energies), &params, &mut state).unwrap();
        }
        let ids: Vec<u32> = state
            .baseline
            .queue
            .iter()
            .map(|o| o.observation_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn energy_grid_drift_is_a_bins_mismatch() {
        let params = params(PimsFilter::None, 0.0, 4);
        let energies = [1.0f32; NUM_BINS];
        let mut drifted = energies;
        drifted[7] += 1e-3;
        let zeros = [0 as BinCount; NUM_BINS];
        let mut state = state_for(&params);
        let mut arena = LifoArena::self_allocated(on_recv_mreq(&params) + 20 * 8);

        step(&mut arena, obs(0, &zeros, &energies), &params, &mut state).unwrap();
        assert_eq!(
            step(&mut arena, obs(1, &zeros, &drifted), &params, &mut state),
            Err(EosError::PimsBinsMismatch)
        );

        // Re-initialization accepts the new grid, as after a mode change.
        init(&mut state.baseline).unwrap();
        let det = step(&mut arena, obs(2, &zeros, &drifted), &params, &mut state).unwrap();
        assert_eq!(det.event, PimsEvent::NoTransition);
    }
}
