//! Per-bin smoothing filters.
//!
//! Each filter reduces the current observation together with everything in
//! the queue (a population of `1 + queue.size()`) and overwrites the
//! current counts bin by bin. Every queued observation must agree with the
//! current bin count; the energy grids were already checked upstream.

use crate::log::{log_error, Logger};
use crate::memory::{aligned_nbytes, LifoStack};
use crate::status::EosError;
use crate::types::{BinCount, PimsCommonParams, PimsFilter, PimsObservationRef};

use super::queue::PimsQueue;

/// Arena bytes the configured filter needs per application.
pub(crate) fn filter_mreq(params: &PimsCommonParams) -> u64 {
    let max_bins = u64::from(params.max_bins);
    let count_size = core::mem::size_of::<BinCount>() as u64;
    match params.filter {
        // Per-bin u64 accumulators.
        PimsFilter::Mean => aligned_nbytes(8 * max_bins),
        // Per-bin column of every observation in the population.
        PimsFilter::Median => {
            aligned_nbytes(count_size * max_bins * (1 + u64::from(params.max_observations)))
        }
        PimsFilter::None | PimsFilter::Min | PimsFilter::Max => 0,
    }
}

fn check_queue_obs(
    log: &mut Logger,
    q_obs: &PimsObservationRef<'_>,
    num_bins: usize,
) -> Result<(), EosError> {
    if q_obs.bin_counts.len() != num_bins {
        log_error!(
            log,
            "Queued observation {} has {} bins, expected {num_bins}.",
            q_obs.observation_id,
            q_obs.bin_counts.len()
        );
        return Err(EosError::PimsBinsMismatch);
    }
    Ok(())
}

fn minimum_filter(
    log: &mut Logger,
    counts: &mut [BinCount],
    queue: &PimsQueue<'_>,
) -> Result<(), EosError> {
    for q_obs in queue.iter() {
        check_queue_obs(log, &q_obs, counts.len())?;
        for (bin, value) in counts.iter_mut().enumerate() {
            *value = (*value).min(q_obs.bin_counts[bin]);
        }
    }
    Ok(())
}

fn maximum_filter(
    log: &mut Logger,
    counts: &mut [BinCount],
    queue: &PimsQueue<'_>,
) -> Result<(), EosError> {
    for q_obs in queue.iter() {
        check_queue_obs(log, &q_obs, counts.len())?;
        for (bin, value) in counts.iter_mut().enumerate() {
            *value = (*value).max(q_obs.bin_counts[bin]);
        }
    }
    Ok(())
}

fn mean_filter(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    counts: &mut [BinCount],
    queue: &PimsQueue<'_>,
) -> Result<(), EosError> {
    let num_bins = counts.len();
    let mut sum_buf =
        stack.allocate_checked(8 * num_bins as u64, "sum over bins buffer", log)?;
    let sums = sum_buf.as_u64_mut(num_bins);

    for (bin, value) in counts.iter().enumerate() {
        sums[bin] = u64::from(*value);
    }
    for q_obs in queue.iter() {
        if let Err(err) = check_queue_obs(log, &q_obs, num_bins) {
            stack.deallocate(sum_buf, log)?;
            return Err(err);
        }
        for (bin, sum) in sums.iter_mut().enumerate() {
            *sum += u64::from(q_obs.bin_counts[bin]);
        }
    }

    // Integer division by the population size.
    let num_obs = u64::from(queue.size()) + 1;
    for (bin, value) in counts.iter_mut().enumerate() {
        *value = (sums[bin] / num_obs) as BinCount;
    }

    stack.deallocate(sum_buf, log)
}

fn median_filter(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    counts: &mut [BinCount],
    queue: &PimsQueue<'_>,
) -> Result<(), EosError> {
    let num_bins = counts.len();
    let num_obs = queue.size() as usize + 1;
    let count_size = core::mem::size_of::<BinCount>() as u64;
    let mut matrix_buf = stack.allocate_checked(
        count_size * (num_bins * num_obs) as u64,
        "copy of queue buffer",
        log,
    )?;
    let matrix = matrix_buf.as_counts_mut(num_bins * num_obs);

    // Rows are bins, columns are observations; the current observation
    // takes the last column.
    for (bin, value) in counts.iter().enumerate() {
        matrix[bin * num_obs + num_obs - 1] = *value;
    }
    for (obs_index, q_obs) in queue.iter().enumerate() {
        if let Err(err) = check_queue_obs(log, &q_obs, num_bins) {
            stack.deallocate(matrix_buf, log)?;
            return Err(err);
        }
        for bin in 0..num_bins {
            matrix[bin * num_obs + obs_index] = q_obs.bin_counts[bin];
        }
    }

    // Per-bin sort, then the average of the two central entries (the same
    // entry twice when the population is odd).
    for bin in 0..num_bins {
        let column = &mut matrix[bin * num_obs..(bin + 1) * num_obs];
        column.sort_unstable();
        let lo = u64::from(column[(num_obs - 1) / 2]);
        let hi = u64::from(column[num_obs / 2]);
        counts[bin] = ((lo + hi) / 2) as BinCount;
    }

    stack.deallocate(matrix_buf, log)
}

/// Apply `filter` to `counts` against the queued history.
pub(crate) fn apply(
    filter: PimsFilter,
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    counts: &mut [BinCount],
    queue: &PimsQueue<'_>,
) -> Result<(), EosError> {
    match filter {
        PimsFilter::None => Ok(()),
        PimsFilter::Min => minimum_filter(log, counts, queue),
        PimsFilter::Mean => mean_filter(stack, log, counts, queue),
        PimsFilter::Median => median_filter(stack, log, counts, queue),
        PimsFilter::Max => maximum_filter(log, counts, queue),
    }
}
