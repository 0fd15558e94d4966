//! Sub-job split-threshold math (spec.md §4.6).

use farmcore_lib::PairId;

/// Whether a primary job with `pair_count` pairs should be split, given
/// `cpu_count` workers and the job-size coefficient `k`.
pub fn should_split(pair_count: usize, cpu_count: usize, k: usize) -> bool {
    pair_count > cpu_count * k
}

/// `num_subjobs = ceil(P / (C*K))`.
pub fn num_subjobs(pair_count: usize, cpu_count: usize, k: usize) -> u32 {
    let threshold = (cpu_count * k).max(1);
    div_ceil(pair_count, threshold) as u32
}

/// `job_size = ceil(P / num_subjobs)`.
pub fn job_size(pair_count: usize, num_subjobs: u32) -> usize {
    div_ceil(pair_count, num_subjobs.max(1) as usize)
}

fn div_ceil(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Partitions `pairs` into `num_subjobs` contiguous chunks of at most
/// `job_size` each. The last chunk may be shorter.
pub fn partition_pairs(pairs: &[PairId], num_subjobs: u32, job_size: usize) -> Vec<Vec<PairId>> {
    let mut chunks = Vec::with_capacity(num_subjobs as usize);
    for chunk in pairs.chunks(job_size.max(1)) {
        chunks.push(chunk.to_vec());
    }
    chunks
}
