//! The partition assigner: a pure function mapping a consumer's 1-based
//! instance index to its stripe of partitions. No I/O, no state — this is
//! the one piece of the rebalancer that's trivially testable in isolation.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("number of instances {instance} cannot exceed maxPartitions {max_partitions}")]
pub struct TooManyInstances {
    pub instance: u32,
    pub max_partitions: u32,
}

/// `{instance, instance+total, instance+2*total, ...} ∩ [1, max_partitions]`.
///
/// For `total <= max_partitions`, the union over `instance in 1..=total` is
/// exactly `[1, max_partitions]` and the individual sets are pairwise
/// disjoint. The result is deterministic for fixed `(instance, total,
/// max_partitions)`, so consumers keep their partitions across rebalances
/// that don't change `total`.
pub fn partitions_for(instance: u32, total: u32, max_partitions: u32) -> Vec<u32> {
    debug_assert!(instance >= 1 && instance <= total);
    let mut partitions = Vec::new();
    let mut p = instance;
    while p <= max_partitions {
        partitions.push(p);
        p += total;
    }
    partitions
}

/// Validates that a newly joining consumer's instance index is sane before
/// computing its partitions.
pub fn new_consumer_partitions(
    instance: u32,
    total: u32,
    max_partitions: u32,
) -> Result<Vec<u32>, TooManyInstances> {
    if total > max_partitions {
        return Err(TooManyInstances {
            instance: total,
            max_partitions,
        });
    }
    Ok(partitions_for(instance, total, max_partitions))
}
