//! Planning of the morton code sorts.
//!
//! Small light lists are sorted by a single workgroup, either with a radix
//! sort or a bitonic network. Larger ones are radix sorted in chunks, then
//! merged pairwise, doubling the chunk size every round until a single chunk
//! is left. Each merge round first computes merge path partitions so every
//! workgroup merges an independent slice of the output.
//!
//! Every radix or merge dispatch moves the data to the other slot of the
//! ping-pong buffers, so the plan tracks where the sorted data ends up.

use lightgrid_types::LightType;

use crate::{
    pass::{
        limits::{BITONIC_MAX_ELEMENTS, MERGE_NUM_THREADS, MERGE_VALUES_PER_GROUP, RADIX_NUM_THREADS},
        DispatchGroups, DispatchParams, Kernel, PushConstants,
    },
    ping_pong::Slot,
    util::math::round_up_div,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortStrategy {
    /// One workgroup, one value per thread.
    Radix,
    /// One workgroup, in place.
    Bitonic,
    /// Chunked radix sort followed by merge rounds.
    MergeSort,
}

impl SortStrategy {
    pub fn for_count(count: u32) -> Self {
        if count <= RADIX_NUM_THREADS {
            Self::Radix
        } else if count <= BITONIC_MAX_ELEMENTS {
            Self::Bitonic
        } else {
            Self::MergeSort
        }
    }
}

/// One round of the merge sort: pairs of sorted chunks of `chunk_size`
/// values are merged into chunks twice as large. An unpaired last chunk is
/// merged with nothing, which copies it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MergeRound {
    pub chunk_size: u32,
    pub num_sort_groups: u32,
    pub groups_per_sort_group: u32,
}

impl MergeRound {
    /// One partition per merge workgroup boundary, both ends included.
    pub fn partitions_per_sort_group(&self) -> u32 {
        self.groups_per_sort_group + 1
    }

    pub fn total_partitions(&self) -> u32 {
        self.partitions_per_sort_group() * self.num_sort_groups
    }

    pub fn merge_groups(&self) -> u32 {
        self.groups_per_sort_group * self.num_sort_groups
    }
}

/// Number of radix sorted chunks the merge sort starts from.
pub fn chunk_count(count: u32) -> u32 {
    round_up_div(count, RADIX_NUM_THREADS)
}

pub fn merge_rounds(count: u32) -> Vec<MergeRound> {
    let mut rounds = Vec::new();
    let mut num_chunks = chunk_count(count);
    let mut chunk_size = RADIX_NUM_THREADS;
    while num_chunks > 1 {
        rounds.push(MergeRound {
            chunk_size,
            num_sort_groups: round_up_div(num_chunks, 2),
            groups_per_sort_group: round_up_div(chunk_size * 2, MERGE_VALUES_PER_GROUP),
        });
        num_chunks = round_up_div(num_chunks, 2);
        chunk_size *= 2;
    }
    rounds
}

/// Size of the merge path partition buffer needed to sort `count` values.
pub fn merge_partition_capacity(count: u32) -> u32 {
    merge_rounds(count)
        .iter()
        .map(MergeRound::total_partitions)
        .max()
        .unwrap_or(0)
        .max(1)
}

/// Number of values taken from `a` among the first `diag` values of the
/// merge of `a` and `b`. Ties are taken from `a` first.
pub fn merge_path(a: &[u32], b: &[u32], diag: usize) -> usize {
    let mut begin = diag.saturating_sub(b.len());
    let mut end = diag.min(a.len());
    while begin < end {
        let mid = (begin + end) / 2;
        if a[mid] <= b[diag - 1 - mid] {
            begin = mid + 1;
        } else {
            end = mid;
        }
    }
    begin
}

/// Slot holding the sorted values once `count` values written to `input`
/// went through their [`SortPlan`].
pub fn sorted_slot(count: u32, input: Slot) -> Slot {
    match SortStrategy::for_count(count) {
        SortStrategy::Radix => input.other(),
        SortStrategy::Bitonic => input,
        SortStrategy::MergeSort => {
            // The radix pass moves the values once, every round once more.
            if merge_rounds(count).len() % 2 == 0 {
                input.other()
            } else {
                input
            }
        }
    }
}

/// The dispatches sorting the morton codes of one light type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPlan {
    pub light_type: LightType,
    pub strategy: SortStrategy,
    pub count: u32,
    /// Slot the morton codes are written to before sorting.
    pub input: Slot,
    /// Slot holding the sorted codes and indices once the plan ran.
    pub output: Slot,
    pub params: DispatchParams,
}

impl SortPlan {
    pub fn new(light_type: LightType, count: u32, input: Slot) -> Self {
        let strategy = SortStrategy::for_count(count);
        let mut params = DispatchParams::new();
        let radix = |input| Kernel::RadixSort { light_type, input };

        let output = match strategy {
            SortStrategy::Radix => {
                params.dispatch(
                    radix(input),
                    DispatchGroups::linear(1),
                    Some(PushConstants::two(count, RADIX_NUM_THREADS)),
                );
                input.other()
            }
            SortStrategy::Bitonic => {
                params.dispatch(
                    Kernel::BitonicSort { light_type, slot: input },
                    DispatchGroups::linear(1),
                    Some(PushConstants::two(count, count.next_power_of_two())),
                );
                input
            }
            SortStrategy::MergeSort => {
                params.dispatch(
                    radix(input),
                    DispatchGroups::linear(chunk_count(count)),
                    Some(PushConstants::two(count, RADIX_NUM_THREADS)),
                );
                let mut source = input.other();
                for round in merge_rounds(count) {
                    let push = Some(PushConstants::two(count, round.chunk_size));
                    params.barrier();
                    params.dispatch(
                        Kernel::MergePathPartitions {
                            light_type,
                            input: source,
                        },
                        DispatchGroups::linear(round_up_div(round.total_partitions(), MERGE_NUM_THREADS)),
                        push,
                    );
                    params.barrier();
                    params.dispatch(
                        Kernel::MergeSort {
                            light_type,
                            input: source,
                        },
                        DispatchGroups::linear(round.merge_groups()),
                        push,
                    );
                    source = source.other();
                }
                source
            }
        };

        Self {
            light_type,
            strategy,
            count,
            input,
            output,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::DispatchStep;

    #[test]
    fn strategies() {
        assert_eq!(SortStrategy::for_count(1), SortStrategy::Radix);
        assert_eq!(SortStrategy::for_count(256), SortStrategy::Radix);
        assert_eq!(SortStrategy::for_count(257), SortStrategy::Bitonic);
        assert_eq!(SortStrategy::for_count(1024), SortStrategy::Bitonic);
        assert_eq!(SortStrategy::for_count(1025), SortStrategy::MergeSort);
    }

    #[test]
    fn rounds_double_until_one_chunk() {
        let rounds = merge_rounds(5000);
        let sizes: Vec<_> = rounds.iter().map(|r| r.chunk_size).collect();
        assert_eq!(sizes, [256, 512, 1024, 2048, 4096]);
        let groups: Vec<_> = rounds.iter().map(|r| r.num_sort_groups).collect();
        // 20 chunks, then 10, 5, 3 and 2.
        assert_eq!(groups, [10, 5, 3, 2, 1]);
        assert_eq!(rounds[4].groups_per_sort_group, 8);
        assert!(merge_rounds(256).is_empty());
        assert!(merge_partition_capacity(5000) >= rounds.iter().map(MergeRound::total_partitions).max().unwrap());
    }

    #[test]
    fn output_slot_follows_dispatches() {
        for count in [1, 200, 600, 1025, 5000, 70_000] {
            for input in Slot::ARRAY {
                let plan = SortPlan::new(LightType::Point, count, input);
                let moves = plan
                    .params
                    .steps
                    .iter()
                    .filter(|step| {
                        matches!(
                            step,
                            DispatchStep::Dispatch {
                                kernel: Kernel::RadixSort { .. } | Kernel::MergeSort { .. },
                                ..
                            }
                        )
                    })
                    .count();
                let expected = if moves % 2 == 0 { input } else { input.other() };
                assert_eq!(plan.output, expected, "{count} values");
                assert_eq!(sorted_slot(count, input), expected, "{count} values");
            }
        }
    }

    #[test]
    fn merge_path_splits() {
        let a = [1, 3, 5, 7];
        let b = [2, 4, 6, 8];
        assert_eq!(merge_path(&a, &b, 0), 0);
        assert_eq!(merge_path(&a, &b, 1), 1);
        assert_eq!(merge_path(&a, &b, 4), 2);
        assert_eq!(merge_path(&a, &b, 8), 4);
        assert_eq!(merge_path(&a, &[], 3), 3);
        assert_eq!(merge_path(&[], &b, 3), 0);
        // Ties come from `a` first.
        assert_eq!(merge_path(&[5, 5], &[5, 5], 2), 2);
    }
}
