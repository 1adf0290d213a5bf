//! Morton codes and the three sorts over (code, light index) pairs.

use lightgrid_types::{Aabb, LightsData};

use crate::{
    morton::{self, MORTON_KEY_BITS},
    pass::limits::MERGE_VALUES_PER_GROUP,
    sort::merge_path,
    util::math::round_up_div,
};

/// Key and value of a padded slot. Sorts after every morton code.
const PADDING: u32 = u32::MAX;

/// Codes of the lights in natural order, with the identity permutation as
/// indices.
pub fn morton_codes(lights: &LightsData, aabbs: &[Aabb], codes: &mut [u32], indices: &mut [u32]) {
    for (index, aabb) in aabbs.iter().enumerate() {
        codes[index] = morton::light_code(aabb, lights);
        indices[index] = index as u32;
    }
}

/// One bit of a split radix sort: values with the bit cleared keep their
/// order at the front, the others follow.
fn split(bit: u32, keys: &[u32], values: &[u32], out_keys: &mut [u32], out_values: &mut [u32]) {
    let total_false = keys.iter().filter(|&&key| key & (1 << bit) == 0).count();
    let mut falses_before = 0;
    for (index, (&key, &value)) in keys.iter().zip(values).enumerate() {
        let dest = if key & (1 << bit) == 0 {
            falses_before += 1;
            falses_before - 1
        } else {
            total_false + (index - falses_before)
        };
        out_keys[dest] = key;
        out_values[dest] = value;
    }
}

/// Sorts each chunk of `chunk_size` pairs of the source into the destination.
pub fn radix_sort(
    groups: u32,
    count: u32,
    chunk_size: u32,
    source: (&[u32], &[u32]),
    dest: (&mut [u32], &mut [u32]),
) {
    let (src_keys, src_values) = source;
    let (dst_keys, dst_values) = dest;

    for group in 0..groups {
        let start = (group * chunk_size).min(count) as usize;
        let end = ((group + 1) * chunk_size).min(count) as usize;
        let mut keys = src_keys[start..end].to_vec();
        let mut values = src_values[start..end].to_vec();
        let mut scratch_keys = keys.clone();
        let mut scratch_values = values.clone();

        for bit in 0..MORTON_KEY_BITS {
            split(bit, &keys, &values, &mut scratch_keys, &mut scratch_values);
            std::mem::swap(&mut keys, &mut scratch_keys);
            std::mem::swap(&mut values, &mut scratch_values);
        }

        dst_keys[start..end].copy_from_slice(&keys);
        dst_values[start..end].copy_from_slice(&values);
    }
}

/// Bitonic network over a power of two number of pairs, ordered by key.
pub fn bitonic_network(pairs: &mut [(u32, u32)]) {
    let len = pairs.len();
    debug_assert!(len.is_power_of_two() || len == 0);

    let mut size = 2;
    while size <= len {
        let mut stride = size / 2;
        while stride > 0 {
            for index in 0..len {
                let partner = index ^ stride;
                if partner > index {
                    let ascending = index & size == 0;
                    if (pairs[index].0 > pairs[partner].0) == ascending {
                        pairs.swap(index, partner);
                    }
                }
            }
            stride /= 2;
        }
        size *= 2;
    }
}

/// Sorts the first `count` pairs in place.
pub fn bitonic_sort(count: u32, keys: &mut [u32], values: &mut [u32]) {
    let count = count as usize;
    let mut pairs = vec![(PADDING, PADDING); count.next_power_of_two()];
    for (index, pair) in pairs.iter_mut().take(count).enumerate() {
        *pair = (keys[index], values[index]);
    }
    bitonic_network(&mut pairs);
    for (index, (key, value)) in pairs.into_iter().take(count).enumerate() {
        keys[index] = key;
        values[index] = value;
    }
}

/// The two sorted chunks merged by sort group `sort_group`.
fn merge_inputs(count: u32, chunk_size: u32, sort_group: u32) -> (usize, usize, usize) {
    let a_start = (sort_group * 2 * chunk_size).min(count);
    let b_start = (a_start + chunk_size).min(count);
    let b_end = (b_start + chunk_size).min(count);
    (a_start as usize, b_start as usize, b_end as usize)
}

fn groups_per_sort_group(chunk_size: u32) -> u32 {
    round_up_div(chunk_size * 2, MERGE_VALUES_PER_GROUP)
}

/// Splits every pair of chunks at the boundaries of the merge workgroups.
pub fn merge_path_partitions(invocations: u32, count: u32, chunk_size: u32, keys: &[u32], partitions: &mut [u32]) {
    let per_sort_group = groups_per_sort_group(chunk_size) + 1;
    let sort_groups = round_up_div(round_up_div(count, chunk_size), 2);
    let total = (per_sort_group * sort_groups).min(invocations);

    for partition in 0..total {
        let sort_group = partition / per_sort_group;
        let (a_start, b_start, b_end) = merge_inputs(count, chunk_size, sort_group);
        let a = &keys[a_start..b_start];
        let b = &keys[b_start..b_end];
        let diag = ((partition % per_sort_group) * MERGE_VALUES_PER_GROUP) as usize;
        partitions[partition as usize] = merge_path(a, b, diag.min(a.len() + b.len())) as u32;
    }
}

/// Every workgroup merges the slice of the output between two partitions.
pub fn merge_sort(
    groups: u32,
    count: u32,
    chunk_size: u32,
    partitions: &[u32],
    source: (&[u32], &[u32]),
    dest: (&mut [u32], &mut [u32]),
) {
    let (src_keys, src_values) = source;
    let (dst_keys, dst_values) = dest;
    let per_sort_group = groups_per_sort_group(chunk_size);

    for group in 0..groups {
        let sort_group = group / per_sort_group;
        let local = group % per_sort_group;
        let partition = (sort_group * (per_sort_group + 1) + local) as usize;

        let (a_start, b_start, b_end) = merge_inputs(count, chunk_size, sort_group);
        let merged = b_end - a_start;
        let diag_start = (local * MERGE_VALUES_PER_GROUP) as usize;
        if diag_start >= merged {
            continue;
        }
        let diag_end = (diag_start + MERGE_VALUES_PER_GROUP as usize).min(merged);

        let mut a = a_start + partitions[partition] as usize;
        let a_end = a_start + partitions[partition + 1] as usize;
        let mut b = b_start + (diag_start - partitions[partition] as usize);
        let b_stop = b_start + (diag_end - partitions[partition + 1] as usize);

        for out in a_start + diag_start..a_start + diag_end {
            let take_a = a < a_end && (b >= b_stop || src_keys[a] <= src_keys[b]);
            let from = if take_a { &mut a } else { &mut b };
            dst_keys[out] = src_keys[*from];
            dst_values[out] = src_values[*from];
            *from += 1;
        }
    }
}
