// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;

use crate::mutation::{MutationClass, MutationType, ReadRecord, TaggedMutation};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterParams {
    /// Phred threshold a basecall and both neighbors must reach.
    pub min_qual: u8,
    pub exclude_3prime: i64,
    pub mutation_type: MutationType,
    /// Count sequence variants for reference correction instead of adducts.
    pub variant_mode: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            min_qual: 30,
            exclude_3prime: 0,
            mutation_type: MutationType::Any,
            variant_mode: false,
        }
    }
}

/// Per-read outcome of the quality/adduct filter. The depth and count
/// vectors cover the local target minus the 3' excluded region.
#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    pub effective_depth: Vec<bool>,
    pub effective_count: Vec<bool>,
    pub included: Vec<TaggedMutation>,
    pub excluded: Vec<TaggedMutation>,
}

/// Decide per-position effective-depth inclusion and per-mutation inclusion.
///
/// A non-mutation position contributes to effective depth iff its own
/// basecall and both neighboring basecalls reach `min_qual`; neighbors inside
/// a mutation are looked up across it (far side for gaps, closest
/// substituting base otherwise). An included mutation removes its covered
/// interior from effective depth except the inferred adduct site
/// (`right - 1`), which is set in both vectors; in variant mode the whole
/// covered region stays in effective depth and no adduct site is inferred.
pub fn filter_read(
    read: &ReadRecord,
    mutations: Vec<TaggedMutation>,
    params: &FilterParams,
) -> FilterOutcome {
    let full_len = read.target_len() as i64;
    let eff_len = (full_len - params.exclude_3prime).max(0) as usize;
    let ltp = read.left_target_pos;

    // sparse anchor maps and the interior mask over the local target
    let mut left_index: HashMap<i64, usize> = HashMap::new();
    let mut right_index: HashMap<i64, usize> = HashMap::new();
    let mut in_mutation = vec![false; full_len as usize];
    for (i, m) in mutations.iter().enumerate() {
        if m.inner.left >= ltp {
            left_index.insert(m.inner.left - ltp, i);
        }
        if m.inner.right - ltp < full_len {
            right_index.insert(m.inner.right - ltp, i);
        }
        for p in (m.inner.left + 1).max(ltp)..m.inner.right.min(ltp + full_len) {
            in_mutation[(p - ltp) as usize] = true;
        }
    }

    let qual_at = |p: i64| -> Option<u8> {
        if p < 0 || p >= full_len {
            None
        } else {
            Some(read.local_target_qual[p as usize])
        }
    };
    // quality of the basecall left of local position p, looking across a
    // mutation to the far side (gap) or its closest substituting base
    let left_neighbor_qual = |p: i64| -> Option<u8> {
        let q = p - 1;
        if q < 0 {
            return None;
        }
        if !in_mutation[q as usize] {
            return qual_at(q);
        }
        let m = &mutations[*right_index.get(&p)?];
        if m.inner.seq.is_empty() {
            qual_at(m.inner.left - ltp)
        } else {
            m.inner.qual.last().copied()
        }
    };
    let right_neighbor_qual = |p: i64| -> Option<u8> {
        let q = p + 1;
        if q >= full_len {
            return None;
        }
        if !in_mutation[q as usize] {
            return qual_at(q);
        }
        let m = &mutations[*left_index.get(&p)?];
        if m.inner.seq.is_empty() {
            qual_at(m.inner.right - ltp)
        } else {
            m.inner.qual.first().copied()
        }
    };
    let passes = |qual: Option<u8>| qual.map_or(true, |q| q >= params.min_qual);

    let mut effective_depth = vec![false; eff_len];
    let mut effective_count = vec![false; eff_len];

    // pass 1: non-mutation positions
    for p in 0..eff_len as i64 {
        if in_mutation[p as usize] {
            continue;
        }
        if read.local_target_qual[p as usize] >= params.min_qual
            && passes(left_neighbor_qual(p))
            && passes(right_neighbor_qual(p))
        {
            effective_depth[p as usize] = true;
        }
    }

    // pass 2: mutations
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for m in mutations {
        if m.tag == Some(MutationClass::NMatch) {
            // sentinels are never counted; their covered region stays out of
            // the effective depth
            excluded.push(m);
            continue;
        }
        let class = m.tag.expect("bug: unclassified mutation reached the filter");
        if !class.matches_type(params.mutation_type) {
            excluded.push(m);
            continue;
        }
        let interior_ok = m.inner.qual.iter().all(|&q| q >= params.min_qual);
        let flanks_ok =
            passes(qual_at(m.inner.left - ltp)) && passes(qual_at(m.inner.right - ltp));
        if !(interior_ok && flanks_ok) {
            excluded.push(m);
            continue;
        }

        if params.variant_mode {
            for p in m.inner.left + 1..m.inner.right {
                let offset = p - ltp;
                if offset >= 0 && (offset as usize) < eff_len {
                    effective_depth[offset as usize] = true;
                }
            }
        } else {
            let adduct = m.inner.adduct_site() - ltp;
            if adduct >= 0 && (adduct as usize) < eff_len {
                effective_depth[adduct as usize] = true;
                effective_count[adduct as usize] = true;
            }
        }
        included.push(m);
    }

    FilterOutcome {
        effective_depth,
        effective_count,
        included,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Mutation;
    use crate::shape::{shape, ShapeParams};

    fn read_with_quals(target: &str, quals: Vec<u8>, mutations: Vec<Mutation>) -> ReadRecord {
        ReadRecord {
            read_id: "read1".to_owned(),
            left_target_pos: 0,
            right_target_pos: target.len() as i64 - 1,
            local_target_seq: target.as_bytes().to_vec(),
            local_target_qual: quals,
            mutations,
        }
    }

    fn shaped(read: &ReadRecord) -> Vec<TaggedMutation> {
        shape(read, &ShapeParams::default()).unwrap()
    }

    #[test]
    fn test_clean_read_has_full_effective_depth() {
        let read = read_with_quals("ACGTACGT", vec![40; 8], vec![]);
        let outcome = filter_read(&read, vec![], &FilterParams::default());
        assert_eq!(outcome.effective_depth, vec![true; 8]);
        assert_eq!(outcome.effective_count, vec![false; 8]);
    }

    #[test]
    fn test_neighbor_quality_exclusion() {
        // one low-quality basecall poisons itself and both neighbors
        let read = read_with_quals("ACG", vec![40, 10, 40], vec![]);
        let outcome = filter_read(&read, vec![], &FilterParams::default());
        assert_eq!(outcome.effective_depth, vec![false, false, false]);
    }

    #[test]
    fn test_included_mismatch_sets_adduct_site() {
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 3, b"T".to_vec(), vec![40])],
        );
        let mutations = shaped(&read);
        let outcome = filter_read(&read, mutations, &FilterParams::default());
        assert_eq!(outcome.included.len(), 1);
        assert!(outcome.effective_depth.iter().all(|&b| b));
        let expected_count: Vec<bool> = (0..8).map(|p| p == 2).collect();
        assert_eq!(outcome.effective_count, expected_count);
    }

    #[test]
    fn test_low_quality_mutation_is_excluded() {
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 3, b"T".to_vec(), vec![10])],
        );
        let mutations = shaped(&read);
        let outcome = filter_read(&read, mutations, &FilterParams::default());
        assert!(outcome.included.is_empty());
        assert_eq!(outcome.excluded.len(), 1);
        // the mismatch position is removed from the effective depth
        assert!(!outcome.effective_depth[2]);
        assert!(!outcome.effective_count[2]);
    }

    #[test]
    fn test_gap_interior_is_excluded_but_adduct_site_is_kept() {
        // deletion of positions 2..=4
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 5, b"".to_vec(), vec![])],
        );
        let mutations = shaped(&read);
        let outcome = filter_read(&read, mutations, &FilterParams::default());
        assert_eq!(outcome.included.len(), 1);
        assert_eq!(
            outcome.effective_depth,
            vec![true, true, false, false, true, true, true, true]
        );
        assert!(outcome.effective_count[4]);
    }

    #[test]
    fn test_neighbor_lookup_crosses_a_gap() {
        // low quality right of the gap fails the left flanking position
        let mut quals = vec![40; 8];
        quals[5] = 10;
        let read = read_with_quals(
            "ACGTACGT",
            quals,
            vec![Mutation::new(1, 5, b"".to_vec(), vec![])],
        );
        let mutations = shaped(&read);
        let outcome = filter_read(&read, mutations, &FilterParams::default());
        // position 1 sees position 5 across the gap and fails
        assert!(!outcome.effective_depth[1]);
        assert!(outcome.effective_depth[0]);
        // the mutation itself fails its right flank
        assert!(outcome.included.is_empty());
    }

    #[test]
    fn test_mutation_type_restriction() {
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 3, b"T".to_vec(), vec![40])],
        );
        let mutations = shaped(&read);
        let params = FilterParams {
            mutation_type: MutationType::Gap,
            ..Default::default()
        };
        let outcome = filter_read(&read, mutations, &params);
        assert!(outcome.included.is_empty());
        assert_eq!(outcome.excluded.len(), 1);
    }

    #[test]
    fn test_variant_mode_keeps_covered_region() {
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 5, b"".to_vec(), vec![])],
        );
        let mutations = shaped(&read);
        let params = FilterParams {
            variant_mode: true,
            ..Default::default()
        };
        let outcome = filter_read(&read, mutations, &params);
        assert_eq!(outcome.effective_depth, vec![true; 8]);
        assert_eq!(outcome.effective_count, vec![false; 8]);
        assert_eq!(outcome.included.len(), 1);
    }

    #[test]
    fn test_exclude_3prime_shortens_the_window() {
        let read = read_with_quals("ACGTACGT", vec![40; 8], vec![]);
        let params = FilterParams {
            exclude_3prime: 3,
            ..Default::default()
        };
        let outcome = filter_read(&read, vec![], &params);
        assert_eq!(outcome.effective_depth.len(), 5);
        assert_eq!(outcome.effective_depth, vec![true; 5]);
    }

    #[test]
    fn test_sentinel_is_never_counted() {
        let read = read_with_quals(
            "ACGTACGT",
            vec![40; 8],
            vec![Mutation::new(1, 3, b"N".to_vec(), vec![40])],
        );
        let mutations = shaped(&read);
        let outcome = filter_read(&read, mutations, &FilterParams::default());
        assert!(outcome.included.is_empty());
        assert_eq!(outcome.excluded.len(), 1);
        assert!(!outcome.effective_depth[2]);
    }
}
