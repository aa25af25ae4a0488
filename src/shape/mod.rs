// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use crate::errors::Error;
use crate::mutation::{classify, Mutation, MutationClass, ReadRecord, TaggedMutation};

/// Shaping parameters; defaults match the canonical MaP analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShapeParams {
    /// Bases at the 3' read end whose mutations are discarded (random-primer
    /// region).
    pub exclude_3prime: i64,
    /// Maximum number of unchanged reference positions between two events
    /// that still collapse into one multinucleotide event.
    pub max_internal_match: i64,
    pub right_align_ambig_dels: bool,
    pub right_align_ambig_ins: bool,
}

impl Default for ShapeParams {
    fn default() -> Self {
        ShapeParams {
            exclude_3prime: 0,
            max_internal_match: 6,
            right_align_ambig_dels: false,
            right_align_ambig_ins: false,
        }
    }
}

/// Run the four shaping passes over a read's raw mutation list: 3' strip,
/// ambiguous-indel realignment, collapse with end trimming, classification.
/// Each pass is a pure function producing a new list.
pub fn shape(read: &ReadRecord, params: &ShapeParams) -> Result<Vec<TaggedMutation>, Error> {
    let raw = read
        .mutations
        .iter()
        .cloned()
        .map(TaggedMutation::untagged)
        .collect();
    shape_mutations(raw, read, params)
}

/// Shaping entry point over an already tagged list; applying it to its own
/// output is the identity.
pub fn shape_mutations(
    mutations: Vec<TaggedMutation>,
    read: &ReadRecord,
    params: &ShapeParams,
) -> Result<Vec<TaggedMutation>, Error> {
    let stripped = strip_3prime(mutations, read, params.exclude_3prime);
    let realigned = realign_ambiguous(stripped, read, params)?;
    let collapsed = collapse(realigned, read, params.max_internal_match);
    classify_remaining(collapsed, read)
}

/// Drop mutations reaching into the 3' primer region.
fn strip_3prime(
    mutations: Vec<TaggedMutation>,
    read: &ReadRecord,
    exclude_3prime: i64,
) -> Vec<TaggedMutation> {
    let last_kept = read.left_target_pos + read.target_len() as i64 - exclude_3prime - 1;
    mutations
        .into_iter()
        .filter(|m| m.inner.right - 1 <= last_kept)
        .collect()
}

/// Decompose every ambiguously placed indel into a pure indel shifted to the
/// configured end plus the single-position mismatches the shift exposes.
/// All emitted sub-mutations carry the explicit `ambig` flag; from here on
/// ambiguity is never re-derived from geometry.
fn realign_ambiguous(
    mutations: Vec<TaggedMutation>,
    read: &ReadRecord,
    params: &ShapeParams,
) -> Result<Vec<TaggedMutation>, Error> {
    let mut out = Vec::with_capacity(mutations.len());
    for tagged in mutations {
        if !tagged.inner.is_ambiguous()? {
            out.push(tagged);
            continue;
        }
        let m = tagged.inner;
        let d = m.ref_span();
        let n = m.seq.len() as i64;

        if n < d {
            let gap_len = d - n;
            if !params.right_align_ambig_dels {
                out.push(ambig_event(Mutation::new(
                    m.left,
                    m.left + gap_len + 1,
                    Vec::new(),
                    Vec::new(),
                )));
                // remaining read bases cover the reference right of the gap
                emit_exposed(&mut out, &m.seq, &m.qual, m.left + 1 + gap_len, read);
            } else {
                emit_exposed(&mut out, &m.seq, &m.qual, m.left + 1, read);
                out.push(ambig_event(Mutation::new(
                    m.right - gap_len - 1,
                    m.right,
                    Vec::new(),
                    Vec::new(),
                )));
            }
        } else {
            let extra = (n - d) as usize;
            if !params.right_align_ambig_ins {
                out.push(ambig_event(Mutation::new(
                    m.left,
                    m.left + 1,
                    m.seq[..extra].to_vec(),
                    m.qual[..extra].to_vec(),
                )));
                emit_exposed(&mut out, &m.seq[extra..], &m.qual[extra..], m.left + 1, read);
            } else {
                emit_exposed(
                    &mut out,
                    &m.seq[..m.seq.len() - extra],
                    &m.qual[..m.qual.len() - extra],
                    m.left + 1,
                    read,
                );
                out.push(ambig_event(Mutation::new(
                    m.right - 1,
                    m.right,
                    m.seq[m.seq.len() - extra..].to_vec(),
                    m.qual[m.qual.len() - extra..].to_vec(),
                )));
            }
        }
    }

    // mismatches on an ambiguous basecall are sentinels; mark them before
    // collapse so they are set aside there
    for tagged in &mut out {
        if tagged.tag.is_none()
            && tagged.inner.ref_span() == 1
            && tagged.inner.seq.len() == 1
            && classify(&tagged.inner, &read.local_target_seq, read.left_target_pos)?
                == MutationClass::NMatch
        {
            tagged.tag = Some(MutationClass::NMatch);
        }
    }
    Ok(out)
}

fn ambig_event(inner: Mutation) -> TaggedMutation {
    TaggedMutation {
        inner,
        tag: None,
        ambig: true,
    }
}

/// Emit the positions of `seq` (laid out against the reference starting at
/// `start`) that differ from the reference, as single-position mismatches.
fn emit_exposed(
    out: &mut Vec<TaggedMutation>,
    seq: &[u8],
    qual: &[u8],
    start: i64,
    read: &ReadRecord,
) {
    for (i, (&base, &q)) in seq.iter().zip(qual.iter()).enumerate() {
        let pos = start + i as i64;
        if read.base_at(pos) != base {
            out.push(ambig_event(Mutation::new(pos - 1, pos + 1, vec![base], vec![q])));
        }
    }
}

/// Merge events separated by at most `max_internal_match` unchanged reference
/// positions, then trim matching ends. `N_match` sentinels are set aside
/// first and reinserted afterwards; they never merge or trim.
fn collapse(
    mutations: Vec<TaggedMutation>,
    read: &ReadRecord,
    max_internal_match: i64,
) -> Vec<TaggedMutation> {
    let (sentinels, events): (Vec<_>, Vec<_>) = mutations
        .into_iter()
        .partition(|m| m.tag == Some(MutationClass::NMatch));

    let mut merged: Vec<TaggedMutation> = Vec::with_capacity(events.len());
    for current in events {
        match merged.last_mut() {
            Some(previous)
                if current.inner.left - previous.inner.right + 1 <= max_internal_match =>
            {
                for pos in previous.inner.right..=current.inner.left {
                    previous.inner.seq.push(read.base_at(pos));
                    previous.inner.qual.push(read.qual_at(pos));
                }
                previous.inner.seq.extend_from_slice(&current.inner.seq);
                previous.inner.qual.extend_from_slice(&current.inner.qual);
                previous.inner.right = current.inner.right;
                previous.tag = None;
                previous.ambig |= current.ambig;
            }
            _ => merged.push(current),
        }
    }

    for event in &mut merged {
        trim_matching_ends(&mut event.inner, read);
    }

    merged.extend(sentinels);
    merged.sort();
    merged
}

/// Strip positions at either end of an event whose substitution equals the
/// aligned reference; these appear as a side effect of ambiguous-indel
/// shifting.
fn trim_matching_ends(m: &mut Mutation, read: &ReadRecord) {
    while !m.seq.is_empty() && m.ref_span() > 0 && m.seq[0] == read.base_at(m.left + 1) {
        m.left += 1;
        m.seq.remove(0);
        m.qual.remove(0);
    }
    while !m.seq.is_empty() && m.ref_span() > 0 && *m.seq.last().unwrap() == read.base_at(m.right - 1)
    {
        m.right -= 1;
        m.seq.pop();
        m.qual.pop();
    }
}

/// Assign a classification to every event that does not already carry one.
fn classify_remaining(
    mutations: Vec<TaggedMutation>,
    read: &ReadRecord,
) -> Result<Vec<TaggedMutation>, Error> {
    mutations
        .into_iter()
        .map(|mut tagged| {
            if tagged.tag.is_none() {
                tagged.tag = Some(classify(
                    &tagged.inner,
                    &read.local_target_seq,
                    read.left_target_pos,
                )?);
            }
            Ok(tagged)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(left_target_pos: i64, target: &str, mutations: Vec<Mutation>) -> ReadRecord {
        ReadRecord {
            read_id: "read1".to_owned(),
            left_target_pos,
            right_target_pos: left_target_pos + target.len() as i64 - 1,
            local_target_seq: target.as_bytes().to_vec(),
            local_target_qual: vec![40; target.len()],
            mutations,
        }
    }

    fn mutation(left: i64, right: i64, seq: &[u8]) -> Mutation {
        Mutation::new(left, right, seq.to_vec(), vec![40; seq.len()])
    }

    #[test]
    fn test_strip_3prime() {
        // mismatches at positions 2 and 6 of an 8 nt read
        let read = read(0, "ACGTACGT", vec![mutation(1, 3, b"T"), mutation(5, 7, b"A")]);
        let params = ShapeParams {
            exclude_3prime: 2,
            ..Default::default()
        };
        let shaped = shape(&read, &params).unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].inner, mutation(1, 3, b"T"));
        assert_eq!(shaped[0].tag, Some(MutationClass::GT));
    }

    #[test]
    fn test_left_align_ambiguous_deletion() {
        // GATTTTCA with one T of the homopolymer deleted; parser widening
        // yields [1, 6) with seq TTT
        let read = read(0, "GATTTTCA", vec![mutation(1, 6, b"TTT")]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].inner, mutation(1, 3, b""));
        assert_eq!(shaped[0].tag, Some(MutationClass::DelT));
        assert!(shaped[0].ambig);
    }

    #[test]
    fn test_right_align_ambiguous_deletion() {
        let read = read(0, "GATTTTCA", vec![mutation(1, 6, b"TTT")]);
        let params = ShapeParams {
            right_align_ambig_dels: true,
            ..Default::default()
        };
        let shaped = shape(&read, &params).unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].inner, mutation(4, 6, b""));
        assert_eq!(shaped[0].tag, Some(MutationClass::DelT));
        assert!(shaped[0].ambig);
    }

    #[test]
    fn test_ambiguous_multinuc_deletion() {
        // tandem repeat GTCAA GTCAA: deleting either copy is equivalent; the
        // widened event spans both copies
        let read = read(0, "GAGTCAAGTCAATC", vec![mutation(1, 12, b"GTCAA")]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].inner, mutation(1, 7, b""));
        assert_eq!(shaped[0].tag, Some(MutationClass::MultinucDeletion));
        assert!(shaped[0].ambig);
        assert_eq!(shaped[0].inner.adduct_site(), 6);
    }

    #[test]
    fn test_left_align_ambiguous_insertion() {
        // GACA with CC at [1, 3): one C inserted next to the reference C
        let read = read(0, "GACA", vec![mutation(1, 3, b"CC")]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].inner, mutation(1, 2, b"C"));
        assert_eq!(shaped[0].tag, Some(MutationClass::InsC));
        assert!(shaped[0].ambig);
    }

    #[test]
    fn test_realignment_exposes_mismatches() {
        // reference AACCGG; event [0, 5) with seq "TC" is deletion-like
        // (gap of 2); left alignment puts the gap at [1, 3) and lays TC
        // against reference positions 3, 4 exposing a T->? mismatch at 3
        let read = read(0, "AACCGG", vec![Mutation::new(0, 5, b"TC".to_vec(), vec![40, 40])]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        // gap [1, 3) plus exposed mismatch at position 3 merge back into one
        // complex event during collapse
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].tag, Some(MutationClass::ComplexDeletion));
        assert!(shaped[0].ambig);
    }

    #[test]
    fn test_collapse_window() {
        // mismatches at positions 10 and 15 merge across 4 unchanged bases
        let read = read(8, "TACGTACGTA", vec![mutation(9, 11, b"T"), mutation(14, 16, b"A")]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 1);
        let m = &shaped[0].inner;
        assert_eq!((m.left, m.right), (9, 16));
        assert_eq!(m.seq.len(), 6);
        assert_eq!(shaped[0].tag, Some(MutationClass::MultinucMismatch));
    }

    #[test]
    fn test_collapse_respects_window_limit() {
        let read = read(0, "ACGTACGTACGTACGT", vec![mutation(1, 3, b"T"), mutation(10, 12, b"A")]);
        let params = ShapeParams {
            max_internal_match: 6,
            ..Default::default()
        };
        let shaped = shape(&read, &params).unwrap();
        // 8 unchanged positions separate the events
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn test_sentinels_never_merge() {
        // N basecall at position 3 sits between mismatches at 1 and 5
        let read = read(
            0,
            "ACGTACGT",
            vec![mutation(0, 2, b"T"), mutation(2, 4, b"N"), mutation(4, 6, b"T")],
        );
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 2);
        // the mismatches merged across the sentinel
        assert_eq!((shaped[0].inner.left, shaped[0].inner.right), (0, 6));
        assert_eq!(shaped[0].tag, Some(MutationClass::MultinucMismatch));
        assert_eq!(shaped[1].inner, mutation(2, 4, b"N"));
        assert_eq!(shaped[1].tag, Some(MutationClass::NMatch));
    }

    #[test]
    fn test_shaping_is_idempotent() {
        let read = read(0, "GATTTTCA", vec![mutation(1, 6, b"TTT")]);
        let params = ShapeParams::default();
        let shaped = shape(&read, &params).unwrap();
        let reshaped = shape_mutations(shaped.clone(), &read, &params).unwrap();
        assert_eq!(shaped, reshaped);
    }

    #[test]
    fn test_trimming_is_fully_applied() {
        let read = read(0, "ACGTACGT", vec![mutation(1, 3, b"T"), mutation(4, 6, b"T")]);
        let shaped = shape(&read, &ShapeParams::default()).unwrap();
        assert_eq!(shaped.len(), 1);
        let m = &shaped[0].inner;
        // neither end of the merged seq equals the aligned reference
        assert_ne!(m.seq[0], read.base_at(m.left + 1));
        assert_ne!(*m.seq.last().unwrap(), read.base_at(m.right - 1));
    }
}
