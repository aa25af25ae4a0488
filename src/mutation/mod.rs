// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, EnumVariantNames, IntoStaticStr};

use crate::errors::Error;

/// A mutation between two unchanged reference anchor positions.
///
/// `left` and `right` are 0-based reference positions that are themselves
/// unchanged; the read bases in `seq` replace the reference strictly between
/// them. The reference gap width is `right - left - 1` and may be zero (pure
/// insertion). `qual` holds one numeric Phred value per base of `seq`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mutation {
    pub left: i64,
    pub right: i64,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl Mutation {
    pub fn new(left: i64, right: i64, seq: Vec<u8>, qual: Vec<u8>) -> Self {
        debug_assert!(right > left);
        debug_assert_eq!(seq.len(), qual.len());
        Mutation {
            left,
            right,
            seq,
            qual,
        }
    }

    /// Number of reference positions replaced by `seq`.
    pub fn ref_span(&self) -> i64 {
        self.right - self.left - 1
    }

    /// The single reference position a mutation is credited to: the 3'-most
    /// position covered by the event in reference orientation.
    pub fn adduct_site(&self) -> i64 {
        self.right - 1
    }

    /// True if the event removes reference bases (deletion-like).
    pub fn is_gap(&self) -> bool {
        (self.seq.len() as i64) < self.ref_span()
    }

    /// True if the event adds bases absent from the reference.
    pub fn is_insert(&self) -> bool {
        (self.seq.len() as i64) > self.ref_span()
    }

    /// True if the alignment could not uniquely place inserted or deleted
    /// bases, i.e. the event spans reference matches on either side of an
    /// indel. The parser widens such indels to the union of their placements,
    /// so ambiguity is fully encoded in the geometry.
    pub fn is_ambiguous(&self) -> Result<bool, Error> {
        let d = self.ref_span();
        let n = self.seq.len() as i64;
        if d == 0 && n == 0 {
            return Err(Error::Malformed {
                mutation: self.to_string(),
            });
        }
        Ok(d > 0 && n > 0 && d != n)
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} \"{}\" \"{}\"",
            self.left,
            self.right,
            String::from_utf8_lossy(&self.seq),
            phred_to_ascii(&self.qual),
        )
    }
}

/// Encode numeric Phred values as ASCII-Phred33.
pub fn phred_to_ascii(qual: &[u8]) -> String {
    qual.iter().map(|&q| (q + 33) as char).collect()
}

/// Decode ASCII-Phred33 into numeric Phred values.
pub fn ascii_to_phred(qual: &str) -> Vec<u8> {
    qual.bytes().map(|q| q.saturating_sub(33)).collect()
}

/// The closed classification set. Variant order is the output column order;
/// headers, `_ambig` duplication and per-row emission are all generated from
/// this single declaration. `NMatch` is a sentinel for mismatches involving
/// an ambiguous basecall; it is never written to counts and therefore not a
/// column.
#[derive(
    Display,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    EnumVariantNames,
    IntoStaticStr,
)]
pub enum MutationClass {
    #[strum(serialize = "A-")]
    DelA,
    #[strum(serialize = "T-")]
    DelT,
    #[strum(serialize = "G-")]
    DelG,
    #[strum(serialize = "C-")]
    DelC,
    #[strum(serialize = "-A")]
    InsA,
    #[strum(serialize = "-T")]
    InsT,
    #[strum(serialize = "-G")]
    InsG,
    #[strum(serialize = "-C")]
    InsC,
    #[strum(serialize = "-N")]
    InsN,
    AT,
    AG,
    AC,
    TA,
    TG,
    TC,
    GA,
    GT,
    GC,
    CA,
    CT,
    CG,
    #[strum(serialize = "multinuc_deletion")]
    MultinucDeletion,
    #[strum(serialize = "multinuc_insertion")]
    MultinucInsertion,
    #[strum(serialize = "multinuc_mismatch")]
    MultinucMismatch,
    #[strum(serialize = "complex_deletion")]
    ComplexDeletion,
    #[strum(serialize = "complex_insertion")]
    ComplexInsertion,
    #[strum(serialize = "N_match")]
    NMatch,
}

/// Number of classification columns (the sentinel excluded).
pub const N_CLASS_COLUMNS: usize = 26;

impl MutationClass {
    pub fn is_sentinel(self) -> bool {
        self == MutationClass::NMatch
    }

    /// Classification columns in output order.
    pub fn columns() -> impl Iterator<Item = MutationClass> {
        MutationClass::iter().filter(|class| !class.is_sentinel())
    }

    /// Index into a per-position count array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The coarse kind used by the `mutation_type` restriction. The sentinel
    /// has no kind.
    pub fn kind(self) -> Option<MutationType> {
        use MutationClass::*;
        Some(match self {
            DelA | DelT | DelG | DelC => MutationType::Gap,
            InsA | InsT | InsG | InsC | InsN => MutationType::Insert,
            AT | AG | AC | TA | TG | TC | GA | GT | GC | CA | CT | CG | MultinucMismatch => {
                MutationType::Mismatch
            }
            MultinucDeletion => MutationType::GapMulti,
            MultinucInsertion => MutationType::InsertMulti,
            ComplexDeletion | ComplexInsertion => MutationType::Complex,
            NMatch => return None,
        })
    }

    pub fn matches_type(self, requested: MutationType) -> bool {
        requested == MutationType::Any || self.kind() == Some(requested)
    }
}

/// Restriction on which mutation classes are counted.
#[derive(
    Display,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    EnumVariantNames,
    IntoStaticStr,
)]
pub enum MutationType {
    #[strum(serialize = "mismatch")]
    Mismatch,
    #[strum(serialize = "gap")]
    Gap,
    #[strum(serialize = "insert")]
    Insert,
    #[strum(serialize = "gap_multi")]
    GapMulti,
    #[strum(serialize = "insert_multi")]
    InsertMulti,
    #[strum(serialize = "complex")]
    Complex,
    #[strum(serialize = "any")]
    Any,
}

impl Default for MutationType {
    fn default() -> Self {
        MutationType::Any
    }
}

/// A mutation together with its classification and explicit ambiguity flag.
/// From the realignment pass onward the flag is carried here and never
/// re-derived from geometry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaggedMutation {
    pub inner: Mutation,
    pub tag: Option<MutationClass>,
    pub ambig: bool,
}

impl TaggedMutation {
    pub fn untagged(inner: Mutation) -> Self {
        TaggedMutation {
            inner,
            tag: None,
            ambig: false,
        }
    }
}

/// One aligned read after local target reconstruction: the interface between
/// the alignment parser and the shaping, filtering and counting stages.
///
/// Invariants: `local_target_seq.len() == right_target_pos - left_target_pos + 1`,
/// `local_target_qual.len() == local_target_seq.len()`, mutations are sorted
/// by `left` and do not overlap, and every mutation is anchored inside
/// `[left_target_pos, right_target_pos]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRecord {
    pub read_id: String,
    pub left_target_pos: i64,
    pub right_target_pos: i64,
    pub local_target_seq: Vec<u8>,
    pub local_target_qual: Vec<u8>,
    pub mutations: Vec<Mutation>,
}

impl ReadRecord {
    /// Length of the spanned reference region.
    pub fn target_len(&self) -> usize {
        self.local_target_seq.len()
    }

    /// Offset of a reference position into the local target.
    pub fn offset(&self, pos: i64) -> usize {
        debug_assert!(pos >= self.left_target_pos);
        (pos - self.left_target_pos) as usize
    }

    pub fn base_at(&self, pos: i64) -> u8 {
        self.local_target_seq[self.offset(pos)]
    }

    pub fn qual_at(&self, pos: i64) -> u8 {
        self.local_target_qual[self.offset(pos)]
    }
}

/// Assign a classification to a shaped mutation. Single-nucleotide events
/// involving a basecall or reference base outside `ACGT` collapse into the
/// `NMatch` sentinel (insertions excepted, which have their own `-N` label).
pub fn classify(
    mutation: &Mutation,
    local_target_seq: &[u8],
    left_target_pos: i64,
) -> Result<MutationClass, Error> {
    use MutationClass::*;

    let d = mutation.ref_span();
    let n = mutation.seq.len() as i64;
    if d == 0 && n == 0 {
        return Err(Error::Malformed {
            mutation: mutation.to_string(),
        });
    }

    Ok(if d == 0 {
        if n == 1 {
            match mutation.seq[0] {
                b'A' => InsA,
                b'T' => InsT,
                b'G' => InsG,
                b'C' => InsC,
                _ => InsN,
            }
        } else {
            MultinucInsertion
        }
    } else if n == 0 {
        if d == 1 {
            let target = local_target_seq[(mutation.left + 1 - left_target_pos) as usize];
            match target {
                b'A' => DelA,
                b'T' => DelT,
                b'G' => DelG,
                b'C' => DelC,
                _ => NMatch,
            }
        } else {
            MultinucDeletion
        }
    } else if d == n {
        if d == 1 {
            let target = local_target_seq[(mutation.left + 1 - left_target_pos) as usize];
            let read = mutation.seq[0];
            match (target, read) {
                (b'A', b'T') => AT,
                (b'A', b'G') => AG,
                (b'A', b'C') => AC,
                (b'T', b'A') => TA,
                (b'T', b'G') => TG,
                (b'T', b'C') => TC,
                (b'G', b'A') => GA,
                (b'G', b'T') => GT,
                (b'G', b'C') => GC,
                (b'C', b'A') => CA,
                (b'C', b'T') => CT,
                (b'C', b'G') => CG,
                _ => NMatch,
            }
        } else {
            MultinucMismatch
        }
    } else if n > d {
        ComplexInsertion
    } else {
        ComplexDeletion
    })
}
