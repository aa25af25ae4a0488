use std::collections::BTreeMap;

use itertools::Itertools;

use crate::mutation::Mutation;
use crate::scan::PositionRecord;

/// Grouping key for observed sequence variants: qualities are irrelevant for
/// reference correction, so observations group by geometry and substitution.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VariantKey {
    pub left: i64,
    pub right: i64,
    pub seq: Vec<u8>,
}

impl From<&Mutation> for VariantKey {
    fn from(m: &Mutation) -> Self {
        VariantKey {
            left: m.left,
            right: m.right,
            seq: m.seq.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VariantParams {
    /// Longest insertion retained per position; longer substitutions still
    /// count toward depth but are not stored.
    pub max_ins_len: usize,
}

#[derive(Clone, Debug)]
pub enum VariantContribution {
    Depth,
    Observation(VariantKey),
}

/// Per-position variant multiset used for reference correction.
#[derive(Clone, Debug, Default)]
pub struct VariantCounts {
    depth: u32,
    variants: BTreeMap<VariantKey, u32>,
}

impl PositionRecord for VariantCounts {
    type Contribution = VariantContribution;
    type Params = VariantParams;

    fn new(_params: &VariantParams) -> Self {
        Default::default()
    }

    fn header(_params: &VariantParams) -> Vec<String> {
        vec!["depth".to_owned(), "variants".to_owned()]
    }

    fn update(&mut self, contribution: VariantContribution, params: &VariantParams) {
        match contribution {
            VariantContribution::Depth => self.depth += 1,
            VariantContribution::Observation(key) => {
                if key.seq.len() <= params.max_ins_len {
                    *self.variants.entry(key).or_insert(0) += 1;
                }
            }
        }
    }

    fn print(&self, _params: &VariantParams) -> Vec<String> {
        let groups = self
            .variants
            .iter()
            .map(|(key, count)| {
                format!(
                    "{} {} \"{}\" {}",
                    key.left,
                    key.right,
                    String::from_utf8_lossy(&key.seq),
                    count
                )
            })
            .join(" ");
        vec![self.depth.to_string(), groups]
    }
}
