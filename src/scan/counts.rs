use itertools::Itertools;

use crate::mutation::{MutationClass, N_CLASS_COLUMNS};
use crate::scan::PositionRecord;

#[derive(Clone, Debug)]
pub struct CountsParams {
    /// Emit a parallel `_ambig` column per classification instead of folding
    /// ambiguous events into the plain columns.
    pub separate_ambig: bool,
}

#[derive(Clone, Debug)]
pub enum CountContribution {
    ReadDepth,
    EffectiveDepth,
    Class { class: MutationClass, ambig: bool },
}

/// Per-position classification counters plus the two depths. Ambiguous
/// events are always accumulated separately and folded at print time unless
/// `separate_ambig` is set.
#[derive(Clone, Debug, Default)]
pub struct ClassCounts {
    counts: [u32; N_CLASS_COLUMNS],
    ambig_counts: [u32; N_CLASS_COLUMNS],
    read_depth: u32,
    effective_depth: u32,
}

impl PositionRecord for ClassCounts {
    type Contribution = CountContribution;
    type Params = CountsParams;

    fn new(_params: &CountsParams) -> Self {
        Default::default()
    }

    fn header(params: &CountsParams) -> Vec<String> {
        let mut columns = MutationClass::columns()
            .map(|class| class.to_string())
            .collect_vec();
        if params.separate_ambig {
            columns.extend(MutationClass::columns().map(|class| format!("{}_ambig", class)));
        }
        columns.push("read_depth".to_owned());
        columns.push("effective_depth".to_owned());
        columns
    }

    fn update(&mut self, contribution: CountContribution, _params: &CountsParams) {
        match contribution {
            CountContribution::ReadDepth => self.read_depth += 1,
            CountContribution::EffectiveDepth => self.effective_depth += 1,
            CountContribution::Class { class, ambig } => {
                debug_assert!(!class.is_sentinel());
                if ambig {
                    self.ambig_counts[class.index()] += 1;
                } else {
                    self.counts[class.index()] += 1;
                }
            }
        }
    }

    fn print(&self, params: &CountsParams) -> Vec<String> {
        let mut fields = Vec::with_capacity(N_CLASS_COLUMNS * 2 + 2);
        if params.separate_ambig {
            fields.extend(self.counts.iter().map(|c| c.to_string()));
            fields.extend(self.ambig_counts.iter().map(|c| c.to_string()));
        } else {
            fields.extend(
                self.counts
                    .iter()
                    .zip(self.ambig_counts.iter())
                    .map(|(plain, ambig)| (plain + ambig).to_string()),
            );
        }
        fields.push(self.read_depth.to_string());
        fields.push(self.effective_depth.to_string());
        fields
    }
}
