//! All statistics and info attributes of one trace (all runs of one
//! singular selector), grouped by the source they were parsed from.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use anyhow::{anyhow, Context, Result};
use kstring::KString;
use noisy_float::types::R64;

use crate::{
    error::ContractViolation,
    selector::Selector,
    stat::{RunId, Stat},
    stat_info::StatKey,
    trace_attrs::TraceAttrs,
};

/// The stats parsed from one source file.
#[derive(Debug, Clone)]
pub struct StatBin {
    name: KString,
    description: String,
    filename: KString,
    stats: BTreeMap<KString, Stat>,
}

impl StatBin {
    pub fn new(
        name: impl Into<KString>,
        description: impl Into<String>,
        filename: impl Into<KString>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            filename: filename.into(),
            stats: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn get(&self, name: &str) -> Option<&Stat> {
        self.stats.get(name)
    }

    pub fn stats(&self) -> impl Iterator<Item = &Stat> {
        self.stats.values()
    }

    /// The number of runs of the stat with the most runs.
    pub fn num_runs(&self) -> usize {
        self.stats.values().map(Stat::num_runs).max().unwrap_or(0)
    }

    fn add_value(
        &mut self,
        name: &KString,
        value: f64,
        run_id: RunId,
    ) -> Result<(), ContractViolation> {
        let full_name = StatKey::new(self.name.clone(), name.clone()).to_string();
        let filename = self.filename.clone();
        self.stats
            .entry(name.clone())
            .or_insert_with(|| Stat::new(full_name))
            .add_value(value, &filename, run_id)
    }
}

/// Values of info attributes: free-form text or numbers (times).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoValue {
    Text(KString),
    Number(R64),
}

impl Display for InfoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfoValue::Text(s) => f.write_str(s),
            InfoValue::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Info attributes taken over from the trace attributes as text.
pub const TEXT_INFO_ATTRS: [&str; 2] = ["workload_command", "workload_description"];
/// Info attributes taken over from the trace attributes as numbers.
pub const NUMBER_INFO_ATTRS: [&str; 2] = ["starttime", "stoptime"];

#[derive(Debug, Default)]
pub struct TraceStats {
    bins: BTreeMap<KString, StatBin>,
    info: BTreeMap<KString, BTreeSet<InfoValue>>,
    // The directories (runs) that were loaded into this trace
    run_ids: Vec<RunId>,
}

impl TraceStats {
    pub fn add_run_id(&mut self, run_id: RunId) {
        if !self.run_ids.contains(&run_id) {
            self.run_ids.push(run_id);
        }
    }

    pub fn run_ids(&self) -> &[RunId] {
        &self.run_ids
    }

    /// Create the bin if it doesn't exist yet. Existing bins are
    /// returned unchanged.
    pub fn statbin_mut(
        &mut self,
        name: &str,
        description: &str,
        filename: &str,
    ) -> &mut StatBin {
        self.bins
            .entry(KString::from_ref(name))
            .or_insert_with(|| {
                StatBin::new(
                    KString::from_ref(name),
                    description,
                    KString::from_ref(filename),
                )
            })
    }

    /// Add the value of `key` from run `run_id`. The bin must have
    /// been created via `statbin_mut` before; its file name must match
    /// `filename`.
    pub fn add_value(
        &mut self,
        key: &StatKey,
        value: f64,
        filename: &str,
        run_id: RunId,
    ) -> Result<(), ContractViolation> {
        let bin = self
            .bins
            .entry(key.bin.clone())
            .or_insert_with(|| StatBin::new(key.bin.clone(), "", KString::from_ref(filename)));
        if bin.filename() != filename {
            return Err(ContractViolation::FilenameMismatch {
                stat: key.to_string(),
                old: bin.filename().into(),
                new: filename.into(),
            });
        }
        bin.add_value(&key.name, value, run_id)
    }

    pub fn get_stat(&self, key: &StatKey) -> Option<&Stat> {
        self.bins.get(&key.bin)?.get(&key.name)
    }

    pub fn statbins(&self) -> impl Iterator<Item = &StatBin> {
        self.bins.values()
    }

    pub fn add_info(&mut self, name: &str, value: InfoValue) {
        self.info
            .entry(KString::from_ref(name))
            .or_default()
            .insert(value);
    }

    pub fn get_info(&self, name: &str) -> Option<&BTreeSet<InfoValue>> {
        self.info.get(name)
    }

    pub fn has_info(&self, name: &str) -> bool {
        self.info.contains_key(name)
    }

    /// Take over the workload and time info from the attributes of
    /// one trace directory. Nothing is added if any of them is missing
    /// or invalid.
    pub fn merge_attrs(&mut self, attrs: &TraceAttrs) -> Result<()> {
        let mut values = Vec::with_capacity(TEXT_INFO_ATTRS.len() + NUMBER_INFO_ATTRS.len());
        for name in TEXT_INFO_ATTRS {
            let value = attrs
                .get(name)
                .ok_or_else(|| anyhow!("missing attribute {name:?}"))?;
            values.push((name, InfoValue::Text(KString::from_ref(value))));
        }
        for name in NUMBER_INFO_ATTRS {
            let value = attrs
                .get(name)
                .ok_or_else(|| anyhow!("missing attribute {name:?}"))?;
            let n: f64 = value
                .trim()
                .parse()
                .with_context(|| anyhow!("attribute {name:?}: invalid number {value:?}"))?;
            let n = R64::try_new(n)
                .ok_or_else(|| anyhow!("attribute {name:?}: invalid number {value:?}"))?;
            values.push((name, InfoValue::Number(n)));
        }
        for (name, value) in values {
            self.add_info(name, value);
        }
        Ok(())
    }

    /// The number of runs of the bin with the most runs.
    pub fn num_runs(&self) -> usize {
        self.bins.values().map(StatBin::num_runs).max().unwrap_or(0)
    }

    /// Finalize all stats and drop bins without any values. All
    /// remaining bins must have the same number of runs.
    pub fn finalize_statbins(&mut self, selector: &Selector) -> Result<(), ContractViolation> {
        for bin in self.bins.values_mut() {
            for stat in bin.stats.values_mut() {
                stat.finalize();
            }
        }
        self.bins.retain(|_, bin| bin.num_runs() > 0);

        let mut first: Option<(&str, usize)> = None;
        for bin in self.bins.values() {
            let runs = bin.num_runs();
            match first {
                None => first = Some((bin.name(), runs)),
                Some((other_statbin, other_runs)) => {
                    if runs != other_runs {
                        return Err(ContractViolation::RunCountMismatch {
                            selector: selector.to_string(),
                            statbin: bin.name().into(),
                            runs,
                            other_statbin: other_statbin.into(),
                            other_runs,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
