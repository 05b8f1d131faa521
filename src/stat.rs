//! Storage for the values of one statistic across the repeated runs
//! of a trace (`Stat`), and aggregation of several statistics
//! (`Bucket`).

use std::{collections::BTreeMap, sync::OnceLock};

use kstring::KString;

use crate::error::ContractViolation;

/// Identifies one run; the name of the trace directory the value was
/// parsed from.
pub type RunId = KString;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StatError {
    #[error("stat {stat:?} has no value for run {run_id:?}")]
    NoSuchRun { stat: String, run_id: String },
}

/// Summary values, calculated once on first use.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Summary {
    mean: f64,
    /// population standard deviation
    std: f64,
    max: f64,
    /// all values are zero (or there are none)
    empty: bool,
}

impl Summary {
    fn from_values(values: impl Iterator<Item = f64> + Clone) -> Self {
        let (n, sum, max) = values
            .clone()
            .fold((0usize, 0., f64::NEG_INFINITY), |(n, sum, max), v| {
                (n + 1, sum + v, max.max(v))
            });
        if n == 0 {
            return Summary {
                mean: 0.,
                std: 0.,
                max: 0.,
                empty: true,
            };
        }
        let nf = n as f64;
        let mean = sum / nf;
        let variance = values.clone().map(|v| (v - mean).powi(2)).sum::<f64>() / nf;
        let empty = values.into_iter().all(|v| v == 0.);
        Summary {
            mean,
            std: variance.sqrt(),
            max,
            empty,
        }
    }
}

/// The summary values common to `Stat` and `Bucket`, so that
/// comparisons and rankings can be done on either.
pub trait Measurement {
    fn mean(&self) -> f64;
    fn std(&self) -> f64;
    fn max(&self) -> f64;
    /// True if all values are zero.
    fn empty(&self) -> bool;
    fn num_runs(&self) -> usize;
}

/// The values of a single named statistic, one per run. Values can
/// only be added until `finalize` is called, and the summary methods
/// can only be used after that.
#[derive(Debug, Clone)]
pub struct Stat {
    name: KString,
    values: Vec<f64>,
    // Same length as `values`
    run_ids: Vec<RunId>,
    filename: Option<KString>,
    finalized: bool,
    summary: OnceLock<Summary>,
}

impl Stat {
    pub fn new(name: impl Into<KString>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            run_ids: Vec::new(),
            filename: None,
            finalized: false,
            summary: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add the value parsed from `filename` in run `run_id`. All
    /// values must come from the same file name, and each run can
    /// only contribute once.
    pub fn add_value(
        &mut self,
        value: f64,
        filename: &str,
        run_id: RunId,
    ) -> Result<(), ContractViolation> {
        assert!(!self.finalized, "stat {:?} is already finalized", self.name);
        match &self.filename {
            Some(old) => {
                if old.as_str() != filename {
                    return Err(ContractViolation::FilenameMismatch {
                        stat: self.name.to_string(),
                        old: old.to_string(),
                        new: filename.into(),
                    });
                }
            }
            None => self.filename = Some(KString::from_ref(filename)),
        }
        if self.run_ids.contains(&run_id) {
            return Err(ContractViolation::DuplicateRun {
                stat: self.name.to_string(),
                run_id,
            });
        }
        self.values.push(value);
        self.run_ids.push(run_id);
        Ok(())
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    fn summary(&self) -> &Summary {
        assert!(self.finalized, "stat {:?} is not finalized", self.name);
        self.summary
            .get_or_init(|| Summary::from_values(self.values.iter().copied()))
    }

    pub fn mean(&self) -> f64 {
        self.summary().mean
    }

    pub fn std(&self) -> f64 {
        self.summary().std
    }

    pub fn max(&self) -> f64 {
        self.summary().max
    }

    pub fn empty(&self) -> bool {
        self.summary().empty
    }

    pub fn num_runs(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn run_ids(&self) -> &[RunId] {
        &self.run_ids
    }

    /// The file the values were parsed from (`None` if no value was
    /// added yet).
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The value from run `run_id`.
    pub fn run_value(&self, run_id: &str) -> Result<f64, StatError> {
        self.run_ids
            .iter()
            .position(|r| r.as_str() == run_id)
            .map(|i| self.values[i])
            .ok_or_else(|| StatError::NoSuchRun {
                stat: self.name.to_string(),
                run_id: run_id.into(),
            })
    }

    /// The value from run `run_id`, or `default` if there is none.
    pub fn run_value_or(&self, run_id: &str, default: f64) -> f64 {
        self.run_value(run_id).unwrap_or(default)
    }
}

impl Measurement for Stat {
    fn mean(&self) -> f64 {
        Stat::mean(self)
    }
    fn std(&self) -> f64 {
        Stat::std(self)
    }
    fn max(&self) -> f64 {
        Stat::max(self)
    }
    fn empty(&self) -> bool {
        Stat::empty(self)
    }
    fn num_runs(&self) -> usize {
        Stat::num_runs(self)
    }
}

#[derive(Debug, Clone)]
pub struct BucketMember<'t> {
    pub stat: &'t Stat,
    /// Label to show for the member instead of the stat name
    pub display: KString,
    /// Presentation rank, dense over all groups shown together
    pub hatch_index: Option<usize>,
}

/// A named aggregate of related stats (e.g. all NFS operations of one
/// kind). Its summary values are calculated on the per-run sums of
/// the member values, *not* from the member summaries.
#[derive(Debug, Clone)]
pub struct Bucket<'t> {
    name: KString,
    display_suffix: Option<KString>,
    members: Vec<BucketMember<'t>>,
    filename: Option<KString>,
    sum_by_run: BTreeMap<RunId, f64>,
    finalized: bool,
    summary: OnceLock<Summary>,
}

impl<'t> Bucket<'t> {
    pub fn new(name: impl Into<KString>) -> Self {
        Self {
            name: name.into(),
            display_suffix: None,
            members: Vec::new(),
            filename: None,
            sum_by_run: BTreeMap::new(),
            finalized: false,
            summary: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// E.g. the unit of the member values.
    pub fn set_display_suffix(&mut self, suffix: impl Into<KString>) {
        self.display_suffix = Some(suffix.into());
    }

    /// The name with the display suffix, if any.
    pub fn display_name(&self) -> String {
        match &self.display_suffix {
            Some(suffix) => format!("{} [{suffix}]", self.name),
            None => self.name.to_string(),
        }
    }

    /// Add a member. All members must be parsed from the same file.
    pub fn add_stat(
        &mut self,
        stat: &'t Stat,
        display: impl Into<KString>,
    ) -> Result<(), ContractViolation> {
        assert!(!self.finalized, "bucket {:?} is already finalized", self.name);
        if let Some(filename) = stat.filename() {
            match &self.filename {
                Some(old) => {
                    if old.as_str() != filename {
                        return Err(ContractViolation::BucketFilenameMismatch {
                            bucket: self.name.to_string(),
                            stat: stat.name().into(),
                            old: old.to_string(),
                            new: filename.into(),
                        });
                    }
                }
                None => self.filename = Some(KString::from_ref(filename)),
            }
        }
        for (value, run_id) in stat.values().iter().zip(stat.run_ids()) {
            *self.sum_by_run.entry(run_id.clone()).or_insert(0.) += *value;
        }
        self.members.push(BucketMember {
            stat,
            display: display.into(),
            hatch_index: None,
        });
        Ok(())
    }

    /// Stamp each member with its rank from `ranks` (keyed by stat
    /// name).
    pub fn assign_hatch_indices(&mut self, ranks: &BTreeMap<KString, usize>) {
        for member in &mut self.members {
            member.hatch_index = ranks.get(member.stat.name()).copied();
        }
    }

    /// Freeze the member list, ordering members by descending mean.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.members.sort_by(|a, b| {
            b.stat
                .mean()
                .total_cmp(&a.stat.mean())
                .then_with(|| a.stat.name().cmp(b.stat.name()))
        });
        self.finalized = true;
    }

    /// The members, by descending mean once finalized.
    pub fn members(&self) -> &[BucketMember<'t>] {
        &self.members
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The runs any member has a value for.
    pub fn run_ids(&self) -> impl Iterator<Item = &RunId> {
        self.sum_by_run.keys()
    }

    /// The sum of all member values in run `run_id`.
    pub fn run_total(&self, run_id: &str) -> Option<f64> {
        self.sum_by_run.get(run_id).copied()
    }

    fn summary(&self) -> &Summary {
        assert!(self.finalized, "bucket {:?} is not finalized", self.name);
        self.summary
            .get_or_init(|| Summary::from_values(self.sum_by_run.values().copied()))
    }

    pub fn mean(&self) -> f64 {
        self.summary().mean
    }

    pub fn std(&self) -> f64 {
        self.summary().std
    }

    pub fn max(&self) -> f64 {
        self.summary().max
    }

    /// True if all members are empty.
    pub fn empty(&self) -> bool {
        self.members.iter().all(|m| m.stat.empty())
    }

    /// Number of distinct runs across all members.
    pub fn num_runs(&self) -> usize {
        self.sum_by_run.len()
    }
}

impl<'t> Measurement for Bucket<'t> {
    fn mean(&self) -> f64 {
        Bucket::mean(self)
    }
    fn std(&self) -> f64 {
        Bucket::std(self)
    }
    fn max(&self) -> f64 {
        Bucket::max(self)
    }
    fn empty(&self) -> bool {
        Bucket::empty(self)
    }
    fn num_runs(&self) -> usize {
        Bucket::num_runs(self)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use approx::assert_relative_eq;

    use super::*;

    fn stat(name: &str, vals: &[(f64, &str)]) -> Result<Stat> {
        let mut s = Stat::new(KString::from_ref(name));
        for (v, run) in vals {
            s.add_value(*v, "nfsstats", KString::from_ref(run))?;
        }
        s.finalize();
        Ok(s)
    }

    #[test]
    fn t_stat_summary() -> Result<()> {
        let s = stat("nfsstats:read", &[(2., "r1"), (4., "r2"), (4., "r3"), (6., "r4")])?;
        assert_relative_eq!(s.mean(), 4.);
        // population, not sample, standard deviation
        assert_relative_eq!(s.std(), 2f64.sqrt());
        assert_relative_eq!(s.max(), 6.);
        assert!(!s.empty());
        assert_eq!(s.num_runs(), 4);
        assert_eq!(s.run_value("r2"), Ok(4.));
        assert!(s.run_value("r9").is_err());
        assert_eq!(s.run_value_or("r9", -1.), -1.);
        assert_eq!(s.filename(), Some("nfsstats"));

        let z = stat("nfsstats:write", &[(0., "r1"), (0., "r2")])?;
        assert!(z.empty());
        Ok(())
    }

    #[test]
    fn t_stat_contract() {
        let mut s = Stat::new("nfsstats:read");
        s.add_value(1., "nfsstats", "r1".into()).expect("first add");
        assert!(matches!(
            s.add_value(1., "nfsstats", "r1".into()),
            Err(ContractViolation::DuplicateRun { .. })
        ));
        assert!(matches!(
            s.add_value(1., "mountstats", "r2".into()),
            Err(ContractViolation::FilenameMismatch { .. })
        ));
        assert_eq!(s.values().len(), s.run_ids().len());
        assert_eq!(s.num_runs(), 1);
    }

    #[test]
    #[should_panic(expected = "not finalized")]
    fn t_stat_mean_requires_finalize() {
        let mut s = Stat::new("x");
        s.add_value(1., "f", "r1".into()).expect("first add");
        s.mean();
    }

    #[test]
    fn t_bucket_sums_per_run_first() -> Result<()> {
        let a = stat("ops:read", &[(10., "r1"), (10., "r2")])?;
        // b has an extra run with a large value
        let b = stat("ops:write", &[(1., "r1"), (1., "r2"), (100., "r3")])?;
        let mut bucket = Bucket::new("Read and Write");
        bucket.add_stat(&a, "read")?;
        bucket.add_stat(&b, "write")?;
        bucket.finalize();

        let per_run_sums = [11., 11., 100.];
        let expected = per_run_sums.iter().sum::<f64>() / 3.;
        assert_relative_eq!(bucket.mean(), expected);
        let sum_of_means = a.mean() + b.mean();
        assert!((bucket.mean() - sum_of_means).abs() > 1.);
        assert_relative_eq!(bucket.max(), 100.);
        assert_eq!(bucket.num_runs(), 3);
        assert_eq!(bucket.run_total("r3"), Some(100.));
        // members ordered by descending mean
        assert_eq!(bucket.members()[0].stat.name(), "ops:write");
        Ok(())
    }

    #[test]
    fn t_bucket_hatch_indices_and_filename() -> Result<()> {
        let a = stat("ops:read", &[(1., "r1")])?;
        let mut other = Stat::new("times:Real Time");
        other.add_value(1., "test.time", "r1".into())?;
        other.finalize();

        let mut bucket = Bucket::new("Read");
        bucket.add_stat(&a, "read")?;
        assert!(matches!(
            bucket.add_stat(&other, "real"),
            Err(ContractViolation::BucketFilenameMismatch { .. })
        ));
        let ranks: BTreeMap<KString, usize> = [(KString::from_static("ops:read"), 3)].into();
        bucket.assign_hatch_indices(&ranks);
        assert_eq!(bucket.members()[0].hatch_index, Some(3));
        Ok(())
    }
}
