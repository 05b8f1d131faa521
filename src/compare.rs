//! Comparison of the values of one key between groups that differ
//! only in one dimension, relative to a reference group.

use std::{fmt::Display, ops::Range};

use kstring::KString;

use crate::{
    bucket_def::BUCKET_OTHER,
    query::{DataValue, GatheredBuckets, GatheredData},
    selector::{Dimension, Selector},
    stat::Measurement,
    stat_info::StatKey,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonCell {
    NoData,
    /// All values are zero
    Zero,
    /// The group the others in its span are compared to
    Reference,
    /// Not different from the reference group (index into the groups)
    Equal { reference: usize },
    /// Percentages relative to the mean of the reference group
    Diff {
        reference: usize,
        pct_diff: f64,
        pct_std: f64,
    },
}

impl Display for ComparisonCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonCell::NoData => f.write_str("no data"),
            ComparisonCell::Zero => f.write_str("zero"),
            ComparisonCell::Reference => f.write_str("ref"),
            ComparisonCell::Equal { .. } => f.write_str("="),
            ComparisonCell::Diff {
                pct_diff, pct_std, ..
            } => {
                let sign = if *pct_diff >= 0. { '+' } else { '-' };
                write!(f, "{sign}{:.2}%", pct_diff.abs())?;
                let std = format!("{:.2}", pct_std.abs());
                if std != "0.00" {
                    write!(f, " ±{std}%")?;
                }
                Ok(())
            }
        }
    }
}

/// `100 * x / y`, 0 if `y` is 0.
fn pct_f(x: f64, y: f64) -> f64 {
    if y == 0. {
        0.
    } else {
        100. * x / y
    }
}

fn diff_cell(
    reference: usize,
    ref_val: &dyn Measurement,
    val: &dyn Measurement,
) -> ComparisonCell {
    let ref_mean = ref_val.mean();
    let pct_diff = pct_f(val.mean() - ref_mean, ref_mean);
    let std = ((ref_val.std().powi(2) + val.std().powi(2)) / 2.).sqrt();
    let pct_std = pct_f(std, ref_mean);
    if format!("{:.2}", pct_diff.abs()) == "0.00" && format!("{:.2}", pct_std.abs()) == "0.00" {
        ComparisonCell::Equal { reference }
    } else {
        ComparisonCell::Diff {
            reference,
            pct_diff,
            pct_std,
        }
    }
}

/// Split `groups` into maximal runs of consecutive groups that agree
/// in all dimensions except `dimension`, as index ranges.
pub fn comparison_spans(groups: &[Selector], dimension: Dimension) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for i in 1..=groups.len() {
        let split = i == groups.len()
            || groups[i]
                .compare_order(&groups[start], dimension.others())
                .is_ne();
        if split {
            if start < i {
                spans.push(start..i);
            }
            start = i;
        }
    }
    spans
}

/// One cell per group: within each span (see `comparison_spans`) the
/// first group with non-zero data is the reference, the others are
/// compared to it. `value_of` returns `None` for groups without a
/// value.
pub fn compare<'a, 't: 'a>(
    groups: &[Selector],
    dimension: Dimension,
    mut value_of: impl FnMut(&Selector) -> Option<&'a DataValue<'t>>,
) -> Vec<ComparisonCell> {
    let mut cells = Vec::with_capacity(groups.len());
    for span in comparison_spans(groups, dimension) {
        let mut reference: Option<(usize, &dyn Measurement)> = None;
        for i in span {
            let measurement = match value_of(&groups[i]) {
                None | Some(DataValue::NoData) => {
                    cells.push(ComparisonCell::NoData);
                    continue;
                }
                Some(DataValue::ZeroData) => {
                    cells.push(ComparisonCell::Zero);
                    continue;
                }
                Some(v) => v.measurement(),
            };
            let Some(val) = measurement.filter(|m| !m.empty()) else {
                cells.push(ComparisonCell::Zero);
                continue;
            };
            match reference {
                None => {
                    reference = Some((i, val));
                    cells.push(ComparisonCell::Reference);
                }
                Some((ref_idx, ref_val)) => cells.push(diff_cell(ref_idx, ref_val, val)),
            }
        }
    }
    cells
}

impl<'t> GatheredData<'t> {
    /// Compare the values of `key` along `dimension`, one cell per
    /// group.
    pub fn compare(&self, key: &StatKey, dimension: Dimension) -> Vec<ComparisonCell> {
        compare(&self.groups, dimension, |g| {
            self.values.get(g).and_then(|vals| vals.get(key))
        })
    }
}

impl<'t> GatheredBuckets<'t> {
    /// Compare the totals of bucket `name` along `dimension`, one cell
    /// per group.
    pub fn compare(&self, name: &str, dimension: Dimension) -> Vec<ComparisonCell> {
        compare(&self.groups, dimension, |g| {
            self.values.get(g).and_then(|vals| vals.get(name))
        })
    }

    /// The bucket names in the results, in bucket definition order.
    pub fn bucket_names(&self) -> Vec<&KString> {
        match self.groups.first().and_then(|g| self.values.get(g)) {
            Some(vals) => {
                let mut names: Vec<&KString> = vals.keys().collect();
                // "Other" last
                names.sort_by_key(|n| (n.as_str() == BUCKET_OTHER, *n));
                names
            }
            None => Vec::new(),
        }
    }
}
