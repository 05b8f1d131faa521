//! A `Selector` picks a point or a region in the space spanned by
//! the 8 trace dimensions. A selector with exactly one value in
//! every dimension ("singular") identifies one trace record and is
//! the only kind that may be used as a hash key.

use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    ops::Add,
};

use itertools::Itertools;
use kstring::KString;
use smallvec::{smallvec, SmallVec};

/// One of the fixed categorical axes. The declaration order is the
/// priority order used for equality, ordering and hashing of
/// `Selector`s.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Workload,
    Kernel,
    Mountopt,
    Detect,
    Tag,
    Client,
    Server,
    Path,
}

impl Dimension {
    /// All dimensions, in priority order.
    pub const ALL: [Dimension; 8] = [
        Dimension::Workload,
        Dimension::Kernel,
        Dimension::Mountopt,
        Dimension::Detect,
        Dimension::Tag,
        Dimension::Client,
        Dimension::Server,
        Dimension::Path,
    ];

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The name as used in the `arguments` file of a trace directory
    /// (`mountopts`, `detects` and `tags` are plural there).
    pub fn attr_name(self) -> &'static str {
        match self {
            Dimension::Workload => "workload",
            Dimension::Kernel => "kernel",
            Dimension::Mountopt => "mountopts",
            Dimension::Detect => "detects",
            Dimension::Tag => "tags",
            Dimension::Client => "client",
            Dimension::Server => "server",
            Dimension::Path => "path",
        }
    }

    /// All dimensions except `self`, in priority order.
    pub fn others(self) -> impl Iterator<Item = Dimension> + Clone {
        Dimension::ALL.into_iter().filter(move |d| *d != self)
    }
}

/// The ordering that `gather_data` uses unless told otherwise.
pub const DEFAULT_GATHER_ORDER: [Dimension; 8] = [
    Dimension::Workload,
    Dimension::Client,
    Dimension::Server,
    Dimension::Mountopt,
    Dimension::Detect,
    Dimension::Tag,
    Dimension::Kernel,
    Dimension::Path,
];

/// Ordered, duplicate-free values of one dimension.
pub type ValueSet = SmallVec<[KString; 1]>;

/// Conversion of the various ways of giving the values for one
/// dimension (single value or collection).
pub trait IntoValueSet {
    fn into_value_set(self) -> ValueSet;
}

impl IntoValueSet for &str {
    fn into_value_set(self) -> ValueSet {
        smallvec![KString::from_ref(self)]
    }
}

impl IntoValueSet for String {
    fn into_value_set(self) -> ValueSet {
        smallvec![KString::from(self)]
    }
}

impl IntoValueSet for KString {
    fn into_value_set(self) -> ValueSet {
        smallvec![self]
    }
}

impl IntoValueSet for ValueSet {
    fn into_value_set(self) -> ValueSet {
        dedup(self)
    }
}

impl IntoValueSet for &[&str] {
    fn into_value_set(self) -> ValueSet {
        dedup(self.iter().map(|s| KString::from_ref(s)).collect())
    }
}

impl<const N: usize> IntoValueSet for [&str; N] {
    fn into_value_set(self) -> ValueSet {
        self.as_slice().into_value_set()
    }
}

impl IntoValueSet for Vec<&str> {
    fn into_value_set(self) -> ValueSet {
        self.as_slice().into_value_set()
    }
}

impl IntoValueSet for Vec<String> {
    fn into_value_set(self) -> ValueSet {
        dedup(self.into_iter().map(KString::from).collect())
    }
}

impl IntoValueSet for Vec<KString> {
    fn into_value_set(self) -> ValueSet {
        dedup(self.into_iter().collect())
    }
}

/// Remove duplicates, keeping the first occurrence of each value.
fn dedup(values: ValueSet) -> ValueSet {
    let mut out = ValueSet::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SelectorError {
    #[error("no values given for dimension {0}")]
    EmptyDimension(Dimension),
}

/// Field order is the priority order, which the derived
/// `PartialOrd`/`Ord` rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Selector {
    workloads: ValueSet,
    kernels: ValueSet,
    mountopts: ValueSet,
    detects: ValueSet,
    tags: ValueSet,
    clients: ValueSet,
    servers: ValueSet,
    paths: ValueSet,
}

fn pluralize(name: &str, n: usize) -> String {
    if n != 1 {
        format!("{name}s")
    } else {
        name.into()
    }
}

impl Selector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workloads: impl IntoValueSet,
        kernels: impl IntoValueSet,
        mountopts: impl IntoValueSet,
        detects: impl IntoValueSet,
        tags: impl IntoValueSet,
        clients: impl IntoValueSet,
        servers: impl IntoValueSet,
        paths: impl IntoValueSet,
    ) -> Result<Self, SelectorError> {
        Self::from_value_sets([
            workloads.into_value_set(),
            kernels.into_value_set(),
            mountopts.into_value_set(),
            detects.into_value_set(),
            tags.into_value_set(),
            clients.into_value_set(),
            servers.into_value_set(),
            paths.into_value_set(),
        ])
    }

    /// `sets` in the order of `Dimension::ALL`.
    pub fn from_value_sets(sets: [ValueSet; 8]) -> Result<Self, SelectorError> {
        let [workloads, kernels, mountopts, detects, tags, clients, servers, paths] =
            sets.map(dedup);
        let slf = Selector {
            workloads,
            kernels,
            mountopts,
            detects,
            tags,
            clients,
            servers,
            paths,
        };
        for dim in Dimension::ALL {
            if slf.values(dim).is_empty() {
                return Err(SelectorError::EmptyDimension(dim));
            }
        }
        Ok(slf)
    }

    /// Build a selector by calling `f` for every dimension.
    pub fn try_from_fn<E: From<SelectorError>>(
        mut f: impl FnMut(Dimension) -> Result<ValueSet, E>,
    ) -> Result<Self, E> {
        let mut sets: [ValueSet; 8] = Default::default();
        for (set, dim) in sets.iter_mut().zip(Dimension::ALL) {
            *set = f(dim)?;
        }
        Ok(Self::from_value_sets(sets)?)
    }

    pub fn values(&self, dim: Dimension) -> &ValueSet {
        match dim {
            Dimension::Workload => &self.workloads,
            Dimension::Kernel => &self.kernels,
            Dimension::Mountopt => &self.mountopts,
            Dimension::Detect => &self.detects,
            Dimension::Tag => &self.tags,
            Dimension::Client => &self.clients,
            Dimension::Server => &self.servers,
            Dimension::Path => &self.paths,
        }
    }

    fn values_mut(&mut self, dim: Dimension) -> &mut ValueSet {
        match dim {
            Dimension::Workload => &mut self.workloads,
            Dimension::Kernel => &mut self.kernels,
            Dimension::Mountopt => &mut self.mountopts,
            Dimension::Detect => &mut self.detects,
            Dimension::Tag => &mut self.tags,
            Dimension::Client => &mut self.clients,
            Dimension::Server => &mut self.servers,
            Dimension::Path => &mut self.paths,
        }
    }

    /// The single value of `dim`. Panics if the dimension holds more
    /// than one value.
    pub fn value(&self, dim: Dimension) -> &str {
        let vals = self.values(dim);
        assert!(vals.len() == 1, "{dim} is not singular: {vals:?}");
        &vals[0]
    }

    /// A copy with `dim` replaced by `values`.
    pub fn with_values(
        &self,
        dim: Dimension,
        values: impl IntoValueSet,
    ) -> Result<Self, SelectorError> {
        let values = values.into_value_set();
        if values.is_empty() {
            return Err(SelectorError::EmptyDimension(dim));
        }
        let mut slf = self.clone();
        *slf.values_mut(dim) = values;
        Ok(slf)
    }

    /// True iff every dimension holds exactly one value.
    pub fn is_valid_key(&self) -> bool {
        Dimension::ALL
            .iter()
            .all(|dim| self.values(*dim).len() == 1)
    }

    /// Iterate over the selectors resulting from varying each of
    /// `dims` over its values (the first dimension in `dims` varies
    /// slowest), holding all other dimensions as they are.
    pub fn foreach(&self, dims: impl AsRef<[Dimension]>) -> Foreach {
        Foreach::new(self.clone(), dims.as_ref())
    }

    /// `foreach` over all dimensions in priority order: the cross
    /// product of all value sets, every item singular.
    pub fn foreach_all(&self) -> Foreach {
        self.foreach(Dimension::ALL)
    }

    /// Lexicographic comparison considering only `dims`, in the given
    /// order.
    pub fn compare_order(
        &self,
        other: &Selector,
        dims: impl IntoIterator<Item = Dimension>,
    ) -> std::cmp::Ordering {
        for dim in dims {
            let r = self.values(dim).cmp(other.values(dim));
            if r.is_ne() {
                return r;
            }
        }
        std::cmp::Ordering::Equal
    }

    /// True iff in every dimension, `other`'s values are a subset of
    /// ours.
    pub fn contains(&self, other: &Selector) -> bool {
        Dimension::ALL.iter().all(|dim| {
            let ours = self.values(*dim);
            other.values(*dim).iter().all(|v| ours.contains(v))
        })
    }

    /// Per-dimension union; our values keep their order, new values
    /// from `other` are appended in their order.
    pub fn union(&self, other: &Selector) -> Selector {
        let mut slf = self.clone();
        for dim in Dimension::ALL {
            let vals = slf.values_mut(dim);
            for v in other.values(dim) {
                if !vals.contains(v) {
                    vals.push(v.clone());
                }
            }
        }
        slf
    }

    /// The values of `dim` joined with `sep`.
    pub fn fmt_values(&self, dim: Dimension, sep: &str) -> String {
        self.values(dim).iter().join(sep)
    }

    /// `(title, values)` for every dimension where we differ from
    /// `baseline`, e.g. to label a report with only the dimensions
    /// that were narrowed.
    pub fn display_info(&self, baseline: &Selector, sep: &str) -> Vec<(String, String)> {
        self.display_info_filtered(|dim| self.values(dim) != baseline.values(dim), sep)
    }

    /// `display_info` for all dimensions.
    pub fn display_info_all(&self, sep: &str) -> Vec<(String, String)> {
        self.display_info_filtered(|_| true, sep)
    }

    fn display_info_filtered(
        &self,
        include: impl Fn(Dimension) -> bool,
        sep: &str,
    ) -> Vec<(String, String)> {
        Dimension::ALL
            .into_iter()
            .filter(|dim| include(*dim))
            .map(|dim| {
                (
                    pluralize(dim.name(), self.values(dim).len()),
                    self.fmt_values(dim, sep),
                )
            })
            .collect()
    }
}

/// Only singular selectors can be hashed; hashing any other selector
/// is a bug in the caller and panics.
impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for dim in Dimension::ALL {
            let vals = self.values(dim);
            assert!(
                vals.len() == 1,
                "can't hash selector with {dim} length != 1: {vals:?}"
            );
            vals[0].hash(state);
        }
    }
}

impl Add for &Selector {
    type Output = Selector;

    fn add(self, other: &Selector) -> Selector {
        self.union(other)
    }
}

impl Add for Selector {
    type Output = Selector;

    fn add(self, other: Selector) -> Selector {
        self.union(&other)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut is_first = true;
        for dim in Dimension::ALL {
            let vals = self.values(dim);
            let title = pluralize(dim.name(), vals.len());
            let vals = vals.iter().join(", ");
            write!(f, "{}{title}: {vals}", if is_first { "" } else { ", " })?;
            is_first = false;
        }
        Ok(())
    }
}

/// Iterator returned by `Selector::foreach`. Cloning it gives an
/// independent iterator from the current position.
#[derive(Debug, Clone)]
pub struct Foreach {
    base: Selector,
    dims: SmallVec<[Dimension; 8]>,
    // Current position in the values of each of `dims`
    indices: SmallVec<[usize; 8]>,
    done: bool,
}

impl Foreach {
    fn new(base: Selector, dims: &[Dimension]) -> Self {
        let mut uniq: SmallVec<[Dimension; 8]> = SmallVec::new();
        for dim in dims {
            if !uniq.contains(dim) {
                uniq.push(*dim);
            }
        }
        let done = uniq.iter().any(|dim| base.values(*dim).is_empty());
        let indices = smallvec![0; uniq.len()];
        Foreach {
            base,
            dims: uniq,
            indices,
            done,
        }
    }

    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.indices[i] += 1;
            if self.indices[i] < self.base.values(self.dims[i]).len() {
                return;
            }
            self.indices[i] = 0;
        }
        self.done = true;
    }
}

impl Iterator for Foreach {
    type Item = Selector;

    fn next(&mut self) -> Option<Selector> {
        if self.done {
            return None;
        }
        let mut sel = self.base.clone();
        for (dim, i) in self.dims.iter().zip(&self.indices) {
            let v = self.base.values(*dim)[*i].clone();
            *sel.values_mut(*dim) = smallvec![v];
        }
        self.advance();
        Some(sel)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;

    use super::*;

    fn strs(vals: &ValueSet) -> Vec<&str> {
        vals.iter().map(|v| v.as_str()).collect()
    }

    fn multi() -> Selector {
        Selector::new(
            ["A", "B"],
            "k1",
            ["v3", "v4", "v4.1"],
            "",
            ["", "remote"],
            "c",
            "s",
            "/export",
        )
        .expect("non-empty")
    }

    #[test]
    fn t_foreach_cross_product() {
        let sel = multi();
        let all: Vec<_> = sel.foreach_all().collect();
        assert_eq!(all.len(), 2 * 3 * 2);
        assert!(all.iter().all(Selector::is_valid_key));
        let uniq: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(uniq.len(), all.len());
        // priority order: last dimension varies fastest
        assert_eq!(all[0].value(Dimension::Workload), "A");
        assert_eq!(all[0].value(Dimension::Tag), "");
        assert_eq!(all[1].value(Dimension::Tag), "remote");
        assert_eq!(all[2].value(Dimension::Mountopt), "v4");
        assert_eq!(all[11].value(Dimension::Workload), "B");
        // restartable
        assert_eq!(sel.foreach_all().collect::<Vec<_>>(), all);
    }

    #[test]
    fn t_foreach_single_dimension() -> Result<()> {
        let sel = Selector::new("A", "k1", ["v3", "v4"], "", "", "c", "s", "/p")?;
        let subs: Vec<_> = sel.foreach([Dimension::Mountopt]).collect();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].value(Dimension::Mountopt), "v3");
        assert_eq!(subs[1].value(Dimension::Mountopt), "v4");
        assert_eq!(
            subs[0].compare_order(&subs[1], Dimension::Mountopt.others()),
            std::cmp::Ordering::Equal
        );
        Ok(())
    }

    #[test]
    fn t_foreach_holds_other_dimensions() {
        let sel = multi();
        let subs: Vec<_> = sel.foreach([Dimension::Workload]).collect();
        assert_eq!(subs.len(), 2);
        for sub in &subs {
            assert_eq!(sub.values(Dimension::Mountopt).len(), 3);
            assert!(!sub.is_valid_key());
            assert!(sel.contains(sub));
        }
        // duplicates in dims are ignored
        let dup: Vec<_> = sel
            .foreach([Dimension::Workload, Dimension::Workload])
            .collect();
        assert_eq!(dup, subs);
    }

    #[test]
    fn t_equality_and_hash() -> Result<()> {
        let a = Selector::new("A", "k", "v3", "", "", "c", "s", "/p")?;
        let b = Selector::new("A", "k", "v3", "", "", "c", "s", "/p")?;
        let c = Selector::new("A", "k", "v3", "", "", "c", "s2", "/p")?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "can't hash selector")]
    fn t_hash_non_singular_panics() {
        let mut set = HashSet::new();
        set.insert(multi());
    }

    #[test]
    fn t_ordering_priority() -> Result<()> {
        let a = Selector::new("A", "k2", "v3", "", "", "c", "s", "/p")?;
        let b = Selector::new("B", "k1", "v3", "", "", "c", "s", "/p")?;
        assert!(a < b);
        assert!(b.compare_order(&a, [Dimension::Kernel]).is_lt());
        assert!(b
            .compare_order(&a, [Dimension::Mountopt, Dimension::Path])
            .is_eq());
        Ok(())
    }

    #[test]
    fn t_union_and_contains() -> Result<()> {
        let a = Selector::new("A", "k", "v3", "", "", "c", "s", "/p")?;
        let b = Selector::new("B", "k", "v4", "", "", "c", "s", "/p")?;
        let u = &a + &b;
        assert_eq!(strs(u.values(Dimension::Workload)), ["A", "B"]);
        assert_eq!(strs(u.values(Dimension::Kernel)), ["k"]);
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.contains(&u));
        assert_eq!(u.foreach_all().count(), 4);
        Ok(())
    }

    #[test]
    fn t_construct_dedups_and_rejects_empty() {
        let sel = Selector::new(["A", "A", "B"], "k", "v3", "", "", "c", "s", "/p")
            .expect("non-empty");
        assert_eq!(strs(sel.values(Dimension::Workload)), ["A", "B"]);
        let empty: Vec<&str> = vec![];
        assert_eq!(
            Selector::new("A", "k", empty, "", "", "c", "s", "/p"),
            Err(SelectorError::EmptyDimension(Dimension::Mountopt))
        );
    }

    #[test]
    fn t_display_info() -> Result<()> {
        let all = multi();
        let narrowed = all.with_values(Dimension::Mountopt, "v4")?;
        assert_eq!(
            narrowed.display_info(&all, " "),
            vec![("mountopt".to_string(), "v4".to_string())]
        );
        let wider = all.with_values(Dimension::Kernel, ["k1", "k2"])?;
        assert_eq!(
            wider.display_info(&all, ", "),
            vec![("kernels".to_string(), "k1, k2".to_string())]
        );
        assert_eq!(all.display_info_all(" ").len(), 8);
        Ok(())
    }

    #[test]
    fn t_dimension_names() {
        assert_eq!(Dimension::Mountopt.name(), "mountopt");
        assert_eq!(Dimension::Mountopt.attr_name(), "mountopts");
        assert_eq!("detect".parse::<Dimension>().ok(), Some(Dimension::Detect));
        assert_eq!(Dimension::Path.others().count(), 7);
    }
}
