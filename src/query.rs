//! Queries over a loaded `TraceCollection`: the values of stat keys,
//! or of buckets of stat keys, for every group (singular selector) of
//! a selection. The results borrow from the collection.

use std::collections::{BTreeMap, HashMap};

use kstring::KString;

use crate::{
    bucket_def::BucketDefId,
    collection::TraceCollection,
    error::ContractViolation,
    selector::{Dimension, Selector},
    stat::{Bucket, Measurement, Stat},
    stat_info::StatKey,
};

/// The value of one key (or bucket) in one group.
#[derive(Debug, Clone)]
pub enum DataValue<'t> {
    /// The group has no value for the key
    NoData,
    /// All values are zero
    ZeroData,
    SingleStat(&'t Stat),
    AggregateBucket(Bucket<'t>),
}

impl<'t> DataValue<'t> {
    /// The summary values, for `SingleStat` and `AggregateBucket`.
    pub fn measurement(&self) -> Option<&dyn Measurement> {
        match self {
            DataValue::NoData | DataValue::ZeroData => None,
            DataValue::SingleStat(stat) => Some(*stat as &dyn Measurement),
            DataValue::AggregateBucket(bucket) => Some(bucket as &dyn Measurement),
        }
    }
}

#[derive(Debug)]
pub struct GatheredData<'t> {
    /// The groups with a trace, in gather order
    pub groups: Vec<Selector>,
    pub values: HashMap<Selector, BTreeMap<StatKey, DataValue<'t>>>,
}

/// Bucket name -> stat name -> rank.
pub type HatchMaps = BTreeMap<KString, BTreeMap<KString, usize>>;

#[derive(Debug)]
pub struct GatheredBuckets<'t> {
    /// The groups with a trace, in gather order
    pub groups: Vec<Selector>,
    /// Group -> bucket name -> value
    pub values: HashMap<Selector, BTreeMap<KString, DataValue<'t>>>,
    pub hatch_maps: HatchMaps,
}

/// Ranks of the stats (by name) across all groups: ordered by the sum
/// of their means, descending, ties by name.
fn hatch_ranks<'b, 't: 'b>(
    buckets: impl Iterator<Item = &'b Bucket<'t>>,
) -> BTreeMap<KString, usize> {
    let mut totals: BTreeMap<KString, f64> = BTreeMap::new();
    for bucket in buckets {
        for member in bucket.members() {
            *totals
                .entry(KString::from_ref(member.stat.name()))
                .or_insert(0.) += member.stat.mean();
        }
    }
    let mut ordered: Vec<(KString, f64)> = totals.into_iter().collect();
    ordered.sort_by(|(an, av), (bn, bv)| bv.total_cmp(av).then_with(|| an.cmp(bn)));
    ordered
        .into_iter()
        .enumerate()
        .map(|(rank, (name, _))| (name, rank))
        .collect()
}

impl TraceCollection {
    /// The groups of `selection` that have a trace, enumerated in
    /// `order` (see `DEFAULT_GATHER_ORDER`).
    fn groups(&self, selection: &Selector, order: &[Dimension]) -> Vec<Selector> {
        selection
            .foreach(order)
            .filter(|g| self.get_trace(g).is_some())
            .collect()
    }

    /// The value of each of `keys` for each group of `selection`.
    pub fn gather_data<'t>(
        &'t self,
        keys: &[StatKey],
        selection: &Selector,
        order: &[Dimension],
    ) -> GatheredData<'t> {
        let groups = self.groups(selection, order);
        let mut values = HashMap::new();
        for group in &groups {
            let Some(trace) = self.get_trace(group) else {
                continue;
            };
            let vals = keys
                .iter()
                .map(|key| {
                    let v = match trace.get_stat(key) {
                        None => DataValue::NoData,
                        Some(stat) if stat.empty() => DataValue::ZeroData,
                        Some(stat) => DataValue::SingleStat(stat),
                    };
                    (key.clone(), v)
                })
                .collect();
            values.insert(group.clone(), vals);
        }
        GatheredData { groups, values }
    }

    /// The stats of `keys` summed up into the buckets of bucket
    /// definition `def`, for each group of `selection`, plus the
    /// hatch ranks of the bucket members across all groups. Fails if
    /// the members of a bucket were parsed from different files.
    pub fn gather_buckets<'t>(
        &'t self,
        keys: &[StatKey],
        selection: &Selector,
        def: BucketDefId,
        order: &[Dimension],
    ) -> Result<GatheredBuckets<'t>, ContractViolation> {
        let bucket_def = self.bucket_defs().get(def);
        let groups = self.groups(selection, order);

        let mut buckets: HashMap<Selector, BTreeMap<KString, Bucket<'t>>> = HashMap::new();
        for group in &groups {
            let Some(trace) = self.get_trace(group) else {
                continue;
            };
            let group_buckets = buckets.entry(group.clone()).or_default();
            for key in keys {
                let Some(stat) = trace.get_stat(key) else {
                    continue;
                };
                let name = bucket_def.key_to_bucket(key);
                let bucket = group_buckets
                    .entry(KString::from_ref(name))
                    .or_insert_with(|| {
                        let mut b = Bucket::new(KString::from_ref(name));
                        if let Some(info) = self.registry().bucket(def, name) {
                            b.set_display_suffix(info.unit.clone());
                        }
                        b
                    });
                bucket.add_stat(stat, bucket_def.key_display(key))?;
            }
        }

        let mut hatch_maps = HatchMaps::new();
        for name in bucket_def.bucket_names() {
            let ranks = hatch_ranks(buckets.values().filter_map(|bs| bs.get(name)));
            if !ranks.is_empty() {
                hatch_maps.insert(KString::from_ref(name), ranks);
            }
        }

        let mut values = HashMap::new();
        for group in &groups {
            let mut group_buckets = buckets.remove(group).unwrap_or_default();
            let mut vals = BTreeMap::new();
            for name in bucket_def.bucket_names() {
                let v = match group_buckets.remove(name) {
                    None => DataValue::NoData,
                    Some(mut bucket) => {
                        if let Some(ranks) = hatch_maps.get(name) {
                            bucket.assign_hatch_indices(ranks);
                        }
                        bucket.finalize();
                        if bucket.empty() {
                            DataValue::ZeroData
                        } else {
                            DataValue::AggregateBucket(bucket)
                        }
                    }
                };
                vals.insert(KString::from_ref(name), v);
            }
            values.insert(group.clone(), vals);
        }

        Ok(GatheredBuckets {
            groups,
            values,
            hatch_maps,
        })
    }

    /// `gather_buckets` over all keys of the bucket definition.
    pub fn gather_all_buckets<'t>(
        &'t self,
        selection: &Selector,
        def: BucketDefId,
        order: &[Dimension],
    ) -> Result<GatheredBuckets<'t>, ContractViolation> {
        let keys: Vec<StatKey> = self.bucket_defs().get(def).keys().cloned().collect();
        self.gather_buckets(&keys, selection, def, order)
    }
}
