//! Keys of statistics, and the registry of what is known about them
//! (unit, description, betterness). Each key must always be
//! registered with the same info.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use kstring::KString;

use crate::{betterness::Betterness, bucket_def::BucketDefId, error::ContractViolation};

/// Identifies a statistic: the stat bin (parsed source) it lives in,
/// and its name within that bin. Written as `bin:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatKey {
    pub bin: KString,
    pub name: KString,
}

impl StatKey {
    pub fn new(bin: impl Into<KString>, name: impl Into<KString>) -> Self {
        Self {
            bin: bin.into(),
            name: name.into(),
        }
    }
}

impl Display for StatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bin, self.name)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("stat key {0:?} is missing the `bin:` prefix")]
pub struct StatKeyParseError(String);

impl FromStr for StatKey {
    type Err = StatKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bin, name) = s
            .split_once(':')
            .ok_or_else(|| StatKeyParseError(s.into()))?;
        if bin.is_empty() || name.is_empty() {
            return Err(StatKeyParseError(s.into()));
        }
        Ok(StatKey::new(KString::from_ref(bin), KString::from_ref(name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatInfo {
    pub unit: KString,
    pub description: String,
    pub betterness: Betterness,
}

/// Owned by a `TraceCollection`; filled while loading.
#[derive(Debug, Default)]
pub struct StatInfoRegistry {
    stats: BTreeMap<StatKey, StatInfo>,
    // The same bucket name (e.g. "Other") can appear in several
    // bucket definitions
    buckets: BTreeMap<(BucketDefId, KString), StatInfo>,
}

fn register_in<K: Ord>(
    map: &mut BTreeMap<K, StatInfo>,
    key: K,
    key_display: impl Fn() -> String,
    info: StatInfo,
) -> Result<(), ContractViolation> {
    match map.get(&key) {
        Some(old) if *old == info => Ok(()),
        Some(old) => Err(ContractViolation::InfoMismatch {
            key: key_display(),
            old: old.clone(),
            new: info,
        }),
        None => {
            map.insert(key, info);
            Ok(())
        }
    }
}

impl StatInfoRegistry {
    pub fn register(&mut self, key: &StatKey, info: StatInfo) -> Result<(), ContractViolation> {
        register_in(&mut self.stats, key.clone(), || key.to_string(), info)
    }

    pub fn register_bucket(
        &mut self,
        def: BucketDefId,
        bucket_name: &str,
        info: StatInfo,
    ) -> Result<(), ContractViolation> {
        register_in(
            &mut self.buckets,
            (def, KString::from_ref(bucket_name)),
            || format!("{def}/{bucket_name}"),
            info,
        )
    }

    pub fn get(&self, key: &StatKey) -> Option<&StatInfo> {
        self.stats.get(key)
    }

    pub fn unit(&self, key: &StatKey) -> Option<&str> {
        self.get(key).map(|i| i.unit.as_str())
    }

    pub fn description(&self, key: &StatKey) -> Option<&str> {
        self.get(key).map(|i| i.description.as_str())
    }

    /// `Betterness::UNKNOWN` for unregistered keys.
    pub fn betterness(&self, key: &StatKey) -> Betterness {
        self.get(key)
            .map(|i| i.betterness)
            .unwrap_or(Betterness::UNKNOWN)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &StatKey> {
        self.stats.keys()
    }

    pub fn bucket(&self, def: BucketDefId, bucket_name: &str) -> Option<&StatInfo> {
        self.buckets.get(&(def, KString::from_ref(bucket_name)))
    }

    /// The info of all buckets of `def`, by bucket name.
    pub fn buckets(&self, def: BucketDefId) -> impl Iterator<Item = (&str, &StatInfo)> {
        self.buckets
            .range((def, KString::from_static(""))..)
            .take_while(move |((d, _), _)| *d == def)
            .map(|((_, name), info)| (name.as_str(), info))
    }
}
