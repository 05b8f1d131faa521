//! Bucket definitions: which stat keys are summed up into which named
//! bucket, for each kind of bucket view.

use std::collections::{BTreeMap, BTreeSet};

use kstring::KString;
use lazy_static::lazy_static;

use crate::stat_info::StatKey;

/// The bucket that keys without an explicit assignment land in.
pub const BUCKET_OTHER: &str = "Other";

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
)]
#[strum(serialize_all = "snake_case")]
pub enum BucketDefId {
    WallTimes,
    ExecTimes,
    Nfsstat,
    MountstatExecTime,
    MountstatRtt,
    MountstatBytesSent,
    MountstatBytesReceived,
    Iozone,
}

impl BucketDefId {
    pub const ALL: [BucketDefId; 8] = [
        BucketDefId::WallTimes,
        BucketDefId::ExecTimes,
        BucketDefId::Nfsstat,
        BucketDefId::MountstatExecTime,
        BucketDefId::MountstatRtt,
        BucketDefId::MountstatBytesSent,
        BucketDefId::MountstatBytesReceived,
        BucketDefId::Iozone,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Template for the description of the buckets, `{bucket}` is
    /// replaced with the bucket name.
    pub fn description_template(self) -> &'static str {
        match self {
            BucketDefId::WallTimes => "Average wall-clock time of workload",
            BucketDefId::ExecTimes => "Execution times of workload",
            BucketDefId::Nfsstat => "Count of NFS operations for group {bucket}",
            BucketDefId::MountstatExecTime => {
                "Average operation execution time for group {bucket}"
            }
            BucketDefId::MountstatRtt => "Operation round trip time for group {bucket}",
            BucketDefId::MountstatBytesSent => {
                "Average bytes sent per operation for group {bucket}"
            }
            BucketDefId::MountstatBytesReceived => {
                "Average bytes received per operation for group {bucket}"
            }
            BucketDefId::Iozone => "Average KB/s for iozone {bucket}",
        }
    }

    pub fn description(self, bucket: &str) -> String {
        self.description_template().replace("{bucket}", bucket)
    }
}

/// The key to bucket assignment for one `BucketDefId`. The first
/// assignment of a key wins.
#[derive(Debug, Clone, Default)]
pub struct BucketDef {
    key_to_bucket: BTreeMap<StatKey, KString>,
    key_to_display: BTreeMap<StatKey, KString>,
    // Keys added without a bucket name
    other_keys: BTreeSet<StatKey>,
}

impl BucketDef {
    /// Assign `key` to `bucket` (`None` means `BUCKET_OTHER`), with an
    /// optional label to show instead of the key. Ignored if the key
    /// was assigned before.
    pub fn add_key(&mut self, bucket: Option<&str>, key: &StatKey, display: Option<&str>) {
        if self.key_to_bucket.contains_key(key) || self.other_keys.contains(key) {
            return;
        }
        if let Some(display) = display {
            self.key_to_display
                .insert(key.clone(), KString::from_ref(display));
        }
        match bucket {
            Some(bucket) if !bucket.is_empty() => {
                self.key_to_bucket
                    .insert(key.clone(), KString::from_ref(bucket));
            }
            _ => {
                self.other_keys.insert(key.clone());
            }
        }
    }

    pub fn key_to_bucket(&self, key: &StatKey) -> &str {
        self.key_to_bucket
            .get(key)
            .map(KString::as_str)
            .unwrap_or(BUCKET_OTHER)
    }

    /// All bucket names, sorted, with `BUCKET_OTHER` last (it is
    /// always included).
    pub fn bucket_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self
            .key_to_bucket
            .values()
            .map(KString::as_str)
            .filter(|n| *n != BUCKET_OTHER)
            .collect();
        let mut names: Vec<&str> = names.into_iter().collect();
        names.push(BUCKET_OTHER);
        names
    }

    /// All keys added, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &StatKey> {
        let keys: BTreeSet<&StatKey> = self
            .key_to_bucket
            .keys()
            .chain(self.other_keys.iter())
            .collect();
        keys.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_bucket.is_empty() && self.other_keys.is_empty()
    }

    /// The label for `key`: the display string given when it was
    /// added, or the key itself.
    pub fn key_display(&self, key: &StatKey) -> String {
        match self.key_to_display.get(key) {
            Some(d) => d.to_string(),
            None => key.to_string(),
        }
    }
}

/// One `BucketDef` per `BucketDefId`.
#[derive(Debug, Clone, Default)]
pub struct BucketDefs {
    defs: [BucketDef; 8],
}

impl BucketDefs {
    pub fn get(&self, id: BucketDefId) -> &BucketDef {
        &self.defs[id.index()]
    }

    pub fn get_mut(&mut self, id: BucketDefId) -> &mut BucketDef {
        &mut self.defs[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketDefId, &BucketDef)> {
        BucketDefId::ALL.into_iter().zip(self.defs.iter())
    }
}

const OP_GROUPS_NFSSTAT: &[(&str, &[&str])] = &[
    (
        "Creation and Deletion",
        &[
            "create", "open", "open_conf", "open_dgrd", "open_noat", "mkdir", "rmdir", "remove",
            "close", "mknod",
        ],
    ),
    (
        "File Metadata",
        &["access", "lookup", "lookup_root", "rename", "link", "readlink", "symlink"],
    ),
    ("Readdir", &["readdir", "readdirplus"]),
    ("Getattr and Setattr", &["getattr", "setattr"]),
    ("FS Metadata", &["fsstat", "fsinfo", "statfs"]),
    (
        "Locks and Delegations",
        &["lock", "lockt", "locku", "rel_lkowner", "delegreturn", "get_lease_t"],
    ),
    ("Write", &["write", "commit", "ds_write"]),
    ("Read", &["read"]),
    (
        "PNFS",
        &["getdevinfo", "getdevlist", "layoutget", "layoutcommit", "layoutreturn"],
    ),
    ("Getacl and Setacl", &["getacl", "setacl"]),
    ("Session", &["create_ses", "destroy_ses", "exchange_id"]),
];

const OP_GROUPS_MOUNTSTAT: &[(&str, &[&str])] = &[
    (
        "Creation and Deletion",
        &[
            "CREATE",
            "OPEN",
            "MKDIR",
            "RMDIR",
            "REMOVE",
            "CLOSE",
            "OPEN_CONFIRM",
            "OPEN_DOWNGRADE",
        ],
    ),
    (
        "File Metadata",
        &["ACCESS", "LOOKUP", "LOOKUP_ROOT", "RENAME", "LINK", "READLINK", "SYMLINK"],
    ),
    ("Readdir", &["READDIR", "READDIRPLUS"]),
    ("Getattr and Setattr", &["GETATTR", "SETATTR"]),
    ("FS Metadata", &["FSSTAT", "FSINFO", "STATFS"]),
    (
        "Locks and Delegations",
        &[
            "LOCK",
            "LOCKT",
            "LOCKU",
            "RELEASE_LOCKOWNER",
            "DELEGRETURN",
            "GET_LEASE_TIME",
        ],
    ),
    ("Write", &["WRITE", "COMMIT"]),
    ("Read", &["READ"]),
    (
        "PNFS",
        &["GETDEVICEINFO", "GETDEVICELIST", "LAYOUTGET", "LAYOUTCOMMIT", "LAYOUTRETURN"],
    ),
    ("Getacl and Setacl", &["GETACL", "SETACL"]),
    ("Session", &["CREATE_SESSION", "DESTROY_SESSION", "EXCHANGE_ID"]),
];

fn op_map(groups: &[(&'static str, &[&'static str])]) -> BTreeMap<&'static str, &'static str> {
    groups
        .iter()
        .flat_map(|(group, ops)| ops.iter().map(move |op| (*op, *group)))
        .collect()
}

lazy_static! {
    static ref NFSSTAT_OP_MAP: BTreeMap<&'static str, &'static str> = op_map(OP_GROUPS_NFSSTAT);
    static ref MOUNTSTAT_OP_MAP: BTreeMap<&'static str, &'static str> =
        op_map(OP_GROUPS_MOUNTSTAT);
}

/// The operation group of an nfsstat(8) operation name (lower case).
pub fn nfsstat_op_group(op: &str) -> Option<&'static str> {
    NFSSTAT_OP_MAP.get(op).copied()
}

/// The operation group of a mountstats operation name (upper case).
pub fn mountstat_op_group(op: &str) -> Option<&'static str> {
    MOUNTSTAT_OP_MAP.get(op).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_bucket_def() {
        let mut def = BucketDef::default();
        let real = StatKey::new("times", "Real Time");
        let sync = StatKey::new("times", "Sync Time");
        let odd = StatKey::new("times", "Odd Time");
        def.add_key(Some("Wall Times Time"), &real, None);
        def.add_key(Some("Wall Times Time"), &sync, Some("sync"));
        def.add_key(None, &odd, None);
        // first assignment wins
        def.add_key(Some("Elsewhere"), &real, Some("ignored"));

        assert_eq!(def.key_to_bucket(&real), "Wall Times Time");
        assert_eq!(def.key_to_bucket(&odd), BUCKET_OTHER);
        assert_eq!(def.bucket_names(), ["Wall Times Time", BUCKET_OTHER]);
        assert_eq!(def.keys().count(), 3);
        assert_eq!(def.key_display(&sync), "sync");
        assert_eq!(def.key_display(&real), "times:Real Time");
    }

    #[test]
    fn t_op_groups_and_descriptions() {
        assert_eq!(nfsstat_op_group("readdirplus"), Some("Readdir"));
        assert_eq!(nfsstat_op_group("READ"), None);
        assert_eq!(mountstat_op_group("EXCHANGE_ID"), Some("Session"));
        assert_eq!(
            BucketDefId::Nfsstat.description("Read"),
            "Count of NFS operations for group Read"
        );
        assert_eq!(BucketDefId::MountstatRtt.to_string(), "mountstat_rtt");
        let defs = BucketDefs::default();
        assert!(defs.iter().all(|(_, d)| d.is_empty()));
    }
}
