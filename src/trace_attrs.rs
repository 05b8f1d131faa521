//! The attributes of a trace directory, persisted in its `arguments`
//! file as `name = value` lines, and their migration from older
//! trace directory versions.

use std::{
    collections::BTreeMap,
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;

use crate::{
    debug,
    error::ContractViolation,
    mountopts,
    selector::{Dimension, IntoValueSet, Selector, ValueSet},
};

/// Name of the attribute file in a trace directory.
pub const TRACE_ATTRFILE: &str = "arguments";

/// The version written by current trace runs; older directories are
/// migrated up to it on load.
pub const TRACE_DIR_VERSION: u32 = 10;

/// What descriptions and commands are shown for workloads whose
/// definition is not known.
pub const UNKNOWN_WORKLOAD: &str = "# (unknown)";

/// Knows the workload definitions, to fill in attributes that older
/// trace directories lack.
pub trait WorkloadCatalog {
    fn description(&self, workload: &str) -> Option<String>;
    fn command(&self, workload: &str) -> Option<String>;
}

/// A catalog without any workloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCatalog;

impl WorkloadCatalog for EmptyCatalog {
    fn description(&self, _workload: &str) -> Option<String> {
        None
    }
    fn command(&self, _workload: &str) -> Option<String> {
        None
    }
}

/// A catalog from a fixed table of `(workload, description, command)`.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    entries: BTreeMap<String, (String, String)>,
}

impl TableCatalog {
    pub fn insert(&mut self, workload: &str, description: &str, command: &str) {
        self.entries
            .insert(workload.into(), (description.into(), command.into()));
    }
}

impl WorkloadCatalog for TableCatalog {
    fn description(&self, workload: &str) -> Option<String> {
        self.entries.get(workload).map(|(d, _)| d.clone())
    }
    fn command(&self, workload: &str) -> Option<String> {
        self.entries.get(workload).map(|(_, c)| c.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceAttrs {
    dir: PathBuf,
    attrs: BTreeMap<String, String>,
    // The `tracedir_version` found on disk, before migration
    orig_version: Option<u32>,
}

fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
}

fn escape(s: &str) -> String {
    s.replace('\n', "\\n")
}

type MigrationStep = fn(&mut TraceAttrs, &dyn WorkloadCatalog) -> Result<()>;

/// `(from_version, name, step)`, the step migrates from `from_version`
/// to `from_version + 1`.
static MIGRATIONS: [(u32, &str, MigrationStep); 9] = [
    (1, "legacy tag attributes to tags", migrate_v1_tags),
    (2, "test to workload", migrate_v2_workload),
    (3, "normalize mountopts", migrate_v3_mountopts),
    (4, "rename probe tags", migrate_v4_probe_tags),
    (5, "create dmesg.diff", migrate_v5_dmesg_diff),
    (6, "workload description and command", migrate_v6_workload_info),
    (7, "split detects from tags", migrate_v7_detects),
    (8, "detects to +/- form", migrate_v8_detects_sign),
    (9, "positive detects only", migrate_v9_detects_positive),
];

impl TraceAttrs {
    /// Parse the contents of an `arguments` file belonging to the
    /// trace directory `dir`, and fill in defaults. Does not migrate.
    pub fn parse(dir: &Path, contents: &str) -> Result<Self> {
        let mut attrs = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid attribute line {line:?}"))?;
            attrs.insert(name.trim().to_string(), unescape(value.trim()));
        }
        let dirname = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        attrs.entry("tracedir".into()).or_insert(dirname);
        attrs.entry("stoptime".into()).or_insert_with(|| "ongoing".into());
        attrs
            .entry("tracedir_version".into())
            .or_insert_with(|| "1".into());
        Ok(TraceAttrs {
            dir: dir.to_owned(),
            attrs,
            orig_version: None,
        })
    }

    /// Load the attributes of the trace directory `dir` and migrate
    /// them to the current version.
    pub fn load(dir: &Path, catalog: &dyn WorkloadCatalog) -> Result<Self> {
        let path = dir.join(TRACE_ATTRFILE);
        let contents =
            read_to_string(&path).with_context(|| anyhow!("reading attribute file {path:?}"))?;
        let mut slf =
            Self::parse(dir, &contents).with_context(|| anyhow!("parsing {path:?}"))?;
        slf.migrate(catalog)?;
        Ok(slf)
    }

    /// The `tracedir_version` attribute, which must be a known
    /// version.
    pub fn version(&self) -> Result<u32, ContractViolation> {
        let s = self.get("tracedir_version").unwrap_or("");
        let unknown = || ContractViolation::UnknownVersion {
            path: self.dir.clone(),
            version: s.into(),
        };
        let v: u32 = s.trim().parse().map_err(|_| unknown())?;
        if !(1..=TRACE_DIR_VERSION).contains(&v) {
            return Err(unknown());
        }
        Ok(v)
    }

    /// Apply the migration steps from the current version up to
    /// `TRACE_DIR_VERSION`. Attributes already at that version are
    /// left unchanged.
    pub fn migrate(&mut self, catalog: &dyn WorkloadCatalog) -> Result<()> {
        let mut version = self.version()?;
        if self.orig_version.is_none() {
            self.orig_version = Some(version);
        }
        while version < TRACE_DIR_VERSION {
            let (from, name, step) = MIGRATIONS
                .iter()
                .find(|(from, _, _)| *from == version)
                .ok_or_else(|| ContractViolation::UnknownVersion {
                    path: self.dir.clone(),
                    version: version.to_string(),
                })?;
            debug!("{:?}: migrating from version {from}: {name}", self.dir);
            step(self, catalog)
                .with_context(|| anyhow!("migrating {:?} from version {from}", self.dir))?;
            version += 1;
            self.set("tracedir_version", version.to_string());
        }
        Ok(())
    }

    /// The version the attributes had on disk; `None` before
    /// `migrate` was called.
    pub fn orig_version(&self) -> Option<u32> {
        self.orig_version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Like `get`, but missing attributes are an error.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow!("{:?}: missing attribute {name:?}", self.dir))
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    fn remove(&mut self, name: &str) -> Option<String> {
        self.attrs.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The singular selector identifying the trace these attributes
    /// belong to.
    pub fn selector(&self) -> Result<Selector, ContractViolation> {
        let invalid = |selector: String| ContractViolation::InvalidKey {
            path: self.dir.clone(),
            selector,
        };
        let mut sets: [ValueSet; 8] = Default::default();
        for (set, dim) in sets.iter_mut().zip(Dimension::ALL) {
            let value = self
                .get(dim.attr_name())
                .ok_or_else(|| invalid(format!("missing attribute {:?}", dim.attr_name())))?;
            *set = value.into_value_set();
        }
        let sel = Selector::from_value_sets(sets).map_err(|e| invalid(e.to_string()))?;
        if !sel.is_valid_key() {
            return Err(invalid(sel.to_string()));
        }
        Ok(sel)
    }

    /// The contents of an `arguments` file holding these attributes.
    pub fn to_file_contents(&self) -> String {
        self.attrs
            .iter()
            .map(|(k, v)| format!("{k} = {}\n", escape(v)))
            .collect()
    }

    /// Write the attributes to the `arguments` file in `dir`.
    pub fn write(&self) -> Result<()> {
        let path = self.dir.join(TRACE_ATTRFILE);
        write(&path, self.to_file_contents()).with_context(|| anyhow!("writing {path:?}"))
    }
}

fn split_list(s: &str) -> Vec<&str> {
    s.split(',').collect()
}

const V1_TAGS: [&str; 3] = ["delegations_enabled", "pnfs_enabled", "remote"];

fn migrate_v1_tags(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let mut tags = Vec::new();
    for name in V1_TAGS {
        if let Some(value) = attrs.remove(name) {
            if value.trim() != "1" {
                bail!("tag attribute {name:?} has value {value:?}, expected 1");
            }
            tags.push(name);
        }
    }
    attrs.set("tags", tags.join(","));
    Ok(())
}

fn migrate_v2_workload(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let test = attrs
        .remove("test")
        .ok_or_else(|| anyhow!("missing attribute \"test\""))?;
    attrs.set("workload", test);
    Ok(())
}

fn migrate_v3_mountopts(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let normalized = mountopts::normalize(attrs.require("mountopts")?)?;
    attrs.set("mountopts", normalized);
    Ok(())
}

fn migrate_v4_probe_tags(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let tags = split_list(attrs.require("tags")?)
        .into_iter()
        .map(|t| match t {
            "pnfs_enabled" => "pnfs",
            "delegations_enabled" => "deleg",
            t => t,
        })
        .join(",");
    attrs.set("tags", tags);
    Ok(())
}

/// The lines of `stop` that are not in `start`, in the output format
/// of diff(1). dmesg output is only appended to, so everything after
/// the common leading lines is one change.
fn diff_lines(start: &str, stop: &str) -> String {
    let a: Vec<&str> = start.lines().collect();
    let b: Vec<&str> = stop.lines().collect();
    let common = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let range = |from: usize, to: usize| {
        if from == to {
            format!("{from}")
        } else {
            format!("{from},{to}")
        }
    };
    let (na, nb) = (a.len(), b.len());
    let mut out = String::new();
    let header = match (na > common, nb > common) {
        (false, false) => return out,
        (false, true) => format!("{common}a{}", range(common + 1, nb)),
        (true, false) => format!("{}d{common}", range(common + 1, na)),
        (true, true) => format!("{}c{}", range(common + 1, na), range(common + 1, nb)),
    };
    out.push_str(&header);
    out.push('\n');
    for line in &a[common..] {
        out.push_str(&format!("< {line}\n"));
    }
    if na > common && nb > common {
        out.push_str("---\n");
    }
    for line in &b[common..] {
        out.push_str(&format!("> {line}\n"));
    }
    out
}

fn migrate_v5_dmesg_diff(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let dir = attrs.dir();
    let diff = dir.join("dmesg.diff");
    if diff.exists() {
        return Ok(());
    }
    let (start, stop) = (dir.join("dmesg.start"), dir.join("dmesg.stop"));
    if !(start.exists() && stop.exists()) {
        debug!("{dir:?}: no dmesg.start/dmesg.stop, not creating dmesg.diff");
        return Ok(());
    }
    let start = read_to_string(&start).with_context(|| anyhow!("reading {start:?}"))?;
    let stop = read_to_string(&stop).with_context(|| anyhow!("reading {stop:?}"))?;
    write(&diff, diff_lines(&start, &stop)).with_context(|| anyhow!("writing {diff:?}"))
}

fn migrate_v6_workload_info(attrs: &mut TraceAttrs, catalog: &dyn WorkloadCatalog) -> Result<()> {
    let workload = attrs.require("workload")?.to_string();
    let description = catalog
        .description(&workload)
        .unwrap_or_else(|| UNKNOWN_WORKLOAD.into());
    let command = catalog
        .command(&workload)
        .unwrap_or_else(|| UNKNOWN_WORKLOAD.into())
        .replace(" && ", "\n");
    attrs.set("workload_description", description);
    attrs.set("workload_command", command);
    Ok(())
}

const DETECTS: [&str; 2] = ["pnfs", "deleg"];

fn migrate_v7_detects(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let (detects, tags): (Vec<&str>, Vec<&str>) = split_list(attrs.require("tags")?)
        .into_iter()
        .partition(|t| DETECTS.contains(t));
    let (detects, tags) = (detects.join(","), tags.join(","));
    attrs.set("tags", tags);
    attrs.set("detects", detects);
    Ok(())
}

fn migrate_v8_detects_sign(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let detects = split_list(attrs.require("detects")?);
    let vers = mountopts::version(attrs.require("mountopts")?)?;
    let mut new = Vec::new();
    if detects.contains(&"pnfs") {
        new.push("+pnfs");
    } else if vers == "v4.1" {
        new.push("-pnfs");
    }
    if detects.contains(&"deleg") {
        new.push("+deleg");
    } else if vers == "v4.0" || vers == "v4.1" {
        new.push("-deleg");
    }
    attrs.set("detects", new.join(","));
    Ok(())
}

fn migrate_v9_detects_positive(attrs: &mut TraceAttrs, _: &dyn WorkloadCatalog) -> Result<()> {
    let detects = split_list(attrs.require("detects")?)
        .into_iter()
        .filter_map(|d| d.strip_prefix('+'))
        .join(",");
    attrs.set("detects", detects);
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::error::is_contract_violation;

    use super::*;

    const V1: &str = "\
test = dd_100m_1k
kernel = 3.5.0
mountopts = hard,vers=4
pnfs_enabled = 1
remote = 1
client = client.example.com
server = server.example.com
path = /export

starttime = 1350000000.0
stoptime = 1350000100.5
";

    fn v1_attrs(dir: &Path) -> Result<TraceAttrs> {
        TraceAttrs::parse(dir, V1)
    }

    #[test]
    fn t_parse_defaults() -> Result<()> {
        let attrs = TraceAttrs::parse(
            Path::new("/results/nfsometer_trace-1"),
            "notes = line one\\nline two\n\n",
        )?;
        assert_eq!(attrs.get("notes"), Some("line one\nline two"));
        assert_eq!(attrs.get("tracedir"), Some("nfsometer_trace-1"));
        assert_eq!(attrs.get("stoptime"), Some("ongoing"));
        assert_eq!(attrs.version()?, 1);
        assert!(TraceAttrs::parse(Path::new("/x"), "no equals sign").is_err());
        Ok(())
    }

    #[test]
    fn t_migrate_from_v1() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut catalog = TableCatalog::default();
        catalog.insert("dd_100m_1k", "dd 100M with 1k blocks", "cd ${run_dir} && dd");
        let mut attrs = v1_attrs(dir.path())?;
        attrs.migrate(&catalog)?;

        assert_eq!(attrs.version()?, TRACE_DIR_VERSION);
        assert_eq!(attrs.orig_version(), Some(1));
        assert_eq!(attrs.get("workload"), Some("dd_100m_1k"));
        assert_eq!(attrs.get("test"), None);
        assert_eq!(attrs.get("mountopts"), Some("v4.0,hard"));
        assert_eq!(attrs.get("tags"), Some("remote"));
        // pnfs was seen, deleg was not
        assert_eq!(attrs.get("detects"), Some("pnfs"));
        assert_eq!(attrs.get("workload_description"), Some("dd 100M with 1k blocks"));
        assert_eq!(attrs.get("workload_command"), Some("cd ${run_dir}\ndd"));

        let sel = attrs.selector()?;
        assert!(sel.is_valid_key());
        assert_eq!(sel.value(Dimension::Detect), "pnfs");
        Ok(())
    }

    #[test]
    fn t_migrate_idempotent_at_current_version() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut attrs = v1_attrs(dir.path())?;
        attrs.migrate(&EmptyCatalog)?;
        assert_eq!(attrs.get("workload_command"), Some(UNKNOWN_WORKLOAD));
        let migrated = attrs.clone();
        attrs.migrate(&EmptyCatalog)?;
        assert_eq!(attrs, migrated);

        // and through a write/load cycle
        attrs.write()?;
        let reloaded = TraceAttrs::load(dir.path(), &EmptyCatalog)?;
        assert_eq!(reloaded.orig_version(), Some(TRACE_DIR_VERSION));
        assert_eq!(
            reloaded.iter().collect::<Vec<_>>(),
            migrated.iter().collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn t_unknown_version() -> Result<()> {
        for v in ["11", "0", "x"] {
            let mut attrs = TraceAttrs::parse(
                Path::new("/x"),
                &format!("tracedir_version = {v}\n"),
            )?;
            let e = attrs.migrate(&EmptyCatalog).unwrap_err();
            assert!(is_contract_violation(&e), "version {v}");
        }
        Ok(())
    }

    #[test]
    fn t_detects_sign_by_version() -> Result<()> {
        let mut attrs = TraceAttrs::parse(
            Path::new("/x"),
            "tracedir_version = 8\nmountopts = v4.1\ndetects = deleg\n",
        )?;
        migrate_v8_detects_sign(&mut attrs, &EmptyCatalog)?;
        assert_eq!(attrs.get("detects"), Some("-pnfs,+deleg"));
        migrate_v9_detects_positive(&mut attrs, &EmptyCatalog)?;
        assert_eq!(attrs.get("detects"), Some("deleg"));
        Ok(())
    }

    #[test]
    fn t_dmesg_diff() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("dmesg.start"), "a\nb\n")?;
        std::fs::write(dir.path().join("dmesg.stop"), "a\nb\nNFS: server not responding\n")?;
        let mut attrs = TraceAttrs::parse(dir.path(), "tracedir_version = 5\n")?;
        migrate_v5_dmesg_diff(&mut attrs, &EmptyCatalog)?;
        let diff = std::fs::read_to_string(dir.path().join("dmesg.diff"))?;
        assert_eq!(diff, "2a3\n> NFS: server not responding\n");
        assert_eq!(diff_lines("a\nb\n", "a\nc\n"), "2c2\n< b\n---\n> c\n");
        assert_eq!(diff_lines("a\n", "a\n"), "");
        Ok(())
    }
}
