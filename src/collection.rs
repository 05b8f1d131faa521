//! The index of all traces in a results directory: one `TraceStats`
//! per singular selector, plus everything learned about the stat keys
//! and buckets while loading, and the warnings about trace
//! directories that could not be (fully) loaded.

use std::{
    collections::{hash_map::Entry, BTreeMap, BTreeSet, HashMap},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use kstring::KString;
use walkdir::WalkDir;

use crate::{
    betterness::{BetterInfo, Betterness, TestBound},
    bucket_def::{BucketDefId, BucketDefs},
    config::EngineConfig,
    debug,
    error::is_contract_violation,
    info,
    parse::{ParserSet, StatSink},
    selector::{Dimension, Selector, ValueSet},
    stat::RunId,
    stat_info::{StatInfo, StatInfoRegistry, StatKey},
    trace_attrs::{EmptyCatalog, TraceAttrs, WorkloadCatalog},
    trace_stats::{InfoValue, TraceStats},
    warn,
};

/// Name prefixes of trace directories; the first is the current one.
pub const TRACE_DIR_PREFIXES: [&str; 3] = ["nfsometer_trace", "test-", "nfstest-"];

/// Default name of the notes file in a results directory.
pub const NOTES_FILE: &str = "nfsometer-notes.txt";

fn is_trace_dir_name(name: &str) -> bool {
    TRACE_DIR_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Strip an `[Errno N]` prefix and replace the trace directory path
/// with `[dir]/`.
fn clean_message(msg: &str, dirname: &str, dir: &Path) -> String {
    let msg = match msg.strip_prefix("[Errno ") {
        Some(rest) => rest.find(']').map_or(msg, |i| rest[i + 1..].trim_start()),
        None => msg,
    };
    let full = format!("{}/", dir.display());
    msg.replace(&full, "[dir]/")
        .replace(&format!("{dirname}/"), "[dir]/")
}

#[derive(Debug, Default)]
struct Warnings {
    // Keyed by directory name with a trailing slash
    by_dir: BTreeMap<String, Vec<String>>,
    // Runs for which a parser failed
    parser_failures: BTreeSet<RunId>,
}

impl Warnings {
    fn add(&mut self, dirname: &str, dir: &Path, msg: &str) {
        let key = format!("{}/", dirname.trim_end_matches('/'));
        let msg = clean_message(msg, dirname, dir);
        warn!("{key}: {msg}");
        self.by_dir.entry(key).or_default().push(msg);
    }
}

/// How trace directories are loaded.
pub struct Loader {
    parsers: ParserSet,
    catalog: Box<dyn WorkloadCatalog>,
    check_dmesg: bool,
    notes_file: String,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            parsers: ParserSet::default(),
            catalog: Box::new(EmptyCatalog),
            check_dmesg: true,
            notes_file: NOTES_FILE.into(),
        }
    }
}

impl Loader {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            check_dmesg: config.check_dmesg,
            notes_file: config.notes_file.clone(),
            ..Default::default()
        }
    }

    pub fn with_parsers(mut self, parsers: ParserSet) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_catalog(mut self, catalog: Box<dyn WorkloadCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_check_dmesg(mut self, check_dmesg: bool) -> Self {
        self.check_dmesg = check_dmesg;
        self
    }

    /// Load all trace directories in `results_dir`. Problems with
    /// individual trace directories are recorded as warnings (see
    /// `TraceCollection::warnings`); only contract violations and an
    /// unreadable `results_dir` are errors.
    pub fn load(&self, results_dir: &Path) -> Result<TraceCollection> {
        if !results_dir.is_dir() {
            bail!("results directory {results_dir:?} is not a directory");
        }
        let mut collection = TraceCollection {
            results_dir: results_dir.to_owned(),
            notes_file: self.notes_file.clone(),
            traces: HashMap::new(),
            registry: StatInfoRegistry::default(),
            bucket_defs: BucketDefs::default(),
            warnings: Warnings::default(),
            selection: None,
        };

        for entry in WalkDir::new(results_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_owned).unwrap_or_default();
                    let name = path
                        .file_name()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    collection.warnings.add(&name, &path, &e.to_string());
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_trace_dir_name(&name) || !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            info!("loading {path:?}");
            if let Err(e) = collection.load_tracedir(self, path, &name) {
                if is_contract_violation(&e) {
                    return Err(e).with_context(|| anyhow!("loading {path:?}"));
                }
                collection.warnings.add(&name, path, &format!("{e:#}"));
            }
        }

        collection.finalize()?;
        Ok(collection)
    }

    fn check_dmesg(&self, dir: &Path) -> Result<Option<String>> {
        let path = dir.join("dmesg.diff");
        let contents = match read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| anyhow!("reading {path:?}")),
        };
        let added = contents
            .lines()
            .filter(|l| l.starts_with('>') && l.to_lowercase().contains("nfs:"))
            .map(|l| l.get(2..).unwrap_or(""))
            .join("\n");
        if added.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!(
                "dmesg.start and dmesg.stop are different:\n{added}"
            )))
        }
    }
}

#[derive(Debug)]
pub struct TraceCollection {
    results_dir: PathBuf,
    notes_file: String,
    traces: HashMap<Selector, TraceStats>,
    registry: StatInfoRegistry,
    bucket_defs: BucketDefs,
    warnings: Warnings,
    selection: Option<Selector>,
}

impl TraceCollection {
    /// Load with the default `Loader`.
    pub fn load(results_dir: &Path) -> Result<Self> {
        Loader::default().load(results_dir)
    }

    fn load_tracedir(&mut self, loader: &Loader, dir: &Path, name: &str) -> Result<()> {
        let attrs = TraceAttrs::load(dir, loader.catalog.as_ref())?;

        if loader.check_dmesg {
            if let Some(msg) = loader.check_dmesg(dir)? {
                self.warnings.add(name, dir, &msg);
            }
        }

        let selector = attrs.selector()?;
        let run_id = KString::from_ref(name);
        // A directory failing up to here must leave the index unchanged
        let trace = match self.traces.entry(selector) {
            Entry::Occupied(entry) => {
                let trace = entry.into_mut();
                trace.merge_attrs(&attrs)?;
                trace
            }
            Entry::Vacant(entry) => {
                let mut trace = TraceStats::default();
                trace.merge_attrs(&attrs)?;
                entry.insert(trace)
            }
        };
        trace.add_run_id(run_id.clone());

        for (slot, parser) in loader.parsers.applicable(&attrs) {
            let mut sink = StatSink::new(run_id.clone());
            match parser.parse(dir, &attrs, &mut sink) {
                Ok(()) => {
                    debug!("{name}: {slot} parser succeeded");
                    sink.commit(trace, &mut self.registry, &mut self.bucket_defs)?;
                }
                Err(e) => {
                    self.warnings
                        .add(name, dir, &format!("{slot} parser: {e:#}"));
                    self.warnings.parser_failures.insert(run_id.clone());
                }
            }
        }
        Ok(())
    }

    /// Finalize all traces, register the bucket info, and calculate
    /// the overall selection.
    fn finalize(&mut self) -> Result<()> {
        let selectors: Vec<Selector> = self.traces.keys().cloned().sorted().collect();
        for selector in &selectors {
            let Some(trace) = self.traces.get_mut(selector) else {
                continue;
            };
            if let Err(e) = trace.finalize_statbins(selector) {
                // A failed parser explains missing runs
                let failed_run = trace
                    .run_ids()
                    .iter()
                    .find(|r| self.warnings.parser_failures.contains(*r))
                    .cloned();
                match failed_run {
                    Some(run) => {
                        let dir = self.results_dir.join(run.as_str());
                        self.warnings.add(&run, &dir, &e.to_string());
                    }
                    None => return Err(e.into()),
                }
            }
        }

        for (def_id, def) in self.bucket_defs.iter() {
            for key in def.keys() {
                let Some(info) = self.registry.get(key) else {
                    continue;
                };
                let bucket = def.key_to_bucket(key);
                let bucket_info = StatInfo {
                    unit: info.unit.clone(),
                    description: def_id.description(bucket),
                    betterness: info.betterness,
                };
                self.registry.register_bucket(def_id, bucket, bucket_info)?;
            }
        }

        self.selection = if self.traces.is_empty() {
            None
        } else {
            let selection = Selector::try_from_fn(|dim| {
                let values: BTreeSet<&KString> = self
                    .traces
                    .keys()
                    .flat_map(|sel| sel.values(dim).iter())
                    .collect();
                Ok::<_, anyhow::Error>(values.into_iter().cloned().collect::<ValueSet>())
            })?;
            Some(selection)
        };
        Ok(())
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// All observed values, sorted, in each dimension. `None` for an
    /// empty collection.
    pub fn selection(&self) -> Option<&Selector> {
        self.selection.as_ref()
    }

    /// The trace for the singular `selector`.
    pub fn get_trace(&self, selector: &Selector) -> Option<&TraceStats> {
        self.traces.get(selector)
    }

    /// Whether any trace matches `selection`.
    pub fn has_traces(&self, selection: &Selector) -> bool {
        selection
            .foreach_all()
            .any(|sel| self.traces.contains_key(&sel))
    }

    /// All traces, sorted by selector.
    pub fn traces(&self) -> impl Iterator<Item = (&Selector, &TraceStats)> {
        self.traces.iter().sorted_by(|a, b| a.0.cmp(b.0))
    }

    pub fn registry(&self) -> &StatInfoRegistry {
        &self.registry
    }

    pub fn bucket_defs(&self) -> &BucketDefs {
        &self.bucket_defs
    }

    /// The sorted union of the values of the info attribute `name` of
    /// all traces matching `selection`.
    pub fn get_attr(&self, selection: &Selector, name: &str) -> Vec<InfoValue> {
        let mut values = BTreeSet::new();
        for sel in selection.foreach_all() {
            if let Some(info) = self.traces.get(&sel).and_then(|t| t.get_info(name)) {
                values.extend(info.iter().cloned());
            }
        }
        values.into_iter().collect()
    }

    /// Warnings as `(directory, messages)`, sorted by directory.
    pub fn warnings(&self) -> Vec<(&str, &[String])> {
        self.warnings
            .by_dir
            .iter()
            .map(|(dir, msgs)| (dir.as_str(), msgs.as_slice()))
            .collect()
    }

    /// The lines of the notes file of the results directory, empty
    /// if there is none.
    pub fn notes_get(&self) -> Result<Vec<String>> {
        let path = self.results_dir.join(&self.notes_file);
        match read_to_string(&path) {
            Ok(s) => Ok(s.lines().map(String::from).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| anyhow!("reading notes file {path:?}")),
        }
    }

    /// Whether less or more is better for `key` in traces of
    /// `selection`, which must have a single workload.
    pub fn get_better_info(&self, selection: &Selector, key: &StatKey) -> Option<BetterInfo> {
        let bound = TestBound::of_workload(selection.value(Dimension::Workload));
        self.registry.betterness(key).better_info(bound)
    }

    /// Descriptions and betterness of the buckets of `def`, keyed by
    /// bucket name, e.g. for a legend.
    pub fn bucket_legend_info(
        &self,
        def: BucketDefId,
    ) -> (BTreeMap<String, String>, BTreeMap<String, Betterness>) {
        let mut descriptions = BTreeMap::new();
        let mut betterness = BTreeMap::new();
        for (name, info) in self.registry.buckets(def) {
            descriptions.insert(name.to_string(), info.description.clone());
            betterness.insert(name.to_string(), info.betterness);
        }
        (descriptions, betterness)
    }

    /// A listing of the traces matching `selector` (or all traces):
    /// for each client, kernel, server and path, which workloads were
    /// run how many times with which mount options, detects and tags.
    pub fn show_contents(&self, selector: Option<&Selector>) -> Vec<String> {
        let Some(selector) = selector.or(self.selection.as_ref()) else {
            return Vec::new();
        };
        let outer = [
            Dimension::Client,
            Dimension::Kernel,
            Dimension::Server,
            Dimension::Path,
        ];
        let mut out = Vec::new();
        for sel in selector.foreach(outer) {
            // mount options/detects/tags -> runs -> workloads
            let mut by_mdt: Vec<(String, BTreeMap<usize, Vec<KString>>)> = Vec::new();
            for subsel in sel.foreach_all() {
                let Some(trace) = self.traces.get(&subsel) else {
                    continue;
                };
                let mut mdt = subsel.value(Dimension::Mountopt).to_string();
                for dim in [Dimension::Detect, Dimension::Tag] {
                    let v = subsel.value(dim);
                    if !v.is_empty() {
                        mdt.push(' ');
                        mdt.push_str(v);
                    }
                }
                let i = match by_mdt.iter().position(|(m, _)| *m == mdt) {
                    Some(i) => i,
                    None => {
                        by_mdt.push((mdt, BTreeMap::new()));
                        by_mdt.len() - 1
                    }
                };
                by_mdt[i]
                    .1
                    .entry(trace.num_runs())
                    .or_default()
                    .push(KString::from_ref(subsel.value(Dimension::Workload)));
            }
            if by_mdt.is_empty() {
                continue;
            }

            // workloads -> "N runs of mdt" lines
            let mut by_workloads: Vec<(String, Vec<String>)> = Vec::new();
            for (mdt, runs) in &by_mdt {
                for (n, workloads) in runs {
                    let workloads = workloads.join(" ");
                    let line = format!("{n} runs of {mdt}");
                    match by_workloads.iter_mut().find(|(w, _)| *w == workloads) {
                        Some((_, lines)) => lines.push(line),
                        None => by_workloads.push((workloads, vec![line])),
                    }
                }
            }

            out.push(format!(" client:    {}", sel.value(Dimension::Client)));
            out.push(format!(" kernel:    {}", sel.value(Dimension::Kernel)));
            out.push(format!(" server:    {}", sel.value(Dimension::Server)));
            out.push(format!(" path:      {}", sel.value(Dimension::Path)));
            for (workloads, lines) in by_workloads {
                out.push(format!(" workloads: {workloads}"));
                for line in lines {
                    out.push(format!("   {line}"));
                }
            }
            out.push(String::new());
        }
        out
    }
}
