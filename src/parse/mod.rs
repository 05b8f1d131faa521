//! Parsers turn the files of one trace directory into stat values.
//! They hand everything to a `StatSink`, which is only committed to
//! the trace when the parser finished successfully.

pub mod time;

use std::path::Path;

use anyhow::{bail, Result};
use kstring::KString;
use smallvec::SmallVec;

use crate::{
    betterness::Betterness,
    bucket_def::{BucketDefId, BucketDefs},
    error::ContractViolation,
    stat::RunId,
    stat_info::{StatInfo, StatInfoRegistry, StatKey},
    trace_attrs::TraceAttrs,
    trace_stats::{InfoValue, TraceStats},
};

/// Parses one kind of file in a trace directory.
pub trait StatParser {
    fn parse(&self, tracedir: &Path, attrs: &TraceAttrs, sink: &mut StatSink) -> Result<()>;
}

/// Assignment of a stat key to a bucket of a bucket definition.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAssignment {
    pub def: BucketDefId,
    /// `None` puts the key into the "Other" bucket
    pub bucket: Option<KString>,
    /// Label to show instead of the key
    pub display: Option<KString>,
}

impl BucketAssignment {
    pub fn new(def: BucketDefId, bucket: &str) -> Self {
        Self {
            def,
            bucket: Some(KString::from_ref(bucket)),
            display: None,
        }
    }

    pub fn with_display(mut self, display: &str) -> Self {
        self.display = Some(KString::from_ref(display));
        self
    }
}

#[derive(Debug)]
struct StagedBin {
    name: KString,
    description: String,
    filename: KString,
}

#[derive(Debug)]
struct StagedValue {
    key: StatKey,
    value: f64,
    filename: KString,
    info: StatInfo,
    buckets: SmallVec<[BucketAssignment; 1]>,
}

/// Collects the output of one parser run on one trace directory.
#[derive(Debug)]
pub struct StatSink {
    run_id: RunId,
    bins: Vec<StagedBin>,
    values: Vec<StagedValue>,
    info: Vec<(KString, InfoValue)>,
}

/// Adds values to one stat bin, see `StatSink::bin`.
pub struct BinSink<'s> {
    sink: &'s mut StatSink,
    bin: usize,
}

impl<'s> BinSink<'s> {
    /// Stage `value` for the stat `name` in this bin.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: &str,
        value: f64,
        unit: &str,
        description: &str,
        betterness: Betterness,
        buckets: impl IntoIterator<Item = BucketAssignment>,
    ) -> Result<()> {
        let bin = &self.sink.bins[self.bin];
        let key = StatKey::new(bin.name.clone(), KString::from_ref(name));
        if !value.is_finite() {
            bail!("{key}: invalid value {value}");
        }
        let filename = bin.filename.clone();
        self.sink.values.push(StagedValue {
            key,
            value,
            filename,
            info: StatInfo {
                unit: KString::from_ref(unit),
                description: description.into(),
                betterness,
            },
            buckets: buckets.into_iter().collect(),
        });
        Ok(())
    }
}

impl StatSink {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            bins: Vec::new(),
            values: Vec::new(),
            info: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Start (or continue) adding to the stat bin `name` whose values
    /// are parsed from `filename`.
    pub fn bin(&mut self, name: &str, description: &str, filename: &str) -> BinSink<'_> {
        let bin = match self.bins.iter().position(|b| b.name.as_str() == name) {
            Some(i) => i,
            None => {
                self.bins.push(StagedBin {
                    name: KString::from_ref(name),
                    description: description.into(),
                    filename: KString::from_ref(filename),
                });
                self.bins.len() - 1
            }
        };
        BinSink { sink: self, bin }
    }

    /// Stage an info attribute for the trace, e.g. the mount options
    /// seen by the client.
    pub fn add_info(&mut self, name: &str, value: InfoValue) {
        self.info.push((KString::from_ref(name), value));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.info.is_empty()
    }

    /// Move everything staged into `trace`, registering the stat info
    /// and the bucket assignments of the keys.
    pub fn commit(
        self,
        trace: &mut TraceStats,
        registry: &mut StatInfoRegistry,
        bucket_defs: &mut BucketDefs,
    ) -> Result<(), ContractViolation> {
        let StatSink {
            run_id,
            bins,
            values,
            info,
        } = self;
        for bin in &bins {
            trace.statbin_mut(&bin.name, &bin.description, &bin.filename);
        }
        for v in values {
            trace.add_value(&v.key, v.value, &v.filename, run_id.clone())?;
            registry.register(&v.key, v.info)?;
            for b in &v.buckets {
                bucket_defs.get_mut(b.def).add_key(
                    b.bucket.as_deref(),
                    &v.key,
                    b.display.as_deref(),
                );
            }
        }
        for (name, value) in info {
            trace.add_info(&name, value);
        }
        Ok(())
    }
}

/// The parsers every trace directory is run through, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ParserSlot {
    Time,
    Mountstats,
    Nfsiostat,
    Nfsstats,
    ProcMountstats,
    Filebench,
}

impl ParserSlot {
    /// Whether the parser applies to the trace with `attrs`.
    pub fn applies(self, attrs: &TraceAttrs) -> bool {
        match self {
            ParserSlot::Time
            | ParserSlot::Mountstats
            | ParserSlot::Nfsiostat
            | ParserSlot::Nfsstats => true,
            // /proc/self/mountstats was only saved from version 5 on
            ParserSlot::ProcMountstats => attrs.orig_version().map_or(false, |v| v > 4),
            ParserSlot::Filebench => attrs
                .get("workload")
                .map_or(false, |w| w.starts_with("filebench_")),
        }
    }
}

/// The parser for each slot, if any.
pub struct ParserSet {
    parsers: Vec<(ParserSlot, Box<dyn StatParser>)>,
}

impl Default for ParserSet {
    /// Only the built-in `time(1)` parser.
    fn default() -> Self {
        Self::empty().with_parser(ParserSlot::Time, Box::new(time::TimeParser))
    }
}

impl ParserSet {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Set the parser for `slot`, replacing a previous one.
    pub fn with_parser(mut self, slot: ParserSlot, parser: Box<dyn StatParser>) -> Self {
        self.parsers.retain(|(s, _)| *s != slot);
        self.parsers.push((slot, parser));
        self.parsers.sort_by_key(|(s, _)| *s);
        self
    }

    /// The parsers applying to `attrs`, in slot order.
    pub fn applicable<'s>(
        &'s self,
        attrs: &'s TraceAttrs,
    ) -> impl Iterator<Item = (ParserSlot, &'s dyn StatParser)> + 's {
        self.parsers
            .iter()
            .filter(move |(slot, _)| slot.applies(attrs))
            .map(|(slot, p)| (*slot, p.as_ref()))
    }
}
