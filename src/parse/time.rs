//! Parser for the output of `time(1)` around the workload, saved in
//! `test.time`.

use std::{fs::read_to_string, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    betterness::Betterness,
    bucket_def::BucketDefId,
    parse::{BucketAssignment, StatParser, StatSink},
    trace_attrs::TraceAttrs,
};

pub const STATBIN: &str = "times";
pub const FILENAME: &str = "test.time";
const DESCRIPTION: &str = "output of time(1)";

pub const WALL_TIMES_BUCKET: &str = "Wall Times Time";
pub const EXEC_TIMES_BUCKET: &str = "Exec Times Time";

lazy_static! {
    static ref TIME_REAL: Regex = Regex::new(r"^real\s+(\d+)m([\d.]+)s").expect("valid regex");
    static ref TIME_USER: Regex = Regex::new(r"^user\s+(\d+)m([\d.]+)s").expect("valid regex");
    static ref TIME_SYS: Regex = Regex::new(r"^sys\s+(\d+)m([\d.]+)s").expect("valid regex");
}

/// Seconds from a line like `real 1m2.5s`.
fn parse_line(re: &Regex, line: &str) -> Result<f64> {
    let caps = re
        .captures(line)
        .ok_or_else(|| anyhow!("unexpected line {line:?}"))?;
    let minutes: f64 = caps[1].parse()?;
    let seconds: f64 = caps[2]
        .parse()
        .with_context(|| anyhow!("invalid seconds in {line:?}"))?;
    Ok(minutes * 60. + seconds)
}

fn attr_f64(attrs: &TraceAttrs, name: &str) -> Result<f64> {
    let s = attrs.require(name)?;
    s.trim()
        .parse()
        .with_context(|| anyhow!("attribute {name:?}: invalid number {s:?}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeParser;

impl StatParser for TimeParser {
    fn parse(&self, tracedir: &Path, attrs: &TraceAttrs, sink: &mut StatSink) -> Result<()> {
        let path = tracedir.join(FILENAME);
        let contents = read_to_string(&path).with_context(|| anyhow!("reading {path:?}"))?;
        let lines: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() != 3 {
            bail!("{path:?}: expected 3 lines, got {}", lines.len());
        }
        let real = parse_line(&TIME_REAL, lines[0]).with_context(|| anyhow!("{path:?}"))?;
        let user = parse_line(&TIME_USER, lines[1]).with_context(|| anyhow!("{path:?}"))?;
        let sys = parse_line(&TIME_SYS, lines[2]).with_context(|| anyhow!("{path:?}"))?;
        let trace_time = attr_f64(attrs, "stoptime")? - attr_f64(attrs, "starttime")?;

        let wall = || [BucketAssignment::new(BucketDefId::WallTimes, WALL_TIMES_BUCKET)];
        let exec = || [BucketAssignment::new(BucketDefId::ExecTimes, EXEC_TIMES_BUCKET)];
        let mut bin = sink.bin(STATBIN, DESCRIPTION, FILENAME);
        bin.add(
            "Real Time",
            real,
            "s",
            "Wall-clock time of workload execution",
            Betterness::ALWAYS_LESS,
            wall(),
        )?;
        bin.add(
            "Trace Time",
            trace_time,
            "s",
            "Wall-clock time of mount, workload execution, unmount and \
             flushing of dirty data",
            Betterness::ALWAYS_LESS,
            [],
        )?;
        bin.add(
            "Sync Time",
            trace_time - real,
            "s",
            "Wall-clock time of mount, unmount and flushing of dirty data",
            Betterness::ALWAYS_LESS,
            wall(),
        )?;
        bin.add(
            "User Time",
            user,
            "s",
            "Time spent executing the workload in the user context",
            Betterness::ALWAYS_LESS,
            exec(),
        )?;
        bin.add(
            "Sys Time",
            sys,
            "s",
            "Time spent executing the workload in the kernel context",
            Betterness::ALWAYS_LESS,
            exec(),
        )?;
        Ok(())
    }
}
