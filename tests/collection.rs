use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use approx::assert_relative_eq;

use nfsometer::{
    betterness::Betterness,
    bucket_def::{BucketDefId, BUCKET_OTHER},
    collection::{Loader, TraceCollection},
    compare::ComparisonCell,
    error::is_contract_violation,
    parse::{BucketAssignment, ParserSet, ParserSlot, StatParser, StatSink},
    query::DataValue,
    selector::{Dimension, DEFAULT_GATHER_ORDER},
    stat_info::StatKey,
    trace_attrs::{TableCatalog, TraceAttrs},
    trace_stats::{InfoValue, TraceStats},
};

fn write_trace(
    results: &Path,
    name: &str,
    mountopts: &str,
    real: &str,
    stoptime: &str,
    time_file: Option<&str>,
) -> Result<()> {
    let dir = results.join(name);
    fs::create_dir(&dir)?;
    fs::write(
        dir.join("arguments"),
        format!(
            "tracedir_version = 10\n\
             workload = dd_100m_1k\n\
             workload_command = dd if=/dev/zero of=./dd_file.100m_1k bs=1k count=102400\n\
             workload_description = dd 100MB (1k blocks)\n\
             kernel = 3.6.0\n\
             mountopts = {mountopts}\n\
             detects = \n\
             tags = \n\
             client = client.example.com\n\
             server = server.example.com\n\
             path = /export\n\
             starttime = 1000\n\
             stoptime = {stoptime}\n"
        ),
    )?;
    let time = match time_file {
        Some(s) => s.to_string(),
        None => format!("real\t0m{real}s\nuser\t0m0.100s\nsys\t0m1.500s\n"),
    };
    fs::write(dir.join("test.time"), time)?;
    Ok(())
}

fn results_tree() -> Result<tempfile::TempDir> {
    let results = tempfile::tempdir()?;
    let p = results.path();
    write_trace(p, "nfsometer_trace-1", "v3", "10.000", "1011", None)?;
    write_trace(p, "nfsometer_trace-2", "v3", "12.000", "1013", None)?;
    write_trace(p, "nfsometer_trace-3", "v4.0", "13.200", "1014.2", None)?;
    write_trace(
        p,
        "nfsometer_trace-4",
        "v4.0",
        "",
        "1012",
        Some("real\t0m1.000s\ngarbage\n"),
    )?;
    // not a trace directory
    fs::create_dir(p.join("graphs"))?;
    fs::write(p.join("nfsometer-notes.txt"), "first run\nsecond line\n")?;
    Ok(results)
}

#[test]
fn t_load_with_corrupt_trace() -> Result<()> {
    let results = results_tree()?;
    let collection = TraceCollection::load(results.path())?;

    let warnings = collection.warnings();
    assert_eq!(warnings.len(), 1);
    let (dir, msgs) = warnings[0];
    assert_eq!(dir, "nfsometer_trace-4/");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].starts_with("time parser"), "{}", msgs[0]);
    assert!(msgs[0].contains("[dir]/test.time"), "{}", msgs[0]);

    assert_eq!(collection.len(), 2);
    let selection = collection.selection().expect("traces were loaded");
    let mountopts: Vec<&str> = selection
        .values(Dimension::Mountopt)
        .iter()
        .map(|v| v.as_str())
        .collect();
    assert_eq!(mountopts, ["v3", "v4.0"]);
    assert!(collection.has_traces(selection));

    assert_eq!(
        collection.get_attr(selection, "starttime"),
        [InfoValue::Number(noisy_float::types::r64(1000.))]
    );
    assert_eq!(
        collection.notes_get()?,
        ["first run".to_string(), "second line".to_string()]
    );

    let contents = collection.show_contents(None);
    assert!(contents.contains(&" workloads: dd_100m_1k".to_string()));
    assert!(contents.contains(&"   2 runs of v3".to_string()));
    // the run with the broken test.time has no values
    assert!(contents.contains(&"   1 runs of v4.0".to_string()));
    Ok(())
}

#[test]
fn t_gather_and_compare() -> Result<()> {
    let results = results_tree()?;
    let collection = TraceCollection::load(results.path())?;
    let selection = collection.selection().expect("traces were loaded");

    let real = StatKey::new("times", "Real Time");
    let missing = StatKey::new("nfsstats", "read");
    let data = collection.gather_data(
        &[real.clone(), missing.clone()],
        selection,
        &DEFAULT_GATHER_ORDER,
    );
    assert_eq!(data.groups.len(), 2);
    assert_eq!(data.groups[0].value(Dimension::Mountopt), "v3");
    let v3 = &data.values[&data.groups[0]];
    let Some(DataValue::SingleStat(stat)) = v3.get(&real) else {
        panic!("expected a stat, got {:?}", v3.get(&real));
    };
    assert_relative_eq!(stat.mean(), 11.);
    assert_relative_eq!(stat.std(), 1.);
    assert!(matches!(v3.get(&missing), Some(DataValue::NoData)));

    let cells = data.compare(&real, Dimension::Mountopt);
    assert_eq!(cells[0], ComparisonCell::Reference);
    assert_eq!(cells[1].to_string(), "+20.00% ±6.43%");

    assert!(collection
        .get_better_info(&data.groups[0], &real)
        .map_or(false, |b| b.less_is_better));
    Ok(())
}

#[test]
fn t_gather_buckets() -> Result<()> {
    let results = results_tree()?;
    let collection = TraceCollection::load(results.path())?;
    let selection = collection.selection().expect("traces were loaded");

    let buckets =
        collection.gather_all_buckets(selection, BucketDefId::WallTimes, &DEFAULT_GATHER_ORDER)?;
    let name = "Wall Times Time";
    let names: Vec<&str> = buckets.bucket_names().iter().map(|n| n.as_str()).collect();
    assert_eq!(names, [name, BUCKET_OTHER]);

    let v3 = &buckets.values[&buckets.groups[0]];
    let Some(DataValue::AggregateBucket(bucket)) = v3.get(name) else {
        panic!("expected a bucket, got {:?}", v3.get(name));
    };
    // per run sums of real and sync time: 11 and 13
    assert_relative_eq!(bucket.mean(), 12.);
    assert_relative_eq!(bucket.std(), 1.);
    assert_eq!(bucket.display_name(), "Wall Times Time [s]");
    assert!(matches!(v3.get(BUCKET_OTHER), Some(DataValue::NoData)));

    let ranks = &buckets.hatch_maps[name];
    assert_eq!(ranks.get("times:Real Time"), Some(&0));
    assert_eq!(ranks.get("times:Sync Time"), Some(&1));
    assert_eq!(bucket.members()[0].stat.name(), "times:Real Time");
    assert_eq!(bucket.members()[0].hatch_index, Some(0));
    assert_eq!(bucket.members()[1].hatch_index, Some(1));

    let (descriptions, _) = collection.bucket_legend_info(BucketDefId::WallTimes);
    assert_eq!(
        descriptions.get(name).map(String::as_str),
        Some("Average wall-clock time of workload")
    );
    Ok(())
}

#[test]
fn t_unknown_version_is_fatal() -> Result<()> {
    let results = results_tree()?;
    let dir = results.path().join("nfsometer_trace-5");
    fs::create_dir(&dir)?;
    fs::write(dir.join("arguments"), "tracedir_version = 11\n")?;
    let Err(e) = TraceCollection::load(results.path()) else {
        panic!("loading must fail");
    };
    assert!(is_contract_violation(&e), "{e:#}");
    Ok(())
}

#[test]
fn t_empty_results_dir() -> Result<()> {
    let results = tempfile::tempdir()?;
    let collection = TraceCollection::load(results.path())?;
    assert!(collection.is_empty());
    assert!(collection.selection().is_none());
    assert!(collection.warnings().is_empty());
    assert!(collection.notes_get()?.is_empty());
    assert!(collection.show_contents(None).is_empty());
    Ok(())
}

fn run_ids_of(trace: &TraceStats) -> Vec<&str> {
    trace.run_ids().iter().map(|r| r.as_str()).collect()
}

fn mountopts_of(collection: &TraceCollection) -> Vec<String> {
    collection
        .selection()
        .map(|sel| {
            sel.values(Dimension::Mountopt)
                .iter()
                .map(|v| v.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn t_unfinished_trace_leaves_index_unchanged() -> Result<()> {
    let results = tempfile::tempdir()?;
    let p = results.path();
    write_trace(p, "nfsometer_trace-1", "v3", "10.000", "1011", None)?;
    write_trace(p, "nfsometer_trace-2", "v4.0", "12.000", "ongoing", None)?;
    write_trace(p, "nfsometer_trace-3", "v3", "14.000", "ongoing", None)?;
    let arguments = p.join("nfsometer_trace-3").join("arguments");
    let contents = fs::read_to_string(&arguments)?;
    fs::write(&arguments, contents.replace("starttime = 1000", "starttime = 5555"))?;

    let collection = TraceCollection::load(p)?;

    let warnings = collection.warnings();
    let dirs: Vec<&str> = warnings.iter().map(|(dir, _)| *dir).collect();
    assert_eq!(dirs, ["nfsometer_trace-2/", "nfsometer_trace-3/"]);
    for (_, msgs) in &warnings {
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("stoptime"), "{}", msgs[0]);
    }

    assert_eq!(collection.len(), 1);
    assert_eq!(mountopts_of(&collection), ["v3"]);
    let selection = collection.selection().expect("traces were loaded");
    assert_eq!(
        collection.get_attr(selection, "starttime"),
        [InfoValue::Number(noisy_float::types::r64(1000.))]
    );
    let trace = collection.get_trace(selection).expect("singular selection");
    assert_eq!(run_ids_of(trace), ["nfsometer_trace-1"]);
    assert_eq!(trace.num_runs(), 1);

    let contents = collection.show_contents(None);
    assert!(contents.contains(&"   1 runs of v3".to_string()));
    assert!(!contents.iter().any(|line| line.contains("v4.0")));
    Ok(())
}

/// Reads a single count from the `nfsstats` file of a trace.
struct CountParser {
    /// Succeed without any values for this run
    skip_run: Option<&'static str>,
}

impl StatParser for CountParser {
    fn parse(&self, tracedir: &Path, _attrs: &TraceAttrs, sink: &mut StatSink) -> Result<()> {
        if self.skip_run == Some(sink.run_id()) {
            return Ok(());
        }
        let path = tracedir.join("nfsstats");
        let contents = fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
        let Ok(count) = contents.trim().parse::<f64>() else {
            bail!("bad nfsstats: {contents:?}")
        };
        sink.bin("nfsstats", "output of nfsstat(8)", "nfsstats").add(
            "read",
            count,
            "Count",
            "NFS READ operations",
            Betterness::LESS_IF_IO_BOUND,
            [BucketAssignment::new(BucketDefId::Nfsstat, "Read Count")],
        )
    }
}

fn count_tree(counts: &[&str]) -> Result<tempfile::TempDir> {
    let results = tempfile::tempdir()?;
    for (i, count) in counts.iter().enumerate() {
        let name = format!("nfsometer_trace-{}", i + 1);
        write_trace(results.path(), &name, "v3", "10.000", "1011", None)?;
        fs::write(results.path().join(&name).join("nfsstats"), count)?;
    }
    Ok(results)
}

fn count_loader(skip_run: Option<&'static str>) -> Loader {
    Loader::default().with_parsers(
        ParserSet::default().with_parser(ParserSlot::Nfsstats, Box::new(CountParser { skip_run })),
    )
}

#[test]
fn t_parser_failure_explains_missing_runs() -> Result<()> {
    let results = count_tree(&["42\n", "bad\n"])?;
    let collection = count_loader(None).load(results.path())?;

    let warnings = collection.warnings();
    assert_eq!(warnings.len(), 1);
    let (dir, msgs) = warnings[0];
    assert_eq!(dir, "nfsometer_trace-2/");
    assert_eq!(msgs.len(), 2);
    assert!(msgs[0].starts_with("nfsstats parser: bad nfsstats"), "{}", msgs[0]);
    assert!(
        msgs[1].contains("statbin \"times\" has 2 runs, but \"nfsstats\" has 1"),
        "{}",
        msgs[1]
    );

    // both runs stay in the trace; only the parsed values are missing
    let selection = collection.selection().expect("traces were loaded");
    let trace = collection.get_trace(selection).expect("singular selection");
    assert_eq!(run_ids_of(trace), ["nfsometer_trace-1", "nfsometer_trace-2"]);
    let read = trace
        .get_stat(&StatKey::new("nfsstats", "read"))
        .expect("parsed from the first run");
    assert_eq!(read.num_runs(), 1);
    assert_relative_eq!(read.mean(), 42.);
    Ok(())
}

#[test]
fn t_run_count_mismatch_is_fatal() -> Result<()> {
    let results = count_tree(&["42\n", "43\n"])?;
    let Err(e) = count_loader(Some("nfsometer_trace-2")).load(results.path()) else {
        panic!("loading must fail");
    };
    assert!(is_contract_violation(&e), "{e:#}");
    Ok(())
}

#[test]
fn t_dmesg_anomaly() -> Result<()> {
    let results = tempfile::tempdir()?;
    let p = results.path();
    write_trace(p, "nfsometer_trace-1", "v3", "10.000", "1011", None)?;
    write_trace(p, "nfsometer_trace-2", "v3", "12.000", "1013", None)?;
    fs::write(
        p.join("nfsometer_trace-1").join("dmesg.diff"),
        "3a4,5\n> NFS: server server.example.com not responding\n> e1000e: eth0 link up\n",
    )?;

    let collection = TraceCollection::load(p)?;
    let warnings = collection.warnings();
    assert_eq!(warnings.len(), 1);
    let (dir, msgs) = warnings[0];
    assert_eq!(dir, "nfsometer_trace-1/");
    assert_eq!(
        msgs,
        ["dmesg.start and dmesg.stop are different:\n\
          NFS: server server.example.com not responding"]
    );
    // the trace itself is fine
    let selection = collection.selection().expect("traces were loaded");
    let trace = collection.get_trace(selection).expect("singular selection");
    assert_eq!(trace.num_runs(), 2);

    let collection = Loader::default().with_check_dmesg(false).load(p)?;
    assert!(collection.warnings().is_empty());
    Ok(())
}

#[test]
fn t_migrate_with_catalog() -> Result<()> {
    let results = tempfile::tempdir()?;
    let dir = results.path().join("nfsometer_trace-1");
    fs::create_dir(&dir)?;
    fs::write(
        dir.join("arguments"),
        "tracedir_version = 5\n\
         workload = dd_100m_1k\n\
         kernel = 3.6.0\n\
         mountopts = v3\n\
         tags = \n\
         client = client.example.com\n\
         server = server.example.com\n\
         path = /export\n\
         starttime = 1000\n\
         stoptime = 1011\n",
    )?;
    fs::write(dir.join("test.time"), "real\t0m10.000s\nuser\t0m0.100s\nsys\t0m1.000s\n")?;
    fs::write(dir.join("dmesg.start"), "boot\n")?;
    fs::write(
        dir.join("dmesg.stop"),
        "boot\nNFS: nfs4_reclaim_open_state: Lock reclaim failed!\n",
    )?;

    let mut catalog = TableCatalog::default();
    catalog.insert("dd_100m_1k", "dd 100MB (1k blocks)", "dd if=/dev/zero");
    let collection = Loader::default()
        .with_catalog(Box::new(catalog))
        .load(results.path())?;

    let selection = collection.selection().expect("traces were loaded");
    assert_eq!(
        collection.get_attr(selection, "workload_description"),
        [InfoValue::Text("dd 100MB (1k blocks)".into())]
    );
    // the diff written by the migration is checked like any other
    assert!(dir.join("dmesg.diff").exists());
    let warnings = collection.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0].1[0].ends_with("NFS: nfs4_reclaim_open_state: Lock reclaim failed!"),
        "{:?}",
        warnings[0].1
    );
    Ok(())
}
