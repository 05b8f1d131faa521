use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use itertools::Itertools;

use nfsometer::{
    bucket_def::BucketDefId,
    collection::{Loader, TraceCollection},
    compare::ComparisonCell,
    config::EngineConfig,
    config_file::{self, save_config_file},
    fmt_util::fmt_value,
    info,
    query::DataValue,
    selector::{Dimension, Selector},
    stat_info::StatKey,
    utillib::{
        get_terminal_width::get_terminal_width,
        logging::{set_log_level, LogLevelOpt},
    },
};

#[derive(clap::Parser, Debug)]
#[clap(next_line_help = true)]
#[clap(set_term_width = get_terminal_width(4))]
/// Inspect and compare the traces in an nfsometer results directory
struct Opts {
    #[clap(flatten)]
    log_level: LogLevelOpt,

    /// Override the path to the config file (default: the paths
    /// `~/.nfsometer.*` where a single one exists where the `*` is
    /// the suffix for one of the supported config file formats (run
    /// `config-formats` to get the list), and if those are missing,
    /// use compiled-in default config values)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the results directory from the config
    #[clap(long, short)]
    results_dir: Option<PathBuf>,

    /// Restrict the selection, e.g. `workload=dd_100m_1k,kernel_compile`
    /// (can be given multiple times)
    #[clap(long, short)]
    select: Vec<String>,

    /// The subcommand to run. Use `--help` after the sub-command to
    /// get a list of the allowed options there.
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Show the supported config format types.
    ConfigFormats,

    /// Re-encode the config file (serialization type determined by
    /// file extension) and save at the given path.
    ConfigSave { output_path: PathBuf },

    /// Show the clients, kernels, servers, paths and workloads in the
    /// results directory, with run counts
    List,

    /// Show the problems found while loading the trace directories
    Warnings,

    /// Show the notes file of the results directory
    Notes,

    /// Show all known stat keys, with unit and description
    Keys,

    /// Compare the values of a stat between groups that differ only
    /// in `dimension`
    Compare {
        /// The stat, as `bin:name`, e.g. `times:Real Time`
        key: StatKey,

        /// E.g. `mountopt` to compare NFS versions
        dimension: Dimension,
    },

    /// Show bucket totals with their members and hatch ranks
    Buckets {
        /// E.g. `wall_times`, `nfsstat`, `mountstat_rtt`
        def: BucketDefId,

        /// Also compare the totals along this dimension
        #[clap(long)]
        compare: Option<Dimension>,
    },
}

/// Apply `--select` restrictions to `selection`.
fn narrow_selection(mut selection: Selector, selects: &[String]) -> Result<Selector> {
    for select in selects {
        let (dim, values) = select
            .split_once('=')
            .ok_or_else(|| anyhow!("--select: missing '=' in {select:?}"))?;
        let dim: Dimension = dim
            .trim()
            .parse()
            .map_err(|e| anyhow!("--select: unknown dimension {dim:?}: {e}"))?;
        let values: Vec<String> = values.split(',').map(|v| v.trim().to_string()).collect();
        for v in &values {
            if !selection.values(dim).iter().any(|have| have.as_str() == v) {
                bail!("--select: no traces with {dim} {v:?}");
            }
        }
        selection = selection.with_values(dim, values)?;
    }
    Ok(selection)
}

/// Label for `group` showing the dimensions in which `selection`
/// has more than one value.
fn group_label(group: &Selector, selection: &Selector) -> String {
    let info = group.display_info(selection, ",");
    if info.is_empty() {
        "all".into()
    } else {
        info.iter().map(|(k, v)| format!("{k}: {v}")).join(", ")
    }
}

fn fmt_data_value(value: Option<&DataValue>, unit: Option<&str>) -> String {
    match value {
        None | Some(DataValue::NoData) => "no data".into(),
        Some(DataValue::ZeroData) => "0".into(),
        Some(v) => match v.measurement() {
            Some(m) => fmt_value(m.mean(), m.std(), unit),
            None => "no data".into(),
        },
    }
}

fn fmt_cell(cell: &ComparisonCell, groups: &[Selector], selection: &Selector) -> String {
    match cell {
        ComparisonCell::Equal { reference } | ComparisonCell::Diff { reference, .. } => {
            format!("{cell} (vs {})", group_label(&groups[*reference], selection))
        }
        _ => cell.to_string(),
    }
}

fn compare(
    collection: &TraceCollection,
    selection: &Selector,
    order: &[Dimension],
    key: &StatKey,
    dimension: Dimension,
) -> Result<()> {
    let unit = collection.registry().unit(key);
    let data = collection.gather_data(std::slice::from_ref(key), selection, order);
    if data.groups.is_empty() {
        bail!("no traces for the selection");
    }
    let cells = data.compare(key, dimension);
    if let Some(description) = collection.registry().description(key) {
        println!("{key}: {description}");
    }
    for (group, cell) in data.groups.iter().zip(&cells) {
        let value = data.values.get(group).and_then(|vals| vals.get(key));
        let better = collection
            .get_better_info(group, key)
            .map(|b| b.to_string())
            .unwrap_or_default();
        println!(
            "  {}\t{}\t{}\t{better}",
            group_label(group, selection),
            fmt_data_value(value, unit),
            fmt_cell(cell, &data.groups, selection),
        );
    }
    Ok(())
}

fn buckets(
    collection: &TraceCollection,
    selection: &Selector,
    order: &[Dimension],
    def: BucketDefId,
    compare_dim: Option<Dimension>,
) -> Result<()> {
    let gathered = collection.gather_all_buckets(selection, def, order)?;
    let (descriptions, _) = collection.bucket_legend_info(def);
    for name in gathered.bucket_names() {
        let cells = compare_dim.map(|dim| gathered.compare(name, dim));
        let all_absent = gathered.groups.iter().all(|g| {
            gathered
                .values
                .get(g)
                .and_then(|vals| vals.get(name.as_str()))
                .map_or(true, |v| !matches!(v, DataValue::AggregateBucket(_)))
        });
        if all_absent {
            continue;
        }
        match descriptions.get(name.as_str()) {
            Some(description) => println!("{name}: {description}"),
            None => println!("{name}"),
        }
        let unit = collection
            .registry()
            .bucket(def, name)
            .map(|info| info.unit.as_str());
        for (i, group) in gathered.groups.iter().enumerate() {
            let value = gathered
                .values
                .get(group)
                .and_then(|vals| vals.get(name.as_str()));
            let cell = match &cells {
                Some(cells) => format!("\t{}", fmt_cell(&cells[i], &gathered.groups, selection)),
                None => String::new(),
            };
            println!(
                "  {}\t{}{cell}",
                group_label(group, selection),
                fmt_data_value(value, unit)
            );
            if let Some(DataValue::AggregateBucket(bucket)) = value {
                for member in bucket.members() {
                    println!(
                        "    [{}] {}\t{}",
                        member
                            .hatch_index
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "-".into()),
                        member.display,
                        fmt_value(member.stat.mean(), member.stat.std(), unit)
                    );
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let Opts {
        log_level,
        config,
        results_dir,
        select,
        subcommand,
    } = Opts::parse();

    set_log_level(log_level.try_into()?);

    if let SubCommand::ConfigFormats = &subcommand {
        println!(
            "These configuration file extensions / formats are supported:\n\n  {}\n",
            config_file::supported_formats().join("\n  ")
        );
        return Ok(());
    }

    let config = EngineConfig::load(config.as_ref())?;

    if let SubCommand::ConfigSave { output_path } = &subcommand {
        return save_config_file(output_path, &config);
    }

    let results_dir = match results_dir {
        Some(dir) => dir,
        None => config.results_dir()?,
    };
    info!("loading results from {results_dir:?}");
    let collection = Loader::from_config(&config)
        .load(&results_dir)
        .with_context(|| anyhow!("loading results directory {results_dir:?}"))?;

    match &subcommand {
        SubCommand::Warnings => {
            for (dir, msgs) in collection.warnings() {
                println!("{dir}");
                for msg in msgs {
                    for line in msg.lines() {
                        println!("  {line}");
                    }
                }
            }
            return Ok(());
        }
        SubCommand::Notes => {
            for line in collection.notes_get()? {
                println!("{line}");
            }
            return Ok(());
        }
        _ => (),
    }

    let Some(selection) = collection.selection() else {
        bail!("no traces found in {results_dir:?}");
    };
    let selection = narrow_selection(selection.clone(), &select)?;
    let order = &config.gather_order;

    match subcommand {
        SubCommand::ConfigFormats
        | SubCommand::ConfigSave { .. }
        | SubCommand::Warnings
        | SubCommand::Notes => {
            unreachable!("already dispatched above")
        }
        SubCommand::List => {
            for line in collection.show_contents(Some(&selection)) {
                println!("{line}");
            }
        }
        SubCommand::Keys => {
            let registry = collection.registry();
            for key in registry.keys() {
                println!(
                    "{key}\t[{}]\t{}",
                    registry.unit(key).unwrap_or(""),
                    registry.description(key).unwrap_or("")
                );
            }
        }
        SubCommand::Compare { key, dimension } => {
            compare(&collection, &selection, order, &key, dimension)?
        }
        SubCommand::Buckets { def, compare } => {
            buckets(&collection, &selection, order, def, compare)?
        }
    }

    Ok(())
}
