//! Whether smaller or larger values of a statistic are preferable.
//! For some statistics that depends on whether the workload is I/O
//! bound (runs until done) or time bound (runs for a fixed time).

use std::fmt::Display;

/// What limits a workload's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBound {
    Io,
    Time,
}

impl TestBound {
    /// Filebench workloads run for a set amount of time, all others
    /// run until their I/O is done.
    pub fn of_workload(workload: &str) -> Self {
        if workload.starts_with("filebench_") {
            TestBound::Time
        } else {
            TestBound::Io
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum BetterKind {
    #[default]
    Unknown,
    AlwaysLess,
    AlwaysMore,
    /// But more if time bound
    LessIfIoBound,
    /// But less if time bound
    MoreIfIoBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Betterness {
    pub kind: BetterKind,
    /// The statistic is not expected to vary unless the workload is
    /// time bound
    pub no_variance: bool,
}

impl Betterness {
    pub const UNKNOWN: Betterness = Betterness::new(BetterKind::Unknown);
    pub const ALWAYS_LESS: Betterness = Betterness::new(BetterKind::AlwaysLess);
    pub const ALWAYS_MORE: Betterness = Betterness::new(BetterKind::AlwaysMore);
    pub const LESS_IF_IO_BOUND: Betterness = Betterness::new(BetterKind::LessIfIoBound);
    pub const MORE_IF_IO_BOUND: Betterness = Betterness::new(BetterKind::MoreIfIoBound);

    pub const fn new(kind: BetterKind) -> Self {
        Self {
            kind,
            no_variance: false,
        }
    }

    pub const fn with_no_variance(self) -> Self {
        Self {
            kind: self.kind,
            no_variance: true,
        }
    }

    /// `None` if it's unknown which direction is better.
    pub fn better_info(self, bound: TestBound) -> Option<BetterInfo> {
        let less_is_better = match (self.kind, bound) {
            (BetterKind::Unknown, _) => return None,
            (BetterKind::AlwaysLess, _) => true,
            (BetterKind::AlwaysMore, _) => false,
            (BetterKind::LessIfIoBound, TestBound::Io) => true,
            (BetterKind::LessIfIoBound, TestBound::Time) => false,
            (BetterKind::MoreIfIoBound, TestBound::Io) => false,
            (BetterKind::MoreIfIoBound, TestBound::Time) => true,
        };
        Some(BetterInfo {
            less_is_better,
            no_variance: self.no_variance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetterInfo {
    pub less_is_better: bool,
    pub no_variance: bool,
}

impl BetterInfo {
    pub fn arrow(&self) -> char {
        if self.less_is_better {
            '↓'
        } else {
            '↑'
        }
    }
}

impl Display for BetterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = if self.less_is_better {
            "less is better"
        } else {
            "more is better"
        };
        f.write_str(s)?;
        if self.no_variance {
            f.write_str(" unless workload is time bound")?;
        }
        Ok(())
    }
}
