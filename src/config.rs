//! Configuration of the command line tool and the loader.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::{
    collection::NOTES_FILE,
    config_file::LoadConfigFile,
    selector::{Dimension, DEFAULT_GATHER_ORDER},
    utillib::home::home_dir,
};

/// Direct representation of the `~/.nfsometer.*` config file
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// If not given, `~/nfsometer_results/` is used
    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// The order in which groups are enumerated by queries; must
    /// mention every dimension exactly once
    #[serde(default = "default_gather_order")]
    pub gather_order: Vec<Dimension>,

    /// Whether to warn about NFS messages in the kernel log written
    /// during a trace
    #[serde(default = "default_true")]
    pub check_dmesg: bool,

    /// Name of the notes file in the results directory
    #[serde(default = "default_notes_file")]
    pub notes_file: String,
}

fn default_gather_order() -> Vec<Dimension> {
    DEFAULT_GATHER_ORDER.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_notes_file() -> String {
    NOTES_FILE.into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            results_dir: None,
            gather_order: default_gather_order(),
            check_dmesg: true,
            notes_file: default_notes_file(),
        }
    }
}

impl EngineConfig {
    pub fn results_dir(&self) -> Result<PathBuf> {
        match &self.results_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?.join("nfsometer_results")),
        }
    }

    /// Check what serde can't.
    pub fn check(&self) -> Result<()> {
        for dim in Dimension::ALL {
            let n = self.gather_order.iter().filter(|d| **d == dim).count();
            if n != 1 {
                bail!(
                    "gather_order must contain each dimension exactly once, \
                     but contains {dim} {n} times"
                );
            }
        }
        if self.notes_file.is_empty() || self.notes_file.contains('/') {
            bail!("notes_file must be a plain file name, got {:?}", self.notes_file);
        }
        Ok(())
    }

    /// Load from `path`, or the default location, falling back to the
    /// default config if there is no file there.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let config = Self::load_config(path, |_| Ok(Self::default()))?;
        config.check()?;
        Ok(config)
    }
}

impl LoadConfigFile for EngineConfig {
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>> {
        Ok(Some(home_dir()?.join(".nfsometer")))
    }
}
