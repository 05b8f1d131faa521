//! Generic config file loader

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBackend {
    Json5,
    Yaml,
    Ron,
}

impl ConfigBackend {
    pub fn load_config_file<T: DeserializeOwned>(self, path: &Path) -> Result<T> {
        let s = std::fs::read_to_string(path)
            .with_context(|| anyhow!("loading config file from {path:?}"))?;
        self.parse_str(&s)
            .with_context(|| anyhow!("config file {path:?}"))
    }

    pub fn parse_str<T: DeserializeOwned>(self, s: &str) -> Result<T> {
        match self {
            ConfigBackend::Json5 => {
                serde_json5::from_str(s).with_context(|| anyhow!("decoding JSON5"))
            }
            ConfigBackend::Yaml => serde_yml::from_str(s).with_context(|| anyhow!("decoding YAML")),
            ConfigBackend::Ron => ron::from_str(s).with_context(|| anyhow!("decoding RON")),
        }
    }

    pub fn save_config_file<T: Serialize>(self, path: &Path, value: &T) -> Result<()> {
        let s = match self {
            // JSON is valid JSON5
            ConfigBackend::Json5 => serde_json::to_string_pretty(value)
                .with_context(|| anyhow!("encoding config as JSON"))?,
            ConfigBackend::Yaml => {
                serde_yml::to_string(value).with_context(|| anyhow!("encoding config as YAML"))?
            }
            ConfigBackend::Ron => {
                ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
                    .with_context(|| anyhow!("encoding config as RON"))?
            }
        };
        std::fs::write(path, s).with_context(|| anyhow!("writing config file to {path:?}"))
    }
}

pub const FILE_EXTENSIONS: &[(&str, ConfigBackend)] = &[
    ("json5", ConfigBackend::Json5),
    ("json", ConfigBackend::Json5),
    ("yml", ConfigBackend::Yaml),
    ("yaml", ConfigBackend::Yaml),
    ("ron", ConfigBackend::Ron),
];

/// E.g. for showing in help texts.
pub fn supported_formats() -> Vec<String> {
    FILE_EXTENSIONS
        .iter()
        .map(|(ext, backend)| format!(".{ext}: {backend:?}"))
        .collect()
}

pub fn backend_from_path(path: &Path) -> Result<ConfigBackend> {
    let Some(ext) = path.extension() else {
        bail!(
            "given file path does not have an extension \
             for determining the file type: {path:?}"
        )
    };
    let Some(ext) = ext.to_str() else {
        bail!("given file path does have an extension that is not unicode: {path:?}")
    };
    match FILE_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
        Some((_, backend)) => Ok(*backend),
        None => bail!("given file path does have an unknown extension {ext:?}: {path:?}"),
    }
}

pub fn save_config_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    backend_from_path(path)?.save_config_file(path, value)
}

/// `path` with `.{extension}` appended to the file name.
fn add_extension(path: &Path, extension: &str) -> Option<PathBuf> {
    let mut file_name = path.file_name()?.to_owned();
    file_name.push(".");
    file_name.push(extension);
    Some(path.with_file_name(file_name))
}

pub trait LoadConfigFile: DeserializeOwned {
    /// The extensions in `FILE_EXTENSIONS` are appended (and tried in
    /// order).
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>>;

    /// If `path` is given, the file must exist or an error is
    /// returned. Otherwise, the default location is checked and if a
    /// file with one of the fitting extensions exists, it is loaded,
    /// otherwise `or_else` is called with a message mentioning what
    /// was tried. It is an error if more than one file exists.
    fn load_config<P: AsRef<Path>>(
        path: Option<P>,
        or_else: impl FnOnce(String) -> Result<Self>,
    ) -> Result<Self> {
        if let Some(path) = path {
            let path = path.as_ref();
            return backend_from_path(path)?.load_config_file(path);
        }
        let Some(path) = Self::default_config_path_without_suffix()? else {
            return or_else(
                "no path was given and there is no default config location".into(),
            );
        };
        let mut tried = Vec::new();
        let mut found = Vec::new();
        for (extension, backend) in FILE_EXTENSIONS {
            let path = add_extension(&path, extension)
                .ok_or_else(|| anyhow!("path is missing a file name: {path:?}"))?;
            if path.exists() {
                found.push((path.clone(), *backend));
            }
            tried.push(path);
        }
        match found.as_slice() {
            [] => or_else(format!("tried the default paths: {tried:?}")),
            [(path, backend)] => backend.load_config_file(path),
            _ => {
                let paths: Vec<_> = found.iter().map(|(p, _)| p).collect();
                bail!("multiple config file paths found, leading to ambiguity: {paths:?}")
            }
        }
    }
}
