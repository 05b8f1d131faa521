//! NFS mount option strings: extracting the protocol version,
//! normalizing, and converting to the legacy `vers=` syntax.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::selector::{Dimension, Selector};

/// The valid NFS versions in normalized form.
pub const NFS_VERSIONS: [&str; 4] = ["v2", "v3", "v4.0", "v4.1"];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MountoptsError {
    #[error("no version found in mount option {0:?}")]
    NoVersion(String),
    #[error("version given more than once in mount option {0:?}")]
    DuplicateVersion(String),
}

lazy_static! {
    static ref VERS_NEW: Regex = Regex::new(r"^v(\d+)(\.\d+)?$").expect("valid regex");
    static ref VERS_OLD_MAJOR: Regex = Regex::new(r"^vers=(\d+)$").expect("valid regex");
    static ref VERS_OLD_MINOR: Regex = Regex::new(r"^minorversion=(\d+)$").expect("valid regex");
}

/// Returns the normalized version (e.g. `v4.1`) and the options
/// that are not about the version, in their original order.
fn split_version(mountopt: &str) -> Result<(String, Vec<&str>), MountoptsError> {
    let dup = || MountoptsError::DuplicateVersion(mountopt.into());
    let mut major: Option<&str> = None;
    let mut minor: Option<&str> = None;
    let mut other = Vec::new();

    for opt in mountopt.split(',') {
        if let Some(c) = VERS_NEW.captures(opt) {
            if major.is_some() || minor.is_some() {
                return Err(dup());
            }
            major = c.get(1).map(|m| m.as_str());
            minor = c.get(2).map(|m| &m.as_str()[1..]);
        } else if let Some(c) = VERS_OLD_MAJOR.captures(opt) {
            if major.is_some() {
                return Err(dup());
            }
            major = c.get(1).map(|m| m.as_str());
        } else if let Some(c) = VERS_OLD_MINOR.captures(opt) {
            if minor.is_some() {
                return Err(dup());
            }
            minor = c.get(1).map(|m| m.as_str());
        } else {
            other.push(opt);
        }
    }

    let major = major.ok_or_else(|| MountoptsError::NoVersion(mountopt.into()))?;
    // v4 without a minor version means v4.0
    let minor = match minor {
        None if major.parse::<u32>().map_or(false, |n| n >= 4) => Some("0"),
        m => m,
    };
    let version = match minor {
        Some(minor) => format!("v{major}.{minor}"),
        None => format!("v{major}"),
    };
    Ok((version, other))
}

/// The normalized NFS version given in `mountopt`, e.g. `v3` or
/// `v4.1`.
pub fn version(mountopt: &str) -> Result<String, MountoptsError> {
    Ok(split_version(mountopt)?.0)
}

/// The version first, then the other options sorted.
pub fn normalize(mountopt: &str) -> Result<String, MountoptsError> {
    let (version, mut other) = split_version(mountopt)?;
    other.sort();
    Ok(join_version(version, &other))
}

/// Convert to the `vers=N[,minorversion=M]` syntax older clients
/// need.
pub fn old_syntax(mountopt: &str) -> Result<String, MountoptsError> {
    let (version, other) = split_version(mountopt)?;
    let version = match version.as_str() {
        "v2" => "vers=2".into(),
        "v3" => "vers=3".into(),
        "v4.0" => "vers=4".into(),
        "v4.1" => "vers=4,minorversion=1".into(),
        _ => version,
    };
    Ok(join_version(version, &other))
}

fn join_version(version: String, other: &[&str]) -> String {
    if other.is_empty() {
        version
    } else {
        format!("{version},{}", other.join(","))
    }
}

/// Group singular selectors by the NFS version of their mount
/// option.
pub fn groups_by_nfsvers<'s>(
    groups: impl IntoIterator<Item = &'s Selector>,
) -> Result<BTreeMap<String, Vec<&'s Selector>>, MountoptsError> {
    let mut map: BTreeMap<String, Vec<&'s Selector>> = BTreeMap::new();
    for group in groups {
        let vers = version(group.value(Dimension::Mountopt))?;
        map.entry(vers).or_default().push(group);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn t_version() -> Result<()> {
        assert_eq!(version("v3")?, "v3");
        assert_eq!(version("hard,v4")?, "v4.0");
        assert_eq!(version("v4.1,sec=sys")?, "v4.1");
        assert_eq!(version("vers=4,minorversion=1")?, "v4.1");
        assert_eq!(version("vers=3,tcp")?, "v3");
        assert_eq!(
            version("hard,tcp"),
            Err(MountoptsError::NoVersion("hard,tcp".into()))
        );
        assert!(matches!(
            version("v3,vers=4"),
            Err(MountoptsError::DuplicateVersion(_))
        ));
        Ok(())
    }

    #[test]
    fn t_normalize_and_old_syntax() -> Result<()> {
        assert_eq!(normalize("sec=krb5,hard,vers=4")?, "v4.0,hard,sec=krb5");
        assert_eq!(normalize("v3")?, "v3");
        assert_eq!(old_syntax("v4.1,hard")?, "vers=4,minorversion=1,hard");
        assert_eq!(old_syntax("v3")?, "vers=3");
        for v in NFS_VERSIONS {
            assert_eq!(version(&old_syntax(v)?)?, v);
        }
        Ok(())
    }

    #[test]
    fn t_groups_by_nfsvers() -> Result<()> {
        let sels = [
            Selector::new("w", "k", "v3", "", "", "c", "s", "/p")?,
            Selector::new("w", "k", "v4.1", "", "", "c", "s", "/p")?,
            Selector::new("w", "k", "v3,hard", "", "", "c", "s", "/p")?,
        ];
        let map = groups_by_nfsvers(&sels)?;
        assert_eq!(map.len(), 2);
        assert_eq!(map["v3"].len(), 2);
        assert_eq!(map["v4.1"].len(), 1);
        Ok(())
    }
}
