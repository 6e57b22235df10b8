//! Ceph daemon versions
//!
//! The running version is recorded next to every key generation so that an
//! operator can tell which release issued a credential.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::types::decode;
use super::{args, ClusterInfo, CommandExecutor};
use crate::Error;

/// A parsed `ceph version` string
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CephVersion {
    /// Major release (e.g. 20 for tentacle)
    pub major: u32,
    /// Minor release
    pub minor: u32,
    /// Patch release
    pub patch: u32,
    /// Downstream build number, 0 for upstream releases
    pub build: u32,
}

impl fmt::Display for CephVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

impl FromStr for CephVersion {
    type Err = String;

    /// Parse either `ceph version 20.2.0 (sha) tentacle (stable)` or a bare
    /// `20.2.0-12`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let token = s
            .strip_prefix("ceph version ")
            .unwrap_or(s)
            .split_whitespace()
            .next()
            .ok_or_else(|| format!("empty version string {s:?}"))?;

        let (release, build) = match token.split_once('-') {
            Some((release, rest)) => {
                // Dev builds look like 16.2.9-123-gabcdef; only the count matters
                let build = rest.split('-').next().unwrap_or_default();
                let build = build
                    .parse::<u32>()
                    .map_err(|_| format!("invalid build number in {token:?}"))?;
                (release, build)
            }
            None => (token, 0),
        };

        let parts: Vec<u32> = release
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| format!("invalid release in {token:?}"))?;

        match parts.as_slice() {
            [major, minor, patch] => Ok(Self {
                major: *major,
                minor: *minor,
                patch: *patch,
                build,
            }),
            _ => Err(format!("expected major.minor.patch in {token:?}")),
        }
    }
}

/// Output of `versions`: daemon class to version string to daemon count
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonVersions {
    mon: BTreeMap<String, u32>,
    mgr: BTreeMap<String, u32>,
    osd: BTreeMap<String, u32>,
    mds: BTreeMap<String, u32>,
    overall: BTreeMap<String, u32>,
}

impl DaemonVersions {
    /// Highest mon version, falling back to the overall view
    fn running(&self) -> Option<CephVersion> {
        let highest = |entries: &BTreeMap<String, u32>| {
            entries
                .keys()
                .filter_map(|v| v.parse::<CephVersion>().ok())
                .max()
        };
        highest(&self.mon)
            .or_else(|| highest(&self.overall))
            .or_else(|| highest(&self.mgr))
            .or_else(|| highest(&self.osd))
            .or_else(|| highest(&self.mds))
    }
}

/// Parse `versions` output into the running cluster version
pub fn parse_running_version(output: &str) -> Result<CephVersion, Error> {
    let versions: DaemonVersions = decode("versions", output)?;
    versions
        .running()
        .ok_or_else(|| Error::decode("versions", "no parsable daemon version"))
}

/// Query the version the cluster's monitors are running
pub async fn running_version<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
) -> Result<CephVersion, Error> {
    let output = executor.execute(cluster, &args(&["versions"])).await?;
    parse_running_version(&output)
}
