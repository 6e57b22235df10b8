//! Response decoders
//!
//! Typed snapshots of the JSON the cluster returns. Every struct defaults
//! missing fields so that older and newer cluster releases, which add and
//! drop keys freely, still decode.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Error;

/// MDS state for a daemon serving a rank
pub const MDS_STATE_ACTIVE: &str = "up:active";
/// MDS state for a daemon shadowing an active rank's journal
pub const MDS_STATE_STANDBY_REPLAY: &str = "up:standby-replay";
/// MDS state for an idle standby daemon
pub const MDS_STATE_STANDBY: &str = "up:standby";

/// Decode a command's JSON output into `T`
pub fn decode<T: DeserializeOwned>(command: &str, output: &str) -> Result<T, Error> {
    serde_json::from_str(output).map_err(|e| Error::decode(command, e.to_string()))
}

/// Entry of `fs ls`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilesystemSummary {
    /// Filesystem name
    pub name: String,
    /// Metadata pool name
    pub metadata_pool: String,
    /// Metadata pool id
    pub metadata_pool_id: i64,
    /// Data pool names
    pub data_pools: Vec<String>,
    /// Data pool ids
    pub data_pool_ids: Vec<i64>,
}

/// Output of `fs get <name>`, also an entry of `fs dump`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilesystemDetails {
    /// Filesystem id
    pub id: i64,
    /// MDS map of the filesystem
    pub mdsmap: MdsMap,
}

/// MDS map of a single filesystem
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MdsMap {
    /// Filesystem name
    pub fs_name: String,
    /// Whether the filesystem accepts clients
    pub enabled: bool,
    /// Rank holding the root inode
    pub root: i64,
    /// Rank acting as table server
    #[serde(rename = "tableserver")]
    pub table_server: i64,
    /// Number of active ranks
    pub max_mds: u32,
    /// Metadata pool id
    pub metadata_pool: i64,
    /// Data pool ids, in the order they were added
    pub data_pools: Vec<i64>,
    /// Ranks that are in the cluster
    #[serde(rename = "in")]
    pub in_ranks: Vec<i64>,
    /// Failed ranks
    pub failed: Vec<i64>,
    /// Damaged ranks
    pub damaged: Vec<i64>,
    /// Stopped ranks
    pub stopped: Vec<i64>,
    /// `mds_<rank>` to daemon gid
    pub up: BTreeMap<String, u64>,
    /// `gid_<gid>` to daemon info
    pub info: BTreeMap<String, MdsInfo>,
}

impl MdsMap {
    /// Gid of the daemon filling `rank`, from the "up" map
    pub fn gid_for_rank(&self, rank: i64) -> Option<u64> {
        self.up.get(&format!("mds_{rank}")).copied()
    }

    /// Info of the daemon with `gid`
    pub fn info_for_gid(&self, gid: u64) -> Option<&MdsInfo> {
        self.info.get(&format!("gid_{gid}"))
    }

    /// Name of the daemon filling `rank`.
    ///
    /// Fails when the rank has no "up" entry, or when its gid has no info
    /// entry (an inconsistent snapshot).
    pub fn daemon_name_for_rank(&self, rank: i64) -> Result<&str, Error> {
        let gid = self.gid_for_rank(rank).ok_or_else(|| {
            Error::cluster_state("mds rank", format!("failed to get mds gid from rank {rank}"))
        })?;
        let info = self.info_for_gid(gid).ok_or_else(|| {
            Error::cluster_state(
                "mds rank",
                format!("failed to get mds info for rank {rank} (gid {gid})"),
            )
        })?;
        Ok(&info.name)
    }

    /// Daemons currently in standby-replay
    pub fn standby_replay_daemons(&self) -> impl Iterator<Item = &MdsInfo> {
        self.info
            .values()
            .filter(|info| info.state == MDS_STATE_STANDBY_REPLAY)
    }
}

/// Per-daemon entry of an MDS map
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MdsInfo {
    /// Daemon instance id
    pub gid: u64,
    /// Daemon name
    pub name: String,
    /// Rank the daemon serves or shadows
    pub rank: i64,
    /// Lifecycle state (e.g. `up:active`)
    pub state: String,
    /// Network address
    pub addr: String,
}

/// Standby daemon not attached to any filesystem rank
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MdsStandby {
    /// Daemon instance id
    pub gid: u64,
    /// Daemon name
    pub name: String,
    /// -1 for a pure standby
    pub rank: i64,
}

/// Output of `fs dump`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MdsDump {
    /// Daemons not holding any rank
    pub standbys: Vec<MdsStandby>,
    /// Every filesystem in the cluster
    pub filesystems: Vec<FilesystemDetails>,
}

/// Entry of `osd lspools`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PoolSummary {
    /// Pool name
    #[serde(rename = "poolname", alias = "pool_name")]
    pub name: String,
    /// Pool id
    #[serde(rename = "poolnum", alias = "pool_num")]
    pub number: i64,
}

/// Entry of `fs subvolumegroup ls`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubvolumeGroup {
    /// Group name
    pub name: String,
}

/// Entry of `fs subvolume ls`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Subvolume {
    /// Subvolume name
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct AuthKey {
    key: String,
}

/// Key material as returned by the auth commands.
///
/// `auth rotate` returns a single-element list on some releases and a bare
/// object on others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeyResponse {
    Single(AuthKey),
    List(Vec<AuthKey>),
}

/// Decode key material, accepting both shapes
pub fn decode_key(command: &str, output: &str) -> Result<String, Error> {
    let key = match decode::<KeyResponse>(command, output)? {
        KeyResponse::Single(auth) => auth.key,
        KeyResponse::List(mut keys) => {
            if keys.len() != 1 {
                return Err(Error::decode(
                    command,
                    format!("expected exactly one key, got {}", keys.len()),
                ));
            }
            keys.remove(0).key
        }
    };

    if key.is_empty() {
        return Err(Error::decode(command, "empty key"));
    }
    Ok(key)
}
