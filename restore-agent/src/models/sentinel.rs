//! Backup sentinel: the descriptor naming the engine version that produced a
//! backup and the last write the backup contains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical oplog timestamp: seconds since epoch plus an ordinal within that second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OplogTimestamp {
    #[serde(rename = "TS")]
    pub ts: u32,
    #[serde(rename = "Inc")]
    pub inc: u32,
}

impl OplogTimestamp {
    pub fn new(ts: u32, inc: u32) -> Self {
        Self { ts, inc }
    }
}

/// Renders in the admin shell's constructor syntax, e.g. `Timestamp(1700000000, 3)`.
impl fmt::Display for OplogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.ts, self.inc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Semantic version of the engine that took the backup.
    #[serde(rename = "Version")]
    pub version: String,

    /// Oplog replay boundary.
    #[serde(rename = "BackupLastTS")]
    pub backup_last_ts: OplogTimestamp,
}

/// Backup sentinel, fetched once per restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(rename = "BackupName", default, skip_serializing_if = "Option::is_none")]
    pub backup_name: Option<String>,

    #[serde(rename = "StartLocalTime", default, skip_serializing_if = "Option::is_none")]
    pub start_local_time: Option<DateTime<Utc>>,

    #[serde(rename = "FinishLocalTime", default, skip_serializing_if = "Option::is_none")]
    pub finish_local_time: Option<DateTime<Utc>>,

    #[serde(rename = "MongoMeta")]
    pub engine_meta: EngineMeta,
}

impl Backup {
    pub fn new(engine_version: impl Into<String>, backup_last_ts: OplogTimestamp) -> Self {
        Self {
            backup_name: None,
            start_local_time: None,
            finish_local_time: None,
            engine_meta: EngineMeta {
                version: engine_version.into(),
                backup_last_ts,
            },
        }
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_meta.version
    }

    pub fn backup_last_ts(&self) -> OplogTimestamp {
        self.engine_meta.backup_last_ts
    }
}
