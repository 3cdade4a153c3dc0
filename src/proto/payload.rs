//! 各类消息的data结构
//!
//! 字段名与Locust master期望的一致

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::drone::DroneState;
use crate::stats::{EntrySnapshot, StatsError, StatsSnapshot};

/// `spawn` 消息：master下发的各用户类目标数量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnData {
    /// master生成该指令时的时间戳，用于丢弃过期指令
    #[serde(default)]
    pub timestamp: Option<f64>,
    pub user_classes_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub host: Option<String>,
}

/// `heartbeat` 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub state: DroneState,
    pub current_cpu_usage: f64,
    pub current_memory_usage: u64,
}

/// 当前运行中的用户数量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub user_classes_count: BTreeMap<String, usize>,
    pub user_count: usize,
}

/// `stats` 消息：指标快照与用户数量合并
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub stats: Vec<EntrySnapshot>,
    pub stats_total: EntrySnapshot,
    pub errors: BTreeMap<String, StatsError>,
    pub user_classes_count: BTreeMap<String, usize>,
    pub user_count: usize,
}

impl StatsReport {
    pub fn new(stats: StatsSnapshot, population: PopulationSnapshot) -> Self {
        Self {
            stats: stats.stats,
            stats_total: stats.stats_total,
            errors: stats.errors,
            user_classes_count: population.user_classes_count,
            user_count: population.user_count,
        }
    }
}

/// `exception` 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    pub msg: String,
    pub traceback: String,
}
