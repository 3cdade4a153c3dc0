//! 指标注册表
//!
//! 用户(User)实例在各自的线程中并发记录请求与错误，drone线程定期 `collect()`。
//! 所有条目共用一把互斥锁：一次记录同时更新汇总条目、具名条目和错误目录，
//! 采集与清零在同一临界区内完成，不会丢失或重复计数。

mod entry;
mod error;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use entry::{round_response_time, EntrySnapshot, StatsEntry};
pub use error::StatsError;

/// 汇总行名称
pub const TOTAL_NAME: &str = "Aggregated";

/// 默认的method列
pub const DEFAULT_METHOD: &str = "drone";

/// 一次采集的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub stats: Vec<EntrySnapshot>,
    pub stats_total: EntrySnapshot,
    pub errors: BTreeMap<String, StatsError>,
}

struct StatsInner {
    method: String,
    entries: BTreeMap<String, StatsEntry>,
    total: StatsEntry,
    errors: BTreeMap<String, StatsError>,
}

impl StatsInner {
    fn entry(&mut self, name: &str) -> &mut StatsEntry {
        let method = &self.method;
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| StatsEntry::new(name, method.as_str()))
    }
}

/// 可在线程间共享的指标句柄，克隆后指向同一份数据
#[derive(Clone)]
pub struct Stats {
    inner: Arc<Mutex<StatsInner>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::with_method(DEFAULT_METHOD)
    }

    /// 指定Locust统计表中method列的值
    pub fn with_method(method: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            inner: Arc::new(Mutex::new(StatsInner {
                total: StatsEntry::new(TOTAL_NAME, ""),
                entries: BTreeMap::new(),
                errors: BTreeMap::new(),
                method,
            })),
        }
    }

    /// 记录一次成功请求(响应时间单位为毫秒)
    pub fn log_request(&self, name: &str, response_time: Option<u64>, content_length: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.total.log_request(response_time, content_length);
        inner.entry(name).log_request(response_time, content_length);
    }

    /// 以 [`Duration`] 记录响应时间
    pub fn log_request_timed(&self, name: &str, elapsed: Duration, content_length: Option<u64>) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.log_request(name, Some(millis), content_length);
    }

    /// 记录一次失败，错误按 `name.error` 归类累计
    pub fn log_error(&self, name: &str, error: impl fmt::Display) {
        let error = error.to_string();
        let key = StatsError::key(name, &error);

        let mut inner = self.inner.lock();
        inner.total.log_error();
        inner.entry(name).log_error();

        let method = inner.method.clone();
        inner
            .errors
            .entry(key)
            .or_insert_with(|| StatsError::new(name, method, error))
            .occurred();
    }

    /// 采集所有条目并清零；错误目录只读取不清零
    pub fn collect(&self) -> StatsSnapshot {
        let mut inner = self.inner.lock();
        StatsSnapshot {
            stats: inner.entries.values_mut().map(StatsEntry::collect).collect(),
            stats_total: inner.total.collect(),
            errors: inner.errors.clone(),
        }
    }

    pub fn error_occurrences(&self, name: &str, error: &str) -> u64 {
        self.inner
            .lock()
            .errors
            .get(&StatsError::key(name, error))
            .map_or(0, |e| e.occurrences)
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// 当前(未清零的)条目快照，不影响计数
    pub fn peek(&self, name: &str) -> Option<EntrySnapshot> {
        self.inner.lock().entries.get(name).map(StatsEntry::snapshot)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Stats")
            .field("method", &inner.method)
            .field("entries", &inner.entries.len())
            .field("errors", &inner.errors.len())
            .finish()
    }
}
