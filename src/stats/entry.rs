//! 单个指标条目
//!
//! 对应Locust统计页中的一行：请求数、失败数、响应时间分布、每秒计数。
//! 每次 `collect()` 都会返回快照并清零。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 当前unix时间(毫秒)
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 将响应时间按2位有效数字取整，限制直方图的键数量
///
/// 147 -> 150, 3432 -> 3400, 58760 -> 59000；小于100的值保持不变
pub fn round_response_time(response_time: u64) -> u64 {
    if response_time < 100 {
        return response_time;
    }
    let digits = response_time.ilog10() + 1;
    let factor = 10u64.pow(digits - 2);
    response_time.saturating_add(factor / 2) / factor * factor
}

#[derive(Debug, Clone)]
pub struct StatsEntry {
    name: String,
    method: String,
    num_requests: u64,
    num_none_requests: u64,
    num_failures: u64,
    total_response_time: u64,
    min_response_time: Option<u64>,
    max_response_time: u64,
    num_reqs_per_sec: BTreeMap<i64, u64>,
    num_fail_per_sec: BTreeMap<i64, u64>,
    response_times: BTreeMap<u64, u64>,
    total_content_length: u64,
    start_time: i64,
    last_request_timestamp: Option<i64>,
}

/// 条目快照，序列化后即为 `stats` 消息中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub name: String,
    pub method: String,
    pub num_requests: u64,
    pub num_none_requests: u64,
    pub num_failures: u64,
    pub total_response_time: u64,
    pub min_response_time: Option<u64>,
    pub max_response_time: u64,
    pub num_reqs_per_sec: BTreeMap<i64, u64>,
    pub num_fail_per_sec: BTreeMap<i64, u64>,
    pub response_times: BTreeMap<u64, u64>,
    pub total_content_length: u64,
    /// unix时间(秒)
    pub start_time: f64,
    /// unix时间(秒)
    pub last_request_timestamp: Option<f64>,
}

impl EntrySnapshot {
    /// 有计时请求的平均响应时间(毫秒)
    pub fn avg_response_time(&self) -> f64 {
        let timed = self.num_requests - self.num_none_requests;
        if timed == 0 {
            0.0
        } else {
            self.total_response_time as f64 / timed as f64
        }
    }
}

impl StatsEntry {
    pub fn new(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new_at(name.into(), method.into(), now_millis())
    }

    fn new_at(name: String, method: String, now: i64) -> Self {
        Self {
            name,
            method,
            num_requests: 0,
            num_none_requests: 0,
            num_failures: 0,
            total_response_time: 0,
            min_response_time: None,
            max_response_time: 0,
            num_reqs_per_sec: BTreeMap::new(),
            num_fail_per_sec: BTreeMap::new(),
            response_times: BTreeMap::new(),
            total_content_length: 0,
            start_time: now,
            last_request_timestamp: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_requests(&self) -> u64 {
        self.num_requests
    }

    pub fn num_failures(&self) -> u64 {
        self.num_failures
    }

    /// 记录一次成功请求；没有响应时间(或为0)时只计入 `num_none_requests`
    pub fn log_request(&mut self, response_time: Option<u64>, content_length: Option<u64>) {
        self.log_request_at(now_millis(), response_time, content_length);
    }

    pub(crate) fn log_request_at(
        &mut self,
        now: i64,
        response_time: Option<u64>,
        content_length: Option<u64>,
    ) {
        self.num_requests += 1;
        *self.num_reqs_per_sec.entry(now.div_euclid(1000)).or_insert(0) += 1;
        self.last_request_timestamp = Some(now);

        let response_time = match response_time {
            Some(rt) if rt > 0 => rt,
            _ => {
                self.num_none_requests += 1;
                return;
            }
        };

        self.total_response_time = self.total_response_time.saturating_add(response_time);
        self.min_response_time = Some(match self.min_response_time {
            Some(min) => min.min(response_time),
            None => response_time,
        });
        self.max_response_time = self.max_response_time.max(response_time);

        *self
            .response_times
            .entry(round_response_time(response_time))
            .or_insert(0) += 1;

        if let Some(len) = content_length {
            self.total_content_length = self.total_content_length.saturating_add(len);
        }
    }

    pub fn log_error(&mut self) {
        self.log_error_at(now_millis());
    }

    pub(crate) fn log_error_at(&mut self, now: i64) {
        self.num_failures += 1;
        *self.num_fail_per_sec.entry(now.div_euclid(1000)).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            name: self.name.clone(),
            method: self.method.clone(),
            num_requests: self.num_requests,
            num_none_requests: self.num_none_requests,
            num_failures: self.num_failures,
            total_response_time: self.total_response_time,
            min_response_time: self.min_response_time,
            max_response_time: self.max_response_time,
            num_reqs_per_sec: self.num_reqs_per_sec.clone(),
            num_fail_per_sec: self.num_fail_per_sec.clone(),
            response_times: self.response_times.clone(),
            total_content_length: self.total_content_length,
            start_time: self.start_time as f64 / 1000.0,
            last_request_timestamp: self.last_request_timestamp.map(|ts| ts as f64 / 1000.0),
        }
    }

    pub fn reset(&mut self) {
        self.reset_at(now_millis());
    }

    fn reset_at(&mut self, now: i64) {
        let name = std::mem::take(&mut self.name);
        let method = std::mem::take(&mut self.method);
        *self = Self::new_at(name, method, now);
    }

    /// 返回快照并清零
    pub fn collect(&mut self) -> EntrySnapshot {
        let snapshot = self.snapshot();
        self.reset();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(round_response_time(7), 7);
        assert_eq!(round_response_time(99), 99);
        assert_eq!(round_response_time(100), 100);
        assert_eq!(round_response_time(147), 150);
        assert_eq!(round_response_time(145), 150);
        assert_eq!(round_response_time(144), 140);
        assert_eq!(round_response_time(999), 1000);
        assert_eq!(round_response_time(3432), 3400);
        assert_eq!(round_response_time(58760), 59000);
    }

    #[test]
    fn test_per_second_buckets() {
        let mut entry = StatsEntry::new_at("get".into(), "drone".into(), 1_000);
        entry.log_request_at(10_100, Some(20), None);
        entry.log_request_at(10_900, Some(30), None);
        entry.log_request_at(11_000, None, None);
        entry.log_error_at(11_500);

        let snap = entry.snapshot();
        assert_eq!(snap.num_reqs_per_sec.get(&10), Some(&2));
        assert_eq!(snap.num_reqs_per_sec.get(&11), Some(&1));
        assert_eq!(snap.num_fail_per_sec.get(&11), Some(&1));
        assert_eq!(snap.last_request_timestamp, Some(11.0));
        assert_eq!(snap.start_time, 1.0);
    }

    #[test]
    fn test_untimed_request_leaves_timing_alone() {
        let mut entry = StatsEntry::new("get", "drone");
        entry.log_request(None, Some(512));
        entry.log_request(Some(0), None);

        let snap = entry.snapshot();
        assert_eq!(snap.num_requests, 2);
        assert_eq!(snap.num_none_requests, 2);
        assert_eq!(snap.min_response_time, None);
        assert_eq!(snap.total_content_length, 0);
        assert!(snap.response_times.is_empty());
    }

    #[test]
    fn test_min_max_total() {
        let mut entry = StatsEntry::new("get", "drone");
        for rt in [120, 40, 300] {
            entry.log_request(Some(rt), Some(10));
        }
        let snap = entry.collect();
        assert_eq!(snap.min_response_time, Some(40));
        assert_eq!(snap.max_response_time, 300);
        assert_eq!(snap.total_response_time, 460);
        assert_eq!(snap.total_content_length, 30);
        assert_eq!(snap.response_times.get(&120), Some(&1));

        let fresh = entry.snapshot();
        assert_eq!(fresh.num_requests, 0);
        assert_eq!(fresh.min_response_time, None);
        assert_eq!(fresh.last_request_timestamp, None);
        assert_eq!(fresh.name, "get");
    }

    #[test]
    fn test_huge_response_times_saturate() {
        assert_eq!(round_response_time(u64::MAX), 18_000_000_000_000_000_000);

        let mut entry = StatsEntry::new("slow", "drone");
        entry.log_request(Some(u64::MAX), Some(u64::MAX));
        entry.log_request(Some(u64::MAX), Some(1));
        let snap = entry.snapshot();
        assert_eq!(snap.total_response_time, u64::MAX);
        assert_eq!(snap.total_content_length, u64::MAX);
        assert_eq!(snap.max_response_time, u64::MAX);
    }
}
