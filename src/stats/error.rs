//! 失败记录，对应Locust Failures页中的一行

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsError {
    pub name: String,
    pub method: String,
    pub error: String,
    pub occurrences: u64,
}

impl StatsError {
    pub fn new(name: impl Into<String>, method: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            error: error.into(),
            occurrences: 0,
        }
    }

    /// 在错误目录中的键
    pub fn key(name: &str, error: &str) -> String {
        format!("{}.{}", name, error)
    }

    pub fn occurred(&mut self) {
        self.occurrences += 1;
    }
}
