//! 运行中的用户集合
//!
//! 只在drone线程中修改。缩容时从列表尾部开始停止(后启动的先停)。

use std::collections::BTreeMap;

use log::debug;

use super::User;
use crate::proto::PopulationSnapshot;

/// 用户工厂
pub type UserFactory = Box<dyn Fn() -> Box<dyn User> + Send>;

#[derive(Default)]
pub struct Population {
    users: BTreeMap<String, Vec<Box<dyn User>>>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, class: &str) -> usize {
        self.users.get(class).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }

    pub fn contains_class(&self, class: &str) -> bool {
        self.users.contains_key(class)
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot {
            user_classes_count: self
                .users
                .iter()
                .map(|(class, users)| (class.clone(), users.len()))
                .collect(),
            user_count: self.total(),
        }
    }

    /// 将某类用户调整到 `target` 个，返回 (启动数, 停止数)
    pub fn scale(&mut self, class: &str, factory: &UserFactory, target: usize) -> (usize, usize) {
        let users = self.users.entry(class.to_string()).or_default();
        let current = users.len();

        if target > current {
            for _ in current..target {
                let mut user = factory();
                user.start();
                users.push(user);
            }
            debug!("Started {} '{}' users", target - current, class);
            (target - current, 0)
        } else if target < current {
            let stopped = stop_last(users, current - target);
            debug!("Stopped {} '{}' users", stopped, class);
            (0, stopped)
        } else {
            (0, 0)
        }
    }

    /// 停止所有用户，保留类名(数量为0)
    pub fn stop_all(&mut self) -> usize {
        self.users
            .values_mut()
            .map(|users| {
                let n = users.len();
                stop_last(users, n)
            })
            .sum()
    }
}

fn stop_last(users: &mut Vec<Box<dyn User>>, count: usize) -> usize {
    let mut stopped = 0;
    for _ in 0..count {
        match users.pop() {
            Some(mut user) => {
                user.stop();
                stopped += 1;
            }
            None => break,
        }
    }
    stopped
}
