//! 工蜂节点定时器与资源采样
//!
//! 定时器线程只负责按间隔回调(通常是向drone的动作队列投递一个动作)，
//! 从不直接触碰drone的状态或socket。

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, error};
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};

/// 周期定时器
pub struct PeriodicTimer {
    name: &'static str,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// 启动定时器；回调返回 `false` 时定时器自行结束
    pub fn start<F>(name: &'static str, interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let spawned = thread::Builder::new()
            .name(format!("drone-{}", name))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if !on_tick() {
                                debug!("{} timer receiver gone, stopping", name);
                                break;
                            }
                        }
                        // 发送端被drop即视为取消
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            });

        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn {} timer thread: {}", name, e);
                None
            }
        };

        Self {
            name,
            shutdown: Some(shutdown_tx),
            thread,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// 取消并等待线程退出，可重复调用
    pub fn cancel(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} timer thread panicked", self.name);
            }
            debug!("{} timer cancelled", self.name);
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 心跳中上报的进程资源占用
pub struct ResourceSampler {
    sys: System,
    pid: Option<Pid>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("Process sampling unavailable: {}", e);
                None
            }
        };
        Self {
            sys: <System as SystemExt>::new(),
            pid,
        }
    }

    /// 返回 (CPU使用率百分比, 进程内存字节数)
    pub fn sample(&mut self) -> (f64, u64) {
        if let Some(pid) = self.pid {
            if <System as SystemExt>::refresh_process(&mut self.sys, pid) {
                if let Some(process) = <System as SystemExt>::process(&self.sys, pid) {
                    return (process.cpu_usage() as f64, process.memory());
                }
            }
        }

        <System as SystemExt>::refresh_cpu(&mut self.sys);
        let cpu = <System as SystemExt>::global_cpu_info(&self.sys).cpu_usage();
        (cpu as f64, 0)
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
