//! locust_drone基础示例
//!
//! 先用 `locust --master` 启动master，然后运行
//! `LOCUST_MASTER_ENDPOINT=tcp://127.0.0.1:5557 cargo run --example basic`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use locust_drone::{Drone, DroneConfig, Stats, User};

/// 每200ms"请求"一次并记录模拟延迟的用户
struct Pinger {
    stats: Stats,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Pinger {
    fn new(stats: Stats) -> Self {
        Self {
            stats,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl User for Pinger {
    fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let stats = self.stats.clone();
        self.thread = Some(thread::spawn(move || {
            let mut n: u64 = 0;
            while running.load(Ordering::SeqCst) {
                let started = Instant::now();
                thread::sleep(Duration::from_millis(200));
                n += 1;
                if n % 25 == 0 {
                    stats.log_error("ping", "simulated failure");
                } else {
                    stats.log_request_timed("ping", started.elapsed(), Some(64));
                }
            }
        }));
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn main() -> locust_drone::Result<()> {
    let config = DroneConfig::from_env()?;
    config.init_logger();

    let mut drone = Drone::new(config);
    let stats = drone.stats();
    drone.register("Pinger", move || Pinger::new(stats.clone()));

    let control = drone.control();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(600));
        control.quit();
    });

    drone.run()
}
