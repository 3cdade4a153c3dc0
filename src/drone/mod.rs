//! 工蜂(Worker)节点实现模块
//!
//! [`Drone`] 是进程内唯一的编排者：持有socket、用户工厂、运行中的用户和当前状态。
//! 所有消息处理、状态迁移和用户增减都在调用 `run()` 的线程上完成；
//! 定时器和 [`DroneControl`] 只向动作队列投递动作。

pub mod heartbeat;
pub mod network;
pub mod population;

use std::collections::HashMap;
use std::fmt;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::config::DroneConfig;
use crate::proto::{
    ExceptionData, HeartbeatData, Message, MessageType, PopulationSnapshot, SpawnData,
    StatsReport, PROTOCOL_VERSION,
};
use crate::stats::Stats;
use crate::{ProtocolError, TransportError};

use heartbeat::{PeriodicTimer, ResourceSampler};
use network::{Transport, ZmqTransport};
use population::{Population, UserFactory};

/// 由宿主程序提供的负载单元
pub trait User: Send {
    fn start(&mut self);
    fn stop(&mut self);
}

/// Drone当前所处状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneState {
    Ready,
    Spawning,
    Running,
    Stopping,
}

impl DroneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneState::Ready => "ready",
            DroneState::Spawning => "spawning",
            DroneState::Running => "running",
            DroneState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递给drone线程执行的动作
#[derive(Debug)]
enum Action {
    Heartbeat,
    Stats,
    Exception(ExceptionData),
    Quit,
}

/// 可跨线程使用的控制句柄
#[derive(Clone)]
pub struct DroneControl {
    actions: Sender<Action>,
    stats: Stats,
}

impl DroneControl {
    /// 请求优雅退出，由drone线程执行 [`Drone::quit`]
    pub fn quit(&self) {
        if self.actions.send(Action::Quit).is_err() {
            debug!("Drone already gone, ignoring quit request");
        }
    }

    /// 向master上报一个异常
    pub fn report_exception(&self, msg: impl Into<String>, traceback: impl Into<String>) {
        let data = ExceptionData {
            msg: msg.into(),
            traceback: traceback.into(),
        };
        if self.actions.send(Action::Exception(data)).is_err() {
            debug!("Drone already gone, dropping exception report");
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

pub struct Drone {
    config: DroneConfig,
    factories: HashMap<String, UserFactory>,
    population: Population,
    state: DroneState,
    stats: Stats,
    transport: Option<Box<dyn Transport>>,
    heartbeat_timer: Option<PeriodicTimer>,
    stats_timer: Option<PeriodicTimer>,
    sampler: ResourceSampler,
    actions_tx: Sender<Action>,
    actions_rx: Receiver<Action>,
    last_spawn_timestamp: Option<f64>,
    quitting: bool,
}

impl Drone {
    /// 创建drone，`run()` 时按配置连接master
    pub fn new(config: DroneConfig) -> Self {
        let (actions_tx, actions_rx) = unbounded();
        Self {
            config,
            factories: HashMap::new(),
            population: Population::new(),
            state: DroneState::Ready,
            stats: Stats::new(),
            transport: None,
            heartbeat_timer: None,
            stats_timer: None,
            sampler: ResourceSampler::new(),
            actions_tx,
            actions_rx,
            last_spawn_timestamp: None,
            quitting: false,
        }
    }

    /// 使用已建立的传输创建drone，`run()` 不再连接
    pub fn with_transport(config: DroneConfig, transport: impl Transport + 'static) -> Self {
        let mut drone = Self::new(config);
        drone.transport = Some(Box::new(transport));
        drone
    }

    /// 注册一个用户类；同名重复注册会替换旧工厂
    pub fn register<F, U>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn() -> U + Send + 'static,
        U: User + 'static,
    {
        let class = class.into();
        debug!("Registered user class '{}'", class);
        self.factories
            .insert(class, Box::new(move || Box::new(factory()) as Box<dyn User>));
    }

    pub fn config(&self) -> &DroneConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn state(&self) -> DroneState {
        self.state
    }

    /// 用户记录指标用的句柄
    pub fn stats(&self) -> Stats {
        self.stats.clone()
    }

    pub fn control(&self) -> DroneControl {
        DroneControl {
            actions: self.actions_tx.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn population(&self) -> PopulationSnapshot {
        self.population.snapshot()
    }

    pub fn user_count(&self, class: &str) -> usize {
        self.population.count(class)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.population.contains_class(class)
    }

    pub fn timers_running(&self) -> bool {
        self.heartbeat_timer.is_some() || self.stats_timer.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// 主循环：
    ///
    /// - 连接master
    /// - 发送 `client_ready`
    /// - 启动心跳与统计定时器
    /// - 处理收到的消息，直到socket关闭
    pub fn run(&mut self) -> crate::Result<()> {
        self.config.validate()?;

        if self.transport.is_none() {
            if self.quitting {
                return Ok(());
            }
            info!("Connecting to Locust master at {}", self.config.master_endpoint);
            let transport =
                ZmqTransport::connect(&self.config.master_endpoint, &self.config.worker_id)?;
            self.transport = Some(Box::new(transport));
        }

        info!("Sending client_ready message with version {}", PROTOCOL_VERSION);
        self.send(&Message::new(
            MessageType::ClientReady,
            Value::from(PROTOCOL_VERSION),
            self.id(),
        ));

        self.start_timers();

        loop {
            self.drain_actions();

            let poll_interval = self.config.poll_interval;
            let received = match self.transport.as_mut() {
                Some(transport) => transport.recv(poll_interval),
                None => break,
            };

            match received {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(&frame) {
                        error!("Error handling incoming message: {}", e);
                    }
                }
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    info!("Connection to master closed");
                    self.transport = None;
                    break;
                }
                Err(e) => {
                    error!("Failed to receive message: {}", e);
                    thread::sleep(poll_interval);
                }
            }
        }

        self.cancel_timers();
        Ok(())
    }

    /// 解码并分发一帧
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let msg = Message::decode(frame)?;
        info!("Received '{}' message", msg.msg_type);
        self.handle(msg)
    }

    /// 分发一条来自master的消息
    pub fn handle(&mut self, msg: Message) -> Result<(), ProtocolError> {
        match msg.kind()? {
            MessageType::Spawn => {
                let data: SpawnData = msg.payload()?;
                self.handle_spawn(data);
            }
            MessageType::Stop => self.handle_stop(),
            MessageType::Quit => self.quit(),
            other @ (MessageType::ClientReady
            | MessageType::ClientStopped
            | MessageType::Heartbeat
            | MessageType::Stats
            | MessageType::Spawning
            | MessageType::SpawningComplete
            | MessageType::Exception) => {
                return Err(ProtocolError::UnknownMessageType(other.to_string()));
            }
        }
        Ok(())
    }

    /// 调整运行中的用户数量以匹配 `spawn` 指令
    fn handle_spawn(&mut self, data: SpawnData) {
        if let (Some(timestamp), Some(last)) = (data.timestamp, self.last_spawn_timestamp) {
            if timestamp <= last {
                warn!(
                    "Discarding stale spawn message (timestamp {} <= last accepted {})",
                    timestamp, last
                );
                return;
            }
        }
        if data.timestamp.is_some() {
            self.last_spawn_timestamp = data.timestamp;
        }

        self.state = DroneState::Spawning;
        self.send(&Message::new(MessageType::Spawning, Value::Nil, self.id()));

        for (class, &target) in &data.user_classes_count {
            let factory = match self.factories.get(class) {
                Some(factory) => factory,
                None => {
                    warn!(
                        "No factory has been registered for the '{}' user class, skipping those users",
                        class
                    );
                    continue;
                }
            };
            let target = usize::try_from(target).unwrap_or(usize::MAX);
            let (started, stopped) = self.population.scale(class, factory, target);
            debug!(
                "'{}': started {}, stopped {}, now {}",
                class,
                started,
                stopped,
                self.population.count(class)
            );
        }

        self.state = DroneState::Running;
        let snapshot = self.population.snapshot();
        info!("Spawning complete: {} users running", snapshot.user_count);
        self.send_payload(MessageType::SpawningComplete, &snapshot);
    }

    /// 停止所有用户并重新报告就绪
    fn handle_stop(&mut self) {
        self.state = DroneState::Stopping;
        let stopped = self.population.stop_all();
        info!("Stopped {} users", stopped);

        self.send(&Message::new(MessageType::ClientStopped, Value::Nil, self.id()));
        self.send(&Message::new(
            MessageType::ClientReady,
            Value::from(PROTOCOL_VERSION),
            self.id(),
        ));
        self.state = DroneState::Ready;
    }

    /// 优雅退出：停止用户、取消定时器、发送 `quit`、关闭socket。重复调用无效果。
    pub fn quit(&mut self) {
        if self.quitting {
            debug!("Quit already in progress, ignoring");
            return;
        }
        self.quitting = true;
        self.state = DroneState::Stopping;

        let stopped = self.population.stop_all();
        info!("Quitting, stopped {} users", stopped);

        self.cancel_timers();
        self.send(&Message::new(MessageType::Quit, Value::Nil, self.id()));

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                error!("Failed to close connection: {}", e);
            }
        }
    }

    /// 立即发送一次心跳
    pub fn send_heartbeat(&mut self) {
        let (cpu, memory) = self.sampler.sample();
        let heartbeat = HeartbeatData {
            state: self.state,
            current_cpu_usage: cpu,
            current_memory_usage: memory,
        };
        debug!("Sending heartbeat: state={} cpu={:.1}%", self.state, cpu);
        self.send_payload(MessageType::Heartbeat, &heartbeat);
    }

    /// 采集指标并立即发送
    pub fn send_stats(&mut self) {
        let report = StatsReport::new(self.stats.collect(), self.population.snapshot());
        debug!(
            "Sending stats: {} entries, {} requests",
            report.stats.len(),
            report.stats_total.num_requests
        );
        self.send_payload(MessageType::Stats, &report);
    }

    fn drain_actions(&mut self) {
        while let Ok(action) = self.actions_rx.try_recv() {
            match action {
                Action::Heartbeat => self.send_heartbeat(),
                Action::Stats => self.send_stats(),
                Action::Exception(data) => {
                    self.send_payload(MessageType::Exception, &data);
                }
                Action::Quit => self.quit(),
            }
        }
    }

    fn start_timers(&mut self) {
        if self.heartbeat_timer.is_none() {
            let actions = self.actions_tx.clone();
            self.heartbeat_timer = Some(PeriodicTimer::start(
                "heartbeat",
                self.config.heartbeat_interval,
                move || actions.send(Action::Heartbeat).is_ok(),
            ));
        }
        if self.stats_timer.is_none() {
            let actions = self.actions_tx.clone();
            self.stats_timer = Some(PeriodicTimer::start(
                "stats",
                self.config.stats_interval,
                move || actions.send(Action::Stats).is_ok(),
            ));
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(mut timer) = self.heartbeat_timer.take() {
            timer.cancel();
        }
        if let Some(mut timer) = self.stats_timer.take() {
            timer.cancel();
        }
    }

    fn send_payload<T: Serialize>(&mut self, msg_type: MessageType, payload: &T) {
        match Message::with_payload(msg_type, payload, self.id()) {
            Ok(msg) => self.send(&msg),
            Err(e) => error!("Failed to encode '{}' message: {}", msg_type, e),
        }
    }

    /// 发送失败只记录日志，不影响主循环
    fn send(&mut self, msg: &Message) {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => {
                debug!("Connection closed, dropping '{}' message", msg.msg_type);
                return;
            }
        };

        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode '{}' message: {}", msg.msg_type, e);
                return;
            }
        };

        if let Err(e) = transport.send(&frame) {
            error!("Failed to send '{}' message: {}", msg.msg_type, e);
        }
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
