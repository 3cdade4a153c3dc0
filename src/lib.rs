//! LocustDrone 核心库入口
//!
//! 连接Locust master的工蜂(worker)实现：协议编解码、状态机、指标聚合

pub mod config;
pub mod drone;
pub mod proto;
pub mod stats;

use thiserror::Error;

/// 协议层错误
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("invalid frame: {0}")]
    FrameShape(String),

    #[error("msgpack encode error: {0}")]
    Encode(String),

    #[error("malformed '{msg_type}' payload: {reason}")]
    MalformedPayload { msg_type: String, reason: String },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Encode(e.to_string())
    }
}

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("transport closed")]
    Closed,
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("master endpoint is empty")]
    MissingEndpoint,

    #[error("invalid master endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("worker id is empty")]
    EmptyWorkerId,

    #[error("{0} interval must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 通用错误类型
#[derive(Error, Debug)]
pub enum DroneError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, DroneError>;

// 公开导出模块的公共接口
pub use config::DroneConfig;
pub use drone::heartbeat::PeriodicTimer;
pub use drone::network::{Transport, ZmqTransport};
pub use drone::{Drone, DroneControl, DroneState, User};
pub use proto::{Message, MessageType, PROTOCOL_VERSION};
pub use stats::{Stats, StatsEntry};
