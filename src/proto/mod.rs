//! Locust协议定义
//!
//! 消息帧编解码与各类消息的数据结构

pub mod message;
pub mod payload;

pub use message::{Message, MessageType, PROTOCOL_VERSION};
pub use payload::{ExceptionData, HeartbeatData, PopulationSnapshot, SpawnData, StatsReport};
