//! 协议消息帧
//!
//! 每个ZMQ帧都是msgpack编码的三元组 `[type, data, node_id]`。
//! `data` 保持为 [`rmpv::Value`]，整数键的map在往返过程中仍是整数键。

use std::fmt;
use std::str::FromStr;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ProtocolError;

/// 本worker实现的Locust协议版本，随 `client_ready` 发送给master
pub const PROTOCOL_VERSION: &str = "2.4.3";

/// 协议消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientReady,
    ClientStopped,
    Heartbeat,
    Stats,
    Spawn,
    Spawning,
    SpawningComplete,
    Stop,
    Quit,
    Exception,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ClientReady => "client_ready",
            MessageType::ClientStopped => "client_stopped",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Stats => "stats",
            MessageType::Spawn => "spawn",
            MessageType::Spawning => "spawning",
            MessageType::SpawningComplete => "spawning_complete",
            MessageType::Stop => "stop",
            MessageType::Quit => "quit",
            MessageType::Exception => "exception",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "client_ready" => MessageType::ClientReady,
            "client_stopped" => MessageType::ClientStopped,
            "heartbeat" => MessageType::Heartbeat,
            "stats" => MessageType::Stats,
            "spawn" => MessageType::Spawn,
            "spawning" => MessageType::Spawning,
            "spawning_complete" => MessageType::SpawningComplete,
            "stop" => MessageType::Stop,
            "quit" => MessageType::Quit,
            "exception" => MessageType::Exception,
            other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条协议消息，构造后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// 原始类型标签，未知标签也会保留下来交给分发层处理
    pub msg_type: String,
    pub data: Value,
    pub node_id: String,
}

impl Message {
    pub fn new(msg_type: MessageType, data: Value, node_id: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.as_str().to_string(),
            data,
            node_id: node_id.into(),
        }
    }

    /// 以可序列化的结构体作为data构造消息，结构体按字段名编码为map
    pub fn with_payload<T: Serialize>(
        msg_type: MessageType,
        payload: &T,
        node_id: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let buf = rmp_serde::to_vec_named(payload)?;
        let data = rmpv::decode::read_value(&mut buf.as_slice())?;
        Ok(Self::new(msg_type, data, node_id))
    }

    /// 解析类型标签
    pub fn kind(&self) -> Result<MessageType, ProtocolError> {
        self.msg_type.parse()
    }

    /// 将data反序列化为指定结构，缺字段时返回 `MalformedPayload`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        rmpv::ext::from_value(self.data.clone()).map_err(|e| ProtocolError::MalformedPayload {
            msg_type: self.msg_type.clone(),
            reason: e.to_string(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let frame = Value::Array(vec![
            Value::from(self.msg_type.as_str()),
            self.data.clone(),
            Value::from(self.node_id.as_str()),
        ]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &frame)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// 解码一帧；顶层必须恰好是3元素数组
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut rd = frame;
        let value = rmpv::decode::read_value(&mut rd)?;
        if !rd.is_empty() {
            return Err(ProtocolError::FrameShape(format!(
                "{} trailing bytes after frame",
                rd.len()
            )));
        }

        let items = match value {
            Value::Array(items) if items.len() == 3 => items,
            Value::Array(items) => {
                return Err(ProtocolError::FrameShape(format!(
                    "expected a 3-element array, got {} elements",
                    items.len()
                )))
            }
            other => {
                return Err(ProtocolError::FrameShape(format!(
                    "expected a 3-element array, got {}",
                    other
                )))
            }
        };

        let mut items = items.into_iter();
        let (msg_type, data, node_id) = match (items.next(), items.next(), items.next()) {
            (Some(t), Some(d), Some(n)) => (t, d, n),
            _ => return Err(ProtocolError::FrameShape("truncated frame".to_string())),
        };

        Ok(Self {
            msg_type: text_field("type", msg_type)?,
            data,
            node_id: text_field("node_id", node_id)?,
        })
    }
}

fn text_field(field: &str, value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| ProtocolError::FrameShape(format!("{} is not valid UTF-8", field))),
        Value::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|_| ProtocolError::FrameShape(format!("{} is not valid UTF-8", field))),
        other => Err(ProtocolError::FrameShape(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags() {
        for ty in [
            MessageType::ClientReady,
            MessageType::SpawningComplete,
            MessageType::Exception,
        ] {
            assert_eq!(ty.as_str().parse::<MessageType>().unwrap(), ty);
        }
        assert!(matches!(
            "ack".parse::<MessageType>(),
            Err(ProtocolError::UnknownMessageType(t)) if t == "ack"
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = Message::new(MessageType::Stop, Value::Nil, "w")
            .encode()
            .unwrap();
        frame.push(0xc0);
        assert!(matches!(
            Message::decode(&frame),
            Err(ProtocolError::FrameShape(_))
        ));
    }
}
