//! Drone端网络通信模块 - DEALER socket实现

use std::time::Duration;

use log::{debug, info, warn};
use zmq::{Context, Socket};

use crate::TransportError;

/// 发送超时，避免master不可达时发送无限阻塞
const SEND_TIMEOUT_MS: i32 = 1000;

/// 关闭时等待已排队消息发出的最长时间
const CLOSE_LINGER_MS: i32 = SEND_TIMEOUT_MS;

/// 面向消息的传输层
///
/// 每次 `send`/`recv` 都是一个完整帧。关闭后 `recv` 返回 [`TransportError::Closed`]。
pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// 最多等待 `timeout`，超时返回 `Ok(None)`
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// 基于ZMQ DEALER的传输，routing identity即worker ID
pub struct ZmqTransport {
    socket: Option<Socket>,
    _ctx: Context,
    endpoint: String,
}

impl ZmqTransport {
    /// 连接master的ROUTER socket
    pub fn connect(endpoint: &str, identity: &str) -> Result<Self, TransportError> {
        let ctx = Context::new();
        let socket = ctx.socket(zmq::DEALER)?;
        socket.set_identity(identity.as_bytes())?;
        socket.set_linger(0)?;
        socket.set_sndtimeo(SEND_TIMEOUT_MS)?;
        socket.connect(endpoint)?;
        info!("Connected DEALER socket to {} as {}", endpoint, identity);

        Ok(Self {
            socket: Some(socket),
            _ctx: ctx,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn socket(&self) -> Result<&Socket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }
}

fn map_zmq(e: zmq::Error) -> TransportError {
    match e {
        zmq::Error::ETERM | zmq::Error::ENOTSOCK => TransportError::Closed,
        other => TransportError::Zmq(other),
    }
}

impl Transport for ZmqTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.socket()?.send(frame, 0).map_err(map_zmq)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let socket = self.socket()?;
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);

        let readable = {
            let mut items = [socket.as_poll_item(zmq::POLLIN)];
            zmq::poll(&mut items, timeout_ms).map_err(map_zmq)?;
            items[0].is_readable()
        };
        if !readable {
            return Ok(None);
        }

        let frame = socket.recv_bytes(0).map_err(map_zmq)?;
        if socket.get_rcvmore().unwrap_or(false) {
            // 协议只使用单帧消息，多余的帧丢弃
            warn!("Discarding unexpected multipart remainder from {}", self.endpoint);
            while socket.get_rcvmore().unwrap_or(false) {
                if socket.recv_bytes(0).is_err() {
                    break;
                }
            }
        }
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(socket) = self.socket.take() {
            // linger为0时队列中尚未发出的帧(如 `quit`)会被丢弃
            if let Err(e) = socket.set_linger(CLOSE_LINGER_MS) {
                debug!("Setting close linger for {} failed: {}", self.endpoint, e);
            }
            drop(socket);
            info!("Closed DEALER socket to {}", self.endpoint);
        }
        Ok(())
    }
}
