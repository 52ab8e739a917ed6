//! TCP transport
//!
//! Every operation runs under the matching deadline from [`TransportConfig`].
//! A zero-length read is reported as [`TransportError::Closed`].

use super::{Transport, TransportConfig, TransportError};
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Plain TCP byte stream
pub struct TcpTransport {
    stream: Option<TcpStream>,
    config: TransportConfig,
}

/// Run one socket operation, mapping expiry to `Timeout`
async fn within<F, T>(secs: u64, op: F) -> Result<T, TransportError>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(secs), op)
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(TransportError::Io)
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            stream: None,
            config,
        }
    }

    pub fn new_default() -> Self {
        Self::new(TransportConfig::default())
    }

    /// Wrap a stream accepted by a listener
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Self {
        let mut transport = Self::new(config);
        transport.attach(stream);
        transport
    }

    /// Address of the remote end, if connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    fn attach(&mut self, stream: TcpStream) {
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError> {
        let stream = match within(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(stream) => stream,
            Err(TransportError::Io(e)) => {
                return Err(TransportError::ConnectionFailed(format!("{}: {}", addr, e)))
            }
            Err(e) => return Err(e),
        };
        self.attach(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let secs = self.config.write_timeout;
        within(secs, self.stream_mut()?.write_all(data)).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let secs = self.config.read_timeout;
        match within(secs, self.stream_mut()?.read(buf)).await? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
