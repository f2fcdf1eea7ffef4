//! TCP connection management.
//!
//! A [`Connection`] owns one TCP stream with buffered RESP I/O. It supports
//! single request/response round trips and pipelines, where a group of
//! commands is written in one buffer and the replies are read back in order.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resp;
use crate::types::Value;

/// Default read/write buffer size (8 KB).
const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Default time allowed for the TCP handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for connecting to a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Upper bound on the TCP connect.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            buffer_size: DEFAULT_BUF_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a config from a host and port.
    pub fn from_addr(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse an endpoint of the form `host:port` or `redis://host:port`.
    ///
    /// A trailing path (`/0`) is accepted and ignored. Bracketed IPv6 hosts
    /// (`[::1]:6379`) are supported.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let trimmed = endpoint.trim();
        let without_scheme = trimmed
            .strip_prefix("redis://")
            .unwrap_or(trimmed);
        let authority = without_scheme
            .split('/')
            .next()
            .unwrap_or(without_scheme);

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("missing port in '{}'", endpoint)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "missing host in '{}'",
                endpoint
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid port in '{}'", endpoint)))?;

        Ok(Self::from_addr(host, port))
    }

    /// The `host:port` address string.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A TCP stream with buffered RESP I/O.
pub struct Connection {
    addr: String,
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    broken: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("buffered", &self.read_buf.len())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection {
    /// Open a new connection using the given configuration.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let addr = config.address();
        debug!(addr = %addr, "connecting");
        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;
        tcp.set_nodelay(true)?;

        Ok(Self {
            addr,
            stream: tcp,
            read_buf: BytesMut::with_capacity(config.buffer_size),
            write_buf: BytesMut::with_capacity(config.buffer_size),
            broken: false,
        })
    }

    /// The `host:port` this connection talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether a transport or framing error has left the stream out of
    /// step with the server. A broken connection refuses further requests.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send a command and read the response. An error reply becomes
    /// [`Error::Server`].
    pub async fn execute(&mut self, args: &[Bytes]) -> Result<Value> {
        self.write_buf.clear();
        resp::encode_command(args, &mut self.write_buf);
        let mut replies = self.round_trip(1).await?;
        replies
            .pop()
            .ok_or(Error::ConnectionClosed)?
            .into_result()
    }

    /// Send every command in one write and read back one reply per command.
    ///
    /// Error replies are returned in place as [`Value::Error`]; only a
    /// transport or framing failure fails the whole pipeline, and it also
    /// marks the connection broken.
    pub async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<Vec<Value>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        self.write_buf.clear();
        for args in commands {
            resp::encode_command(args, &mut self.write_buf);
        }
        self.round_trip(commands.len()).await
    }

    /// `PING`, expecting `PONG`.
    pub async fn ping(&mut self) -> Result<()> {
        match self.execute(&[Bytes::from_static(b"PING")]).await? {
            Value::Status(ref s) if s == "PONG" => Ok(()),
            other => Err(Error::UnexpectedResponse {
                expected: "PONG",
                actual: other.to_string(),
            }),
        }
    }

    /// Flush the encoded commands and read `count` replies.
    ///
    /// Any failure here leaves an unknown number of reply bytes in flight,
    /// so the connection is poisoned rather than reused.
    async fn round_trip(&mut self, count: usize) -> Result<Vec<Value>> {
        if self.broken {
            self.write_buf.clear();
            return Err(Error::ConnectionClosed);
        }

        let result = self.exchange(count).await;
        if let Err(ref e) = result {
            debug!(addr = %self.addr, error = %e, "connection poisoned");
            self.broken = true;
            self.read_buf.clear();
            self.write_buf.clear();
        }
        result
    }

    async fn exchange(&mut self, count: usize) -> Result<Vec<Value>> {
        self.flush_write_buf().await?;
        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.read_response().await?);
        }
        Ok(replies)
    }

    async fn flush_write_buf(&mut self) -> Result<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.write_buf.clear();
        Ok(())
    }

    /// Read a single RESP reply from the connection.
    async fn read_response(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = resp::decode_value(&mut self.read_buf)? {
                return Ok(value);
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}
