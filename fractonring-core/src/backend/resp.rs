use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use redis_protocol::resp2::types::BytesFrame;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::backend::codec::RespCodec;
use crate::backend::Backend;
use crate::commands::Command;
use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, Descriptor};
use crate::errors::BackendError;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

type Connection = Framed<TcpStream, RespCodec>;

/// Backend handle speaking RESP2 to a Redis-compatible server.
///
/// The connection is opened on first use and reopened on the call after a
/// failure. Commands are serialized over that single connection, and each
/// round trip is bounded by the I/O timeout. Closing the handle fails calls
/// that are waiting or in flight with [`BackendError::Closed`].
pub struct RespBackend {
    descriptor: Descriptor,
    connect_timeout: Duration,
    io_timeout: Duration,
    conn: Mutex<Option<Connection>>,
    shutdown: CancellationToken,
}

impl RespBackend {
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            conn: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on one command round trip, handshake commands included.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn connect(&self) -> Result<Connection, BackendError> {
        let addr = self.descriptor.addr();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(BackendError::Connect { addr, source }),
            Err(_) => {
                return Err(BackendError::ConnectTimeout { addr, timeout: self.connect_timeout });
            }
        };

        // low-latency small writes
        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            warn!("could not enable keepalive for {}: {}", self.descriptor, e);
        }

        let mut conn = Framed::new(stream, RespCodec::new());

        if let Some(password) = &self.descriptor.password {
            let mut args = Vec::with_capacity(2);
            if let Some(user) = &self.descriptor.username {
                args.push(Bytes::from(user.clone()));
            }
            args.push(Bytes::from(password.clone()));
            let reply = self.roundtrip(&mut conn, Command::Auth, Command::Auth.frame(args)).await?;
            expect_ok(Command::Auth, reply)?;
        }

        if let Some(db) = self.descriptor.db {
            let frame = Command::Select.frame([db.to_string()]);
            let reply = self.roundtrip(&mut conn, Command::Select, frame).await?;
            expect_ok(Command::Select, reply)?;
        }

        info!("connected to {}", self.descriptor);
        Ok(conn)
    }

    async fn request(&self, command: Command, frame: BytesFrame) -> Result<BytesFrame, BackendError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(BackendError::Closed),
            result = self.exchange(command, frame) => result,
        }
    }

    async fn exchange(&self, command: Command, frame: BytesFrame) -> Result<BytesFrame, BackendError> {
        let mut slot = self.conn.lock().await;

        // Held outside the slot while in flight: if this future is dropped
        // mid-request the half-used connection goes with it.
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        match self.roundtrip(&mut conn, command, frame).await {
            Ok(reply) => {
                if !self.shutdown.is_cancelled() {
                    *slot = Some(conn);
                }
                Ok(reply)
            }
            Err(e) => {
                warn!("{} to {} failed, dropping connection: {}", command, self.descriptor, e);
                Err(e)
            }
        }
    }

    async fn roundtrip(
        &self,
        conn: &mut Connection,
        command: Command,
        frame: BytesFrame,
    ) -> Result<BytesFrame, BackendError> {
        tokio::time::timeout(self.io_timeout, send_and_receive(conn, frame))
            .await
            .map_err(|_| BackendError::Timeout { command, timeout: self.io_timeout })?
    }
}

impl Backend for RespBackend {
    async fn ping(&self) -> Result<String, BackendError> {
        match self.request(Command::Ping, Command::Ping.bare()).await? {
            BytesFrame::SimpleString(s) | BytesFrame::BulkString(s) => {
                Ok(String::from_utf8_lossy(&s).into_owned())
            }
            other => Err(unexpected(Command::Ping, other)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let frame = Command::Get.frame([Bytes::copy_from_slice(key.as_bytes())]);
        match self.request(Command::Get, frame).await? {
            BytesFrame::BulkString(value) | BytesFrame::SimpleString(value) => Ok(Some(value)),
            BytesFrame::Null => Ok(None),
            other => Err(unexpected(Command::Get, other)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, expiry_secs: u64) -> Result<(), BackendError> {
        let frame = Command::Set.frame([
            Bytes::copy_from_slice(key.as_bytes()),
            value,
            Bytes::from_static(b"EX"),
            Bytes::from(expiry_secs.to_string()),
        ]);
        let reply = self.request(Command::Set, frame).await?;
        expect_ok(Command::Set, reply)
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        let reply = self.request(Command::FlushAll, Command::FlushAll.bare()).await?;
        expect_ok(Command::FlushAll, reply)
    }

    async fn close(&self) {
        self.shutdown.cancel();
        // A busy slot belongs to an in-flight call, which drops its
        // connection once it sees the cancellation.
        if let Ok(mut slot) = self.conn.try_lock() {
            if slot.take().is_some() {
                info!("closed connection to {}", self.descriptor);
            }
        }
    }
}

async fn send_and_receive(conn: &mut Connection, frame: BytesFrame) -> Result<BytesFrame, BackendError> {
    conn.send(frame).await?;
    match conn.next().await {
        Some(Ok(reply)) => Ok(reply),
        Some(Err(e)) => Err(e.into()),
        None => Err(BackendError::ConnectionClosed),
    }
}

fn expect_ok(command: Command, reply: BytesFrame) -> Result<(), BackendError> {
    match reply {
        BytesFrame::SimpleString(s) if &s[..] == b"OK" => Ok(()),
        other => Err(unexpected(command, other)),
    }
}

fn unexpected(command: Command, reply: BytesFrame) -> BackendError {
    match reply {
        BytesFrame::Error(message) => BackendError::Server(message.to_string()),
        other => BackendError::UnexpectedReply { command, reply: format!("{other:?}") },
    }
}
