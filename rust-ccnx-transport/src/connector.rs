//! Local connector: the socket between a client and its forwarder.
//!
//! Owns one TCP connection and reconnects transparently on link loss
//! with a fixed backoff, bounded by an overall deadline. Transient drops
//! are invisible to the caller; only an exhausted reconnection window
//! surfaces `LinkDown`. After a successful reconnect the caller is told
//! so it can re-bind producer prefixes.

use std::time::Duration;

use bytes::Bytes;
use log::{info, warn};
use rust_ccnx_common::error::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

use crate::message::read_message;

/// Pause between reconnection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Total window before the connector gives up.
pub const RECONNECT_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, PartialEq)]
pub enum ConnectorEvent {
    /// One framed message arrived.
    Message(Bytes),
    /// The link dropped and came back; producer prefixes need re-binding.
    Reconnected,
}

pub struct LocalConnector {
    addr: String,
    stream: Option<TcpStream>,
    backoff: Duration,
    deadline: Duration,
}

impl LocalConnector {
    /// Connects to the forwarder, retrying within the deadline window.
    pub async fn connect(addr: &str) -> Result<Self> {
        let mut connector = Self {
            addr: addr.to_string(),
            stream: None,
            backoff: RECONNECT_BACKOFF,
            deadline: RECONNECT_DEADLINE,
        };
        connector.establish().await?;
        Ok(connector)
    }

    /// Overrides the retry schedule (tests shrink it).
    pub fn set_retry_schedule(&mut self, backoff: Duration, deadline: Duration) {
        self.backoff = backoff;
        self.deadline = deadline;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn establish(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let remaining = self
                .deadline
                .checked_sub(started.elapsed())
                .ok_or(Error::LinkDown)?;
            match timeout(remaining, TcpStream::connect(&self.addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("connect to {} failed: {}", self.addr, e);
                    sleep(self.backoff).await;
                }
                Err(_) => return Err(Error::LinkDown),
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        info!("connection to {} lost, reconnecting", self.addr);
        self.stream = None;
        self.establish().await
    }

    /// Writes one framed message, reconnecting once on a broken pipe.
    pub async fn send(&mut self, pkt: &Bytes) -> Result<bool> {
        let mut reconnected = false;
        loop {
            let stream = self.stream.as_mut().ok_or(Error::LinkDown)?;
            match stream.write_all(pkt).await {
                Ok(()) => return Ok(reconnected),
                Err(e) => {
                    warn!("write failed: {}", e);
                    self.reconnect().await?;
                    reconnected = true;
                }
            }
        }
    }

    /// Waits for the next inbound message, reconnecting on read errors.
    pub async fn recv(&mut self) -> Result<ConnectorEvent> {
        loop {
            let stream = self.stream.as_mut().ok_or(Error::LinkDown)?;
            match read_message(stream).await {
                Ok(msg) => return Ok(ConnectorEvent::Message(msg)),
                Err(Error::InvalidPacket(reason)) => {
                    // A framing error poisons the byte stream; resync by
                    // reconnecting.
                    warn!("framing error: {}", reason);
                    self.reconnect().await?;
                    return Ok(ConnectorEvent::Reconnected);
                }
                Err(_) => {
                    self.reconnect().await?;
                    return Ok(ConnectorEvent::Reconnected);
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnx_common::name::Name;
    use rust_ccnx_common::packet::Interest;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_and_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Echo one framed message back.
            let msg = read_message(&mut sock).await.unwrap();
            sock.write_all(&msg).await.unwrap();
        });

        let mut connector = LocalConnector::connect(&addr).await.unwrap();
        let wire = Interest::new(Name::from_uri("/echo").unwrap()).encode();
        connector.send(&wire).await.unwrap();
        match connector.recv().await.unwrap() {
            ConnectorEvent::Message(msg) => assert_eq!(msg, wire),
            other => panic!("expected echo, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            // First connection: accept and immediately drop.
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
            // Second connection: deliver one message.
            let (mut sock, _) = listener.accept().await.unwrap();
            let wire = Interest::new(Name::from_uri("/back").unwrap()).encode();
            sock.write_all(&wire).await.unwrap();
            sock.readable().await.ok();
        });

        let mut connector = LocalConnector::connect(&addr).await.unwrap();
        connector.set_retry_schedule(Duration::from_millis(10), Duration::from_secs(5));

        // The dropped link shows up as a reconnect, then traffic resumes.
        assert_eq!(connector.recv().await.unwrap(), ConnectorEvent::Reconnected);
        match connector.recv().await.unwrap() {
            ConnectorEvent::Message(msg) => {
                let i = Interest::decode(&msg).unwrap();
                assert_eq!(i.name, Name::from_uri("/back").unwrap());
            }
            other => panic!("expected message, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_link_down_after_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Accept once, then let the listener die so reconnects can't land.
        let accept = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            sock
        });

        let mut connector = LocalConnector::connect(&addr).await.unwrap();
        connector.set_retry_schedule(Duration::from_millis(10), Duration::from_millis(100));

        let peer = accept.await.unwrap();
        drop(peer); // server side gone; reconnection window must elapse

        let r = connector.recv().await;
        assert!(matches!(r, Err(Error::LinkDown)));
    }
}
