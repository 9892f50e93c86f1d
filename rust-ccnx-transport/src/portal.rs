//! Portal: the consumer/producer endpoint over the local connector.
//!
//! Single-threaded cooperative: one owner drives `next_event`, which
//! multiplexes the socket with the pending-interest timers. Data dispatch
//! cancels the timer (by removing the registry entry) before the event is
//! surfaced, so a timeout can never fire for an interest whose data was
//! already delivered; each submitted interest yields exactly one of
//! data or timeout.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace};
use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::mgmt;
use rust_ccnx_common::name::Name;
use rust_ccnx_common::packet::{nak_code, parse_packet, ContentObject, Interest};
use rust_ccnx_common::tlv::{self, NakCode};
use tokio::time::{sleep_until, Instant};

use crate::connector::{ConnectorEvent, LocalConnector};
use crate::vegas::DEFAULT_INTEREST_LIFETIME_MS;

/// One outstanding interest: at most one per name.
struct PendingInterest {
    interest: Interest,
    deadline: Instant,
}

#[derive(Debug)]
pub enum PortalEvent {
    /// Data matching a pending interest.
    Data(ContentObject),
    /// A pending interest expired unanswered.
    Timeout(Name),
    /// A NAK arrived for a pending interest.
    Nak(Name, Option<NakCode>),
    /// Producer side: an interest under a bound prefix.
    Interest(Interest),
    /// Body of a control reply.
    ControlReply(Bytes),
}

pub struct Portal {
    connector: LocalConnector,
    pending: HashMap<Name, PendingInterest>,
    served: Vec<Name>,
    running: bool,
}

impl Portal {
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self {
            connector: LocalConnector::connect(addr).await?,
            pending: HashMap::new(),
            served: Vec::new(),
            running: true,
        })
    }

    pub fn connector_mut(&mut self) -> &mut LocalConnector {
        &mut self.connector
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends an interest and registers it as pending. A duplicate name
    /// replaces the previous registration (at most one outstanding per
    /// name; the forwarder coalesces duplicates, not the portal).
    pub async fn send_interest(&mut self, interest: Interest) -> Result<()> {
        let wire = interest.encode();
        self.connector.send(&wire).await?;

        let lifetime = interest
            .lifetime_ms
            .unwrap_or(DEFAULT_INTEREST_LIFETIME_MS);
        let deadline = Instant::now() + Duration::from_millis(lifetime);
        trace!("pending interest {} for {} ms", interest.name, lifetime);
        self.pending.insert(
            interest.name.clone(),
            PendingInterest { interest, deadline },
        );
        Ok(())
    }

    /// Producer side: announce a served prefix to the forwarder. Bound
    /// prefixes are re-announced automatically after a reconnect.
    pub async fn bind(&mut self, name: Name) -> Result<()> {
        let request = mgmt::Request::AddRoute {
            prefix: name.to_string(),
            nexthop: "self".to_string(),
            weight: 16,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let pkt = rust_ccnx_common::packet::encode_control(tlv::PKT_TYPE_CONTROL_REQUEST, &body);
        self.connector.send(&pkt).await?;
        if !self.served.contains(&name) {
            self.served.push(name);
        }
        Ok(())
    }

    pub async fn send_content(&mut self, content: &ContentObject) -> Result<()> {
        let wire = content.encode();
        self.connector.send(&wire).await?;
        Ok(())
    }

    /// Sends a control request (management clients).
    pub async fn send_control(&mut self, body: &[u8]) -> Result<()> {
        let pkt = rust_ccnx_common::packet::encode_control(tlv::PKT_TYPE_CONTROL_REQUEST, body);
        self.connector.send(&pkt).await?;
        Ok(())
    }

    /// Waits for the next portal event. Returns `None` once stopped.
    pub async fn next_event(&mut self) -> Result<Option<PortalEvent>> {
        loop {
            if !self.running {
                return Ok(None);
            }

            // The earliest pending deadline arms the timer branch.
            let next_deadline = self.pending.values().map(|p| p.deadline).min();

            tokio::select! {
                event = self.connector.recv() => match event? {
                    ConnectorEvent::Message(msg) => {
                        if !self.running {
                            return Ok(None);
                        }
                        if let Some(event) = self.dispatch(msg)? {
                            return Ok(Some(event));
                        }
                    }
                    ConnectorEvent::Reconnected => {
                        self.rebind().await?;
                    }
                },
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() =>
                {
                    if let Some(name) = self.take_expired() {
                        return Ok(Some(PortalEvent::Timeout(name)));
                    }
                }
            }
        }
    }

    /// Synchronous stop: clears the pending map and suppresses any
    /// still-queued events. Call from the loop's own task.
    pub fn stop(&mut self) {
        self.running = false;
        self.pending.clear();
    }

    /// Drops all pending interests without stopping the portal.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub async fn close(&mut self) {
        self.stop();
        self.connector.close().await;
    }

    fn take_expired(&mut self) -> Option<Name> {
        let now = Instant::now();
        let name = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(name, _)| name.clone())
            .next()?;
        self.pending.remove(&name);
        Some(name)
    }

    fn dispatch(&mut self, msg: Bytes) -> Result<Option<PortalEvent>> {
        let parsed = match parse_packet(&msg) {
            Ok(p) => p,
            Err(e) => {
                debug!("dropping malformed message: {}", e);
                return Ok(None);
            }
        };

        match parsed.hdr.pkt_type {
            tlv::PKT_TYPE_CONTENT => {
                let content = match ContentObject::decode(&msg) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!("bad content object: {}", e);
                        return Ok(None);
                    }
                };
                // Cancel the timer before surfacing the data: removal is
                // the cancellation, making delivery at-most-once.
                if self.pending.remove(&content.name).is_some() {
                    return Ok(Some(PortalEvent::Data(content)));
                }
                trace!("unsolicited content for {}", content.name);
                Ok(None)
            }
            tlv::PKT_TYPE_INTEREST => {
                let interest = match Interest::decode(&msg) {
                    Ok(i) => i,
                    Err(e) => {
                        debug!("bad interest: {}", e);
                        return Ok(None);
                    }
                };
                if self.served.iter().any(|p| p.is_prefix_of(&interest.name)) {
                    return Ok(Some(PortalEvent::Interest(interest)));
                }
                Ok(None)
            }
            tlv::PKT_TYPE_NAK => {
                let code = nak_code(&parsed);
                let mut name_bytes =
                    msg.slice(parsed.name_offset..parsed.name_offset + parsed.name_len);
                let name = Name::decode(&mut name_bytes)?;
                if self.pending.remove(&name).is_some() {
                    return Ok(Some(PortalEvent::Nak(name, code)));
                }
                Ok(None)
            }
            tlv::PKT_TYPE_CONTROL_REPLY => {
                let body = rust_ccnx_common::packet::decode_control(&msg)?;
                Ok(Some(PortalEvent::ControlReply(body)))
            }
            other => {
                debug!("unhandled packet type {}", other);
                Ok(None)
            }
        }
    }

    async fn rebind(&mut self) -> Result<()> {
        let served = std::mem::take(&mut self.served);
        for name in served {
            self.bind(name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::read_message;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// A forwarder stub answering each interest per a small script.
    async fn forwarder_stub(
        listener: TcpListener,
        mut respond: impl FnMut(Interest) -> Option<Bytes> + Send + 'static,
    ) {
        let (mut sock, _) = listener.accept().await.unwrap();
        loop {
            let msg = match read_message(&mut sock).await {
                Ok(m) => m,
                Err(_) => return,
            };
            let parsed = parse_packet(&msg).unwrap();
            if parsed.hdr.pkt_type != tlv::PKT_TYPE_INTEREST {
                continue;
            }
            let interest = Interest::decode(&msg).unwrap();
            if let Some(reply) = respond(interest) {
                sock.write_all(&reply).await.unwrap();
            }
        }
    }

    async fn start_stub(
        respond: impl FnMut(Interest) -> Option<Bytes> + Send + 'static,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(forwarder_stub(listener, respond));
        addr
    }

    #[tokio::test]
    async fn test_data_dispatch() {
        let addr = start_stub(|interest| {
            Some(ContentObject::new(interest.name, &b"payload"[..]).encode())
        })
        .await;

        let mut portal = Portal::connect(&addr).await.unwrap();
        let name = Name::from_uri("/test").unwrap().with_segment(0);
        portal
            .send_interest(Interest::new(name.clone()).with_lifetime(2000))
            .await
            .unwrap();

        match portal.next_event().await.unwrap() {
            Some(PortalEvent::Data(content)) => {
                assert_eq!(content.name, name);
                assert_eq!(&content.payload[..], b"payload");
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert_eq!(portal.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_exactly_one_of_data_or_timeout() {
        // The stub answers segment 0 and swallows segment 1.
        let addr = start_stub(|interest| {
            if interest.name.segment() == Some(0) {
                Some(ContentObject::new(interest.name, &b"x"[..]).encode())
            } else {
                None
            }
        })
        .await;

        let mut portal = Portal::connect(&addr).await.unwrap();
        let prefix = Name::from_uri("/once").unwrap();
        portal
            .send_interest(Interest::new(prefix.with_segment(0)).with_lifetime(5000))
            .await
            .unwrap();
        portal
            .send_interest(Interest::new(prefix.with_segment(1)).with_lifetime(100))
            .await
            .unwrap();

        let mut datas = 0;
        let mut timeouts = Vec::new();
        for _ in 0..2 {
            match portal.next_event().await.unwrap() {
                Some(PortalEvent::Data(c)) => {
                    assert_eq!(c.name.segment(), Some(0));
                    datas += 1;
                }
                Some(PortalEvent::Timeout(name)) => timeouts.push(name),
                other => panic!("unexpected: {:?}", other),
            }
        }
        // Exactly one of each; the satisfied interest never times out.
        assert_eq!(datas, 1);
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].segment(), Some(1));
        assert_eq!(portal.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_data_dispatched_once() {
        // The stub answers the same interest twice.
        let addr = start_stub(|interest| {
            let one = ContentObject::new(interest.name, &b"x"[..]).encode();
            let mut both = bytes::BytesMut::new();
            both.extend_from_slice(&one);
            both.extend_from_slice(&one);
            Some(both.freeze())
        })
        .await;

        let mut portal = Portal::connect(&addr).await.unwrap();
        let name = Name::from_uri("/dup").unwrap().with_segment(0);
        portal
            .send_interest(Interest::new(name.clone()).with_lifetime(200))
            .await
            .unwrap();

        match portal.next_event().await.unwrap() {
            Some(PortalEvent::Data(_)) => {}
            other => panic!("expected data, got {:?}", other),
        }
        // The second copy is unsolicited now; the next event is nothing
        // until some timer would fire, so probe with a short interest.
        portal
            .send_interest(
                Interest::new(Name::from_uri("/probe").unwrap().with_segment(0))
                    .with_lifetime(50),
            )
            .await
            .unwrap();
        match portal.next_event().await.unwrap() {
            Some(PortalEvent::Timeout(name)) => {
                assert_eq!(name, Name::from_uri("/probe").unwrap().with_segment(0));
            }
            other => panic!("expected probe timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nak_dispatch() {
        let addr = start_stub(|interest| {
            let wire = interest.encode();
            Some(rust_ccnx_common::packet::encode_nak(NakCode::NoRoute, &wire).unwrap())
        })
        .await;

        let mut portal = Portal::connect(&addr).await.unwrap();
        let name = Name::from_uri("/nak").unwrap().with_segment(0);
        portal
            .send_interest(Interest::new(name.clone()).with_lifetime(2000))
            .await
            .unwrap();

        match portal.next_event().await.unwrap() {
            Some(PortalEvent::Nak(n, code)) => {
                assert_eq!(n, name);
                assert_eq!(code, Some(NakCode::NoRoute));
            }
            other => panic!("expected nak, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_suppresses_events() {
        let addr = start_stub(|interest| {
            Some(ContentObject::new(interest.name, &b"x"[..]).encode())
        })
        .await;

        let mut portal = Portal::connect(&addr).await.unwrap();
        portal
            .send_interest(
                Interest::new(Name::from_uri("/s").unwrap().with_segment(0)).with_lifetime(100),
            )
            .await
            .unwrap();

        portal.stop();
        assert!(portal.next_event().await.unwrap().is_none());
        assert_eq!(portal.pending_count(), 0);
    }
}
