//! Consumer socket: a portal plus a fetch protocol.
//!
//! Bundles the transport options, the callback slots, and the protocol
//! choice (vanilla or RAAQM), and drives the download loop: interests
//! queued by the protocol flow into the portal, portal events flow back
//! into the protocol, and the reassembled payload comes out the end.

use std::time::Instant;

use bytes::Bytes;
use log::debug;
use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::name::Name;
use rust_ccnx_common::packet::Interest;

use crate::portal::{Portal, PortalEvent};
use crate::raaqm::RaaqmRules;
use crate::raaqm_config::RaaqmConfig;
use crate::vegas::{
    ConsumerCallbacks, PortalSink, TransportOptions, VanillaRules, VegasTransport, WindowRules,
};

/// Which congestion-control scheme drives the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolKind {
    Vegas,
    #[default]
    Raaqm,
}

/// Buffers interests emitted by the protocol until the driver flushes
/// them into the portal.
#[derive(Default)]
pub struct QueueSink {
    pub queue: Vec<Interest>,
    pub stopped: bool,
}

impl PortalSink for QueueSink {
    fn send_interest(&mut self, interest: Interest) {
        self.queue.push(interest);
    }

    fn stop_loop(&mut self) {
        self.stopped = true;
    }
}

/// Posts a stop request into a running download from any thread. All
/// other transport state stays owned by the loop task; this is the only
/// cross-thread entry point.
#[derive(Clone)]
pub struct StopHandle {
    tx: tokio::sync::mpsc::UnboundedSender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(());
    }
}

pub struct ConsumerSocket {
    portal: Portal,
    pub options: TransportOptions,
    pub raaqm_config: RaaqmConfig,
    kind: ProtocolKind,
    stop_tx: tokio::sync::mpsc::UnboundedSender<()>,
    stop_rx: tokio::sync::mpsc::UnboundedReceiver<()>,
}

impl ConsumerSocket {
    pub async fn connect(addr: &str, kind: ProtocolKind) -> Result<Self> {
        let (stop_tx, stop_rx) = tokio::sync::mpsc::unbounded_channel();
        Ok(Self {
            portal: Portal::connect(addr).await?,
            options: TransportOptions::default(),
            raaqm_config: RaaqmConfig::default(),
            kind,
            stop_tx,
            stop_rx,
        })
    }

    pub fn portal_mut(&mut self) -> &mut Portal {
        &mut self.portal
    }

    /// A handle other tasks or threads can use to cancel a download.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Fetches all segments of `name` and returns the reassembled
    /// payload. Surfaces `Timeout` when the retransmission budget runs
    /// out before completion.
    pub async fn consume(&mut self, name: Name, callbacks: ConsumerCallbacks) -> Result<Bytes> {
        let mut options = self.options.clone();
        let rules: Box<dyn WindowRules> = match self.kind {
            ProtocolKind::Vegas => Box::<VanillaRules>::default(),
            ProtocolKind::Raaqm => {
                let rules = RaaqmRules::new(self.raaqm_config.clone());
                rules.apply_to_options(&mut options);
                Box::new(rules)
            }
        };

        // Intercept the payload callback so the driver learns about
        // completion; the user's slot still fires.
        let mut callbacks = callbacks;
        let user_payload_cb = callbacks.on_payload_retrieved.take();
        let (result_tx, mut result_rx) = tokio::sync::mpsc::unbounded_channel();
        callbacks.on_payload_retrieved = Some(Box::new(move |bytes: &[u8], complete: bool| {
            let _ = result_tx.send((Bytes::copy_from_slice(bytes), complete));
        }));

        let mut transport = VegasTransport::new(QueueSink::default(), options, rules, callbacks)?;
        transport.start(name, Instant::now());
        self.flush(&mut transport).await?;

        while transport.is_running() {
            let event = tokio::select! {
                event = self.portal.next_event() => event?,
                _ = self.stop_rx.recv() => {
                    // Posted from outside the loop: synchronous stop.
                    transport.stop();
                    break;
                }
            };
            match event {
                Some(PortalEvent::Data(content)) => {
                    transport.on_content(content, Instant::now());
                }
                Some(PortalEvent::Timeout(name)) => {
                    transport.on_timeout(&name, Instant::now());
                }
                Some(PortalEvent::Nak(name, code)) => {
                    // No route upstream reads as loss to the transport.
                    debug!("nak {:?} for {}", code, name);
                    transport.on_timeout(&name, Instant::now());
                }
                Some(_) => {}
                None => break,
            }
            self.flush(&mut transport).await?;
        }

        // The download is over one way or the other.
        self.portal.clear();
        let delivered = result_rx.try_recv().ok();
        if let Some((payload, complete)) = delivered {
            if let Some(mut cb) = user_payload_cb {
                cb(&payload, complete);
            }
            if complete {
                return Ok(payload);
            }
            return Err(Error::Timeout);
        }
        Err(Error::Timeout)
    }

    /// Pushes protocol-emitted interests into the portal.
    async fn flush(&mut self, transport: &mut VegasTransport<QueueSink>) -> Result<()> {
        let queued = std::mem::take(&mut transport.sink_mut().queue);
        for interest in queued {
            self.portal.send_interest(interest).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::read_message;
    use rust_ccnx_common::packet::{parse_packet, ContentObject};
    use rust_ccnx_common::tlv;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// A producer stub serving `total` segments of three bytes each,
    /// optionally dropping the first request for one segment.
    async fn producer_stub(listener: TcpListener, total: u64, drop_first_for: Option<u64>) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut dropped = false;
        loop {
            let msg = match read_message(&mut sock).await {
                Ok(m) => m,
                Err(_) => return,
            };
            let parsed = match parse_packet(&msg) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if parsed.hdr.pkt_type != tlv::PKT_TYPE_INTEREST {
                continue;
            }
            let interest = Interest::decode(&msg).unwrap();
            let seg = interest.name.segment().unwrap();
            if Some(seg) == drop_first_for && !dropped {
                dropped = true;
                continue;
            }
            if seg >= total {
                continue;
            }
            let payload = vec![seg as u8; 3];
            let content = ContentObject::new(interest.name, payload).with_final_chunk(total - 1);
            sock.write_all(&content.encode()).await.unwrap();
        }
    }

    async fn start_producer(total: u64, drop_first_for: Option<u64>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(producer_stub(listener, total, drop_first_for));
        addr
    }

    #[tokio::test]
    async fn test_vegas_download() {
        let addr = start_producer(5, None).await;
        let mut socket = ConsumerSocket::connect(&addr, ProtocolKind::Vegas)
            .await
            .unwrap();
        socket.options.buffer_size = 64;
        socket.options.window_max = 8.0;
        socket.options.initial_window = 2.0;

        let payload = socket
            .consume(Name::from_uri("/movie").unwrap(), ConsumerCallbacks::default())
            .await
            .unwrap();
        assert_eq!(
            &payload[..],
            &[0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]
        );
    }

    #[tokio::test]
    async fn test_raaqm_download_with_one_loss() {
        let addr = start_producer(4, Some(2)).await;
        let mut socket = ConsumerSocket::connect(&addr, ProtocolKind::Raaqm)
            .await
            .unwrap();
        socket.options.buffer_size = 64;
        socket.options.window_max = 8.0;
        socket.options.initial_window = 2.0;
        socket.raaqm_config.lifetime_ms = 150; // quick retransmit
        socket.raaqm_config.retransmissions = 8;

        let payload = socket
            .consume(Name::from_uri("/lossy").unwrap(), ConsumerCallbacks::default())
            .await
            .unwrap();
        assert_eq!(&payload[..], &[0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }

    #[tokio::test]
    async fn test_posted_stop_cancels_download() {
        // A silent producer plus a long lifetime: only the posted stop
        // can end the download, and no payload callback may fire.
        let addr = start_producer(0, None).await;
        let mut socket = ConsumerSocket::connect(&addr, ProtocolKind::Vegas)
            .await
            .unwrap();
        socket.options.buffer_size = 64;
        socket.options.window_max = 4.0;
        socket.options.initial_window = 4.0;
        socket.options.interest_lifetime_ms = 30_000;

        let handle = socket.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.stop();
        });

        let mut cb = ConsumerCallbacks::default();
        cb.on_payload_retrieved = Some(Box::new(|_, _| {
            panic!("stopped download must not deliver");
        }));
        let r = socket.consume(Name::from_uri("/halt").unwrap(), cb).await;
        assert!(matches!(r, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_unreachable_segment_times_out() {
        // The producer never serves anything.
        let addr = start_producer(0, None).await;
        let mut socket = ConsumerSocket::connect(&addr, ProtocolKind::Vegas)
            .await
            .unwrap();
        socket.options.buffer_size = 64;
        socket.options.window_max = 4.0;
        socket.options.initial_window = 4.0;
        socket.options.interest_lifetime_ms = 100;
        socket.options.max_retransmissions = 1;
        socket.options.partial_on_failure = true;

        let r = socket
            .consume(Name::from_uri("/endless").unwrap(), ConsumerCallbacks::default())
            .await;
        assert!(matches!(r, Err(Error::Timeout)));
    }
}
