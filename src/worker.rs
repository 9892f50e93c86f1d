//! The forwarder worker: owns the PIT/CS shard and serializes all
//! data-plane and management work for its faces.
//!
//! Connections feed packets in over a channel; the worker runs the
//! forwarding node and pushes output frames to per-face writer channels.
//! Cross-worker sharing is by this sharded dispatch, not locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, Notify};

use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::hasher::hash_prefixes;
use rust_ccnx_common::mgmt::{ConnectionInfo, Reply, Request, RouteInfo, valid_symbolic};
use rust_ccnx_common::name::Name;
use rust_ccnx_common::packet::{decode_control, encode_control};
use rust_ccnx_common::tlv::{PKT_TYPE_CONTROL_REPLY, PKT_TYPE_CONTROL_REQUEST};
use rust_ccnx_fwd::node::{process_packet, ForwarderState, Shard, Verdict};

pub enum WorkerMsg {
    /// A frame arrived on a face.
    Packet { face: u16, bytes: Bytes },
    /// A connection came up; register it and hand back a face id.
    NewFace {
        local: SocketAddr,
        remote: SocketAddr,
        out: mpsc::Sender<Bytes>,
        reply: oneshot::Sender<Result<u16>>,
    },
    /// A connection went away.
    FaceClosed { face: u16 },
    /// Associate a symbolic name with a dialed face.
    RegisterSymbolic { symbolic: String, face: u16 },
    /// Deliver a deferred management reply to a face.
    SendReply { face: u16, reply: Reply },
    /// The coarse clock advanced.
    Tick { ms: u64 },
}

/// Asks the dial/listen helpers in main to do socket work the worker
/// cannot block on.
pub enum SideTask {
    Dial {
        symbolic: String,
        remote: String,
        requester: u16,
    },
    Listen {
        symbolic: String,
        local: String,
        requester: u16,
    },
}

pub struct Worker {
    state: ForwarderState,
    shard: Shard,
    outputs: HashMap<u16, mpsc::Sender<Bytes>>,
    symbolics: HashMap<String, u16>,
    started: Instant,
    side_tx: mpsc::Sender<SideTask>,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(
        state: ForwarderState,
        shard: Shard,
        side_tx: mpsc::Sender<SideTask>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            state,
            shard,
            outputs: HashMap::new(),
            symbolics: HashMap::new(),
            started: Instant::now(),
            side_tx,
            shutdown,
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMsg>) {
        while let Some(msg) = rx.recv().await {
            // Frame boundary: observe config changes before the work.
            self.shard.observe_generation(&self.state);
            match msg {
                WorkerMsg::Packet { face, bytes } => self.handle_packet(face, bytes).await,
                WorkerMsg::NewFace {
                    local,
                    remote,
                    out,
                    reply,
                } => {
                    let result = self.state.faces.add(local, remote, true);
                    if let Ok(face) = result {
                        self.outputs.insert(face, out);
                        info!("face {} up: {} -> {}", face, local, remote);
                    }
                    let _ = reply.send(result);
                }
                WorkerMsg::FaceClosed { face } => self.close_face(face),
                WorkerMsg::RegisterSymbolic { symbolic, face } => {
                    self.symbolics.insert(symbolic, face);
                }
                WorkerMsg::SendReply { face, reply } => self.send_reply(face, &reply).await,
                WorkerMsg::Tick { ms } => self.tick(ms),
            }
        }
    }

    fn tick(&mut self, ms: u64) {
        self.state.clock.advance(ms);
        let (pit_expired, cs_expired) = self.shard.pcs.expire_sweep(&self.state.clock);
        if pit_expired > 0 || cs_expired > 0 {
            debug!("expiry sweep: {} pit, {} cs", pit_expired, cs_expired);
            self.shard.metrics.pit_expired.add(pit_expired as u64);
            self.shard.metrics.cs_expired.add(cs_expired as u64);
        }
    }

    fn close_face(&mut self, face: u16) {
        if self.state.faces.remove(face).is_ok() {
            info!("face {} down", face);
        }
        self.outputs.remove(&face);
        self.symbolics.retain(|_, &mut f| f != face);
        let purged = self.state.fib.purge_face(face);
        if purged > 0 {
            debug!("purged {} routes via face {}", purged, face);
        }
        self.state.bump_generation();
    }

    async fn handle_packet(&mut self, face: u16, bytes: Bytes) {
        if bytes.len() >= 2 && bytes[1] == PKT_TYPE_CONTROL_REQUEST {
            self.handle_control(face, bytes).await;
            return;
        }

        let now = self.now_ms();
        match process_packet(&mut self.state, &mut self.shard, face, bytes, now) {
            Verdict::Forward { faces, pkt } => {
                for f in faces {
                    self.emit(f, pkt.clone()).await;
                }
            }
            Verdict::Reply { face, pkt } => self.emit(face, pkt).await,
            Verdict::Aggregated | Verdict::Drop(_) => {}
        }
    }

    async fn emit(&mut self, face: u16, pkt: Bytes) {
        if let Some(tx) = self.outputs.get(&face) {
            if tx.send(pkt).await.is_err() {
                warn!("output channel for face {} closed", face);
            }
        }
    }

    async fn send_reply(&mut self, face: u16, reply: &Reply) {
        let body = match serde_json::to_vec(reply) {
            Ok(b) => b,
            Err(e) => {
                warn!("unencodable reply: {}", e);
                return;
            }
        };
        let pkt = encode_control(PKT_TYPE_CONTROL_REPLY, &body);
        self.emit(face, pkt).await;
    }

    async fn handle_control(&mut self, face: u16, bytes: Bytes) {
        let request = decode_control(&bytes)
            .and_then(|body| {
                serde_json::from_slice::<Request>(&body)
                    .map_err(|e| Error::InvalidPacket(e.to_string()))
            });
        let request = match request {
            Ok(r) => r,
            Err(e) => {
                self.send_reply(
                    face,
                    &Reply::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                return;
            }
        };

        debug!("face {} control: {:?}", face, request);
        match self.apply_request(face, request).await {
            Some(reply) => self.send_reply(face, &reply).await,
            None => {} // deferred; a side task will reply
        }
    }

    /// Executes a management request. `None` means the reply is deferred
    /// to a side task (dial/listen).
    async fn apply_request(&mut self, face: u16, request: Request) -> Option<Reply> {
        let reply = match request {
            Request::AddConnection { symbolic, remote } => {
                if !valid_symbolic(&symbolic) {
                    err("invalid symbolic name")
                } else if self.symbolics.contains_key(&symbolic) {
                    err("symbolic name already in use")
                } else {
                    let task = SideTask::Dial {
                        symbolic,
                        remote,
                        requester: face,
                    };
                    if self.side_tx.send(task).await.is_err() {
                        err("dialer unavailable")
                    } else {
                        return None;
                    }
                }
            }
            Request::AddListener { symbolic, local } => {
                if !valid_symbolic(&symbolic) {
                    err("invalid symbolic name")
                } else if self.symbolics.contains_key(&symbolic) {
                    err("symbolic name already in use")
                } else {
                    let task = SideTask::Listen {
                        symbolic,
                        local,
                        requester: face,
                    };
                    if self.side_tx.send(task).await.is_err() {
                        err("listener helper unavailable")
                    } else {
                        return None;
                    }
                }
            }
            Request::AddRoute {
                prefix,
                nexthop,
                weight,
            } => self.add_route(face, &prefix, &nexthop, weight),
            Request::RemoveRoute { prefix, nexthop } => {
                self.remove_route(face, &prefix, &nexthop)
            }
            Request::RemoveConnection { symbolic } => {
                match self.symbolics.get(&symbolic).copied() {
                    Some(victim) => {
                        self.close_face(victim);
                        Reply::Ok
                    }
                    None => err("unknown connection"),
                }
            }
            Request::ListConnections => {
                let symbolics = &self.symbolics;
                let items = self
                    .state
                    .faces
                    .iter()
                    .map(|f| {
                        let symbolic = symbolics
                            .iter()
                            .find(|(_, &id)| id == f.id)
                            .map(|(name, _)| name.clone())
                            .unwrap_or_default();
                        serde_json::to_value(ConnectionInfo {
                            symbolic,
                            face_id: f.id,
                            local: f.local.to_string(),
                            remote: f.remote.to_string(),
                            up: f.is_up(),
                        })
                        .unwrap_or_default()
                    })
                    .collect();
                Reply::List { items }
            }
            Request::ListInterfaces => {
                let ids: Vec<u16> = self.state.faces.iter().map(|f| f.id).collect();
                let items = ids
                    .into_iter()
                    .filter_map(|id| {
                        let stats = self.state.faces.stats_aggregate(id).ok()?;
                        let mut v = serde_json::to_value(stats).ok()?;
                        if let Some(map) = v.as_object_mut() {
                            map.insert("face_id".into(), id.into());
                        }
                        Some(v)
                    })
                    .collect();
                Reply::List { items }
            }
            Request::ListRoutes => {
                let mut items = Vec::new();
                for (key, entry) in self.state.fib.entries() {
                    let prefix = match Name::decode_components(Bytes::from(key)) {
                        Ok(name) => name.to_string(),
                        Err(_) => continue,
                    };
                    for nh in entry.next_hops.iter().filter(|nh| nh.face != 0) {
                        if let Ok(v) = serde_json::to_value(RouteInfo {
                            prefix: prefix.clone(),
                            face_id: nh.face,
                            weight: nh.weight,
                        }) {
                            items.push(v);
                        }
                    }
                }
                Reply::List { items }
            }
            Request::SetDebug => {
                log::set_max_level(log::LevelFilter::Debug);
                Reply::Ok
            }
            Request::UnsetDebug => {
                log::set_max_level(log::LevelFilter::Info);
                Reply::Ok
            }
            Request::CacheServe { on } => {
                self.state.cs_serve = on;
                self.state.bump_generation();
                Reply::Ok
            }
            Request::CacheStore { on } => {
                self.state.cs_store = on;
                self.state.bump_generation();
                Reply::Ok
            }
            Request::Quit => {
                info!("quit requested by face {}", face);
                // notify_one stores a permit, so the signal is not lost
                // even if the main task has not reached its wait yet.
                self.shutdown.notify_one();
                Reply::Ok
            }
        };
        Some(reply)
    }

    fn resolve_nexthop(&self, requester: u16, nexthop: &str) -> Result<u16> {
        if nexthop == "self" {
            return Ok(requester);
        }
        if let Ok(id) = nexthop.parse::<u16>() {
            self.state.faces.find_by_id(id)?;
            return Ok(id);
        }
        self.symbolics
            .get(nexthop)
            .copied()
            .ok_or(Error::NotFound)
    }

    fn add_route(&mut self, requester: u16, prefix: &str, nexthop: &str, weight: u8) -> Reply {
        let outcome = (|| -> Result<()> {
            let face = self.resolve_nexthop(requester, nexthop)?;
            let name = Name::from_uri(prefix)?;
            let pfx = hash_prefixes(&name.to_component_bytes(), false, 0)?;
            self.state.fib.insert_next_hop(&pfx, face, weight)?;
            self.state.faces.fib_nh_ref_update(face, true)?;
            self.state.bump_generation();
            Ok(())
        })();
        match outcome {
            Ok(()) => Reply::Ok,
            Err(e) => err(&e.to_string()),
        }
    }

    fn remove_route(&mut self, requester: u16, prefix: &str, nexthop: &str) -> Reply {
        let outcome = (|| -> Result<()> {
            let face = self.resolve_nexthop(requester, nexthop)?;
            let name = Name::from_uri(prefix)?;
            let pfx = hash_prefixes(&name.to_component_bytes(), false, 0)?;
            self.state.fib.delete_next_hop(&pfx, face)?;
            self.state.faces.fib_nh_ref_update(face, false)?;
            self.state.bump_generation();
            Ok(())
        })();
        match outcome {
            Ok(()) => Reply::Ok,
            Err(e) => err(&e.to_string()),
        }
    }
}

fn err(message: &str) -> Reply {
    Reply::Error {
        message: message.to_string(),
    }
}
