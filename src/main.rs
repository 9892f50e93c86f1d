//! ccnxd: the rust-ccnx forwarder daemon.
//!
//! One TCP listener accepts both data-plane clients (consumers and
//! producers speaking the portal framing) and management clients; every
//! accepted connection becomes a face. A single worker task owns the
//! PIT/CS and FIB, a tick task drives the coarse expiry clock, and small
//! side tasks handle the socket work (dialing peers, extra listeners)
//! the worker must not block on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};

use rust_ccnx_common::mgmt::Reply;
use rust_ccnx_fwd::face::FaceDb;
use rust_ccnx_fwd::fib::Fib;
use rust_ccnx_fwd::node::{ForwarderState, Shard};
use rust_ccnx_fwd::pcs::PitCs;
use rust_ccnx_transport::message::read_message;

mod settings;
mod worker;

use settings::Settings;
use worker::{SideTask, Worker, WorkerMsg};

/// rust-ccnx forwarder daemon
#[derive(Parser)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[clap(short, long)]
    listen: Option<String>,

    /// Sets the level of verbosity
    #[clap(short, long)]
    verbose: bool,
}

const TICK_MS: u64 = 1000;
const FACE_OUTPUT_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }
    info!("ccnxd starting on {}", settings.listen);

    let fib = Fib::new(settings.fib_size).context("allocating FIB")?;
    let faces = FaceDb::new(1);
    let mut state = ForwarderState::new(fib, faces);
    state.cs_serve = settings.cs_serve;
    state.cs_store = settings.cs_store;
    state.pit_lifetime_min_ms = settings.pit_lifetime_min_ms;
    state.pit_lifetime_dflt_ms = settings.pit_lifetime_dflt_ms;
    state.pit_lifetime_max_ms = settings.pit_lifetime_max_ms;

    let mut pcs = PitCs::new(settings.pit_size).context("allocating PIT/CS")?;
    pcs.set_lru_max(settings.cs_lru_max);
    let shard = Shard::new(0, pcs);

    let shutdown = Arc::new(Notify::new());
    let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>(4096);
    let (side_tx, side_rx) = mpsc::channel::<SideTask>(64);

    let worker = Worker::new(state, shard, side_tx, shutdown.clone());
    tokio::spawn(worker.run(worker_rx));

    // Coarse clock.
    {
        let tick_tx = worker_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
            interval.tick().await; // immediate first tick carries no time
            loop {
                interval.tick().await;
                if tick_tx.send(WorkerMsg::Tick { ms: TICK_MS }).await.is_err() {
                    return;
                }
            }
        });
    }

    // Socket side-work on behalf of the worker.
    tokio::spawn(side_task_loop(side_rx, worker_tx.clone()));

    // Main listener.
    let listener = TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    tokio::spawn(accept_loop(listener, worker_tx.clone()));

    // Run until a Quit command or SIGINT.
    tokio::select! {
        _ = shutdown.notified() => info!("shutting down on request"),
        _ = tokio::signal::ctrl_c() => info!("shutting down on signal"),
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, worker_tx: mpsc::Sender<WorkerMsg>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted {}", peer);
                if let Err(e) = register_connection(stream, &worker_tx).await {
                    warn!("failed to register {}: {}", peer, e);
                }
            }
            Err(e) => {
                error!("accept failed: {}", e);
                return;
            }
        }
    }
}

/// Registers a connection as a face and spawns its reader and writer.
async fn register_connection(
    stream: TcpStream,
    worker_tx: &mpsc::Sender<WorkerMsg>,
) -> Result<u16> {
    stream.set_nodelay(true).ok();
    let local = stream.local_addr()?;
    let remote = stream.peer_addr()?;

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(FACE_OUTPUT_DEPTH);
    let (reply_tx, reply_rx) = oneshot::channel();
    worker_tx
        .send(WorkerMsg::NewFace {
            local,
            remote,
            out: out_tx,
            reply: reply_tx,
        })
        .await
        .ok();
    let face = reply_rx
        .await
        .context("worker gone")?
        .context("face registration refused")?;

    let (mut read_half, mut write_half) = stream.into_split();

    // Writer: frames queued by the worker go out in order.
    tokio::spawn(async move {
        while let Some(pkt) = out_rx.recv().await {
            if write_half.write_all(&pkt).await.is_err() {
                return;
            }
        }
    });

    // Reader: every inbound frame goes to the worker; EOF closes the face.
    let reader_tx = worker_tx.clone();
    tokio::spawn(async move {
        loop {
            match read_message(&mut read_half).await {
                Ok(bytes) => {
                    if reader_tx
                        .send(WorkerMsg::Packet { face, bytes })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(_) => {
                    let _ = reader_tx.send(WorkerMsg::FaceClosed { face }).await;
                    return;
                }
            }
        }
    });

    Ok(face)
}

/// Dials peers and opens extra listeners on the worker's behalf,
/// reporting back through deferred management replies.
async fn side_task_loop(mut rx: mpsc::Receiver<SideTask>, worker_tx: mpsc::Sender<WorkerMsg>) {
    while let Some(task) = rx.recv().await {
        let worker_tx = worker_tx.clone();
        match task {
            SideTask::Dial {
                symbolic,
                remote,
                requester,
            } => {
                tokio::spawn(async move {
                    let reply = match dial(&remote, &worker_tx).await {
                        Ok(face) => {
                            worker_tx
                                .send(WorkerMsg::RegisterSymbolic {
                                    symbolic,
                                    face,
                                })
                                .await
                                .ok();
                            Reply::Ok
                        }
                        Err(e) => Reply::Error {
                            message: format!("dial {} failed: {:#}", remote, e),
                        },
                    };
                    worker_tx
                        .send(WorkerMsg::SendReply {
                            face: requester,
                            reply,
                        })
                        .await
                        .ok();
                });
            }
            SideTask::Listen {
                symbolic,
                local,
                requester,
            } => {
                tokio::spawn(async move {
                    let reply = match TcpListener::bind(&local).await {
                        Ok(listener) => {
                            info!("listener '{}' on {}", symbolic, local);
                            tokio::spawn(accept_loop(listener, worker_tx.clone()));
                            Reply::Ok
                        }
                        Err(e) => Reply::Error {
                            message: format!("bind {} failed: {}", local, e),
                        },
                    };
                    worker_tx
                        .send(WorkerMsg::SendReply {
                            face: requester,
                            reply,
                        })
                        .await
                        .ok();
                });
            }
        }
    }
}

async fn dial(remote: &str, worker_tx: &mpsc::Sender<WorkerMsg>) -> Result<u16> {
    let stream = TcpStream::connect(remote)
        .await
        .with_context(|| format!("connecting {}", remote))?;
    register_connection(stream, worker_tx).await
}
