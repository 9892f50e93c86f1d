//! One-shot management requests.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use rust_ccnx_common::mgmt::{Reply, Request};
use rust_ccnx_transport::portal::{Portal, PortalEvent};
use tokio::time::timeout;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one management request and renders the reply.
pub async fn control(forwarder: &str, request: Request) -> Result<()> {
    debug!("sending {:?}", request);
    let mut portal = Portal::connect(forwarder)
        .await
        .with_context(|| format!("connecting to forwarder at {}", forwarder))?;

    let body = serde_json::to_vec(&request)?;
    portal.send_control(&body).await?;

    let reply = timeout(CONTROL_TIMEOUT, async {
        loop {
            match portal.next_event().await? {
                Some(PortalEvent::ControlReply(body)) => {
                    return Ok::<_, anyhow::Error>(serde_json::from_slice::<Reply>(&body)?)
                }
                Some(_) => continue,
                None => bail!("portal stopped before a reply arrived"),
            }
        }
    })
    .await
    .map_err(|_| anyhow!("no reply from forwarder within {:?}", CONTROL_TIMEOUT))??;

    portal.close().await;

    match reply {
        Reply::Ok => {
            println!("ok");
            Ok(())
        }
        Reply::List { items } => {
            for item in items {
                println!("{}", serde_json::to_string(&item)?);
            }
            Ok(())
        }
        Reply::Error { message } => bail!("forwarder refused: {}", message),
    }
}
