//! Consumer download through the forwarder.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use rust_ccnx_common::name::Name;
use rust_ccnx_transport::raaqm_config::RaaqmConfig;
use rust_ccnx_transport::{ConsumerCallbacks, ConsumerSocket, ProtocolKind};

/// Downloads a named object and writes the payload out.
pub async fn fetch(
    forwarder: &str,
    name: &str,
    output: Option<PathBuf>,
    protocol: &str,
    config: Option<PathBuf>,
) -> Result<()> {
    let kind = match protocol {
        "vegas" => ProtocolKind::Vegas,
        "raaqm" => ProtocolKind::Raaqm,
        other => bail!("unknown protocol '{}': expected raaqm or vegas", other),
    };
    let name = Name::from_uri(name).map_err(|e| anyhow!("bad name: {}", e))?;

    let mut socket = ConsumerSocket::connect(forwarder, kind)
        .await
        .with_context(|| format!("connecting to forwarder at {}", forwarder))?;
    if let Some(path) = config {
        socket.raaqm_config = RaaqmConfig::load(&path)?;
    }

    let payload = socket
        .consume(name, ConsumerCallbacks::default())
        .await
        .context("download failed")?;

    match output {
        Some(path) => {
            std::fs::write(&path, &payload)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("wrote {} bytes to {}", payload.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&payload)?;
        }
    }
    Ok(())
}
