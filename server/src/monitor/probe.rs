//! Reachability Prober
//!
//! Bounded-time TCP connect used by the poll loop, plus a best-effort
//! single-line command exchange for diagnostics.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::model::device::Device;

pub const NO_RESPONSE: &str = "No response";

/// Result of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    /// The connect attempt lost the race against the timeout.
    Unreachable,
    /// The connect attempt failed outright (DNS, refused, socket error).
    Errored(String),
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, port: u16) -> ProbeOutcome;

    /// Writes `command` as one line and returns the first line of the reply.
    /// Never fails: errors are folded into an `ERROR: ...` string.
    async fn send_command(&self, device: &Device, command: &str) -> String;
}

pub struct TcpProber {
    timeout_duration: Duration,
}

impl TcpProber {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }

    async fn connect(&self, address: &str, port: u16) -> anyhow::Result<TcpStream> {
        let stream = timeout(self.timeout_duration, TcpStream::connect((address, port)))
            .await
            .map_err(|_| anyhow!("connection timed out after {:?}", self.timeout_duration))??;
        Ok(stream)
    }

    async fn exchange(&self, device: &Device, command: &str) -> anyhow::Result<Option<String>> {
        let stream = self.connect(&device.address, device.port).await?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        let read = timeout(
            self.timeout_duration,
            BufReader::new(reader).read_line(&mut line),
        )
        .await
        .map_err(|_| anyhow!("no reply within {:?}", self.timeout_duration))??;

        if read == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, port: u16) -> ProbeOutcome {
        match timeout(self.timeout_duration, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => ProbeOutcome::Reachable,
            Ok(Err(e)) => ProbeOutcome::Errored(e.to_string()),
            Err(_) => ProbeOutcome::Unreachable,
        }
    }

    async fn send_command(&self, device: &Device, command: &str) -> String {
        match self.exchange(device, command).await {
            Ok(Some(response)) => response,
            Ok(None) => NO_RESPONSE.to_string(),
            Err(e) => {
                tracing::error!(
                    "Error sending command to device {} ({}): {:#}",
                    device.name,
                    device.endpoint(),
                    e
                );
                format!("ERROR: {e:#}")
            }
        }
    }
}
