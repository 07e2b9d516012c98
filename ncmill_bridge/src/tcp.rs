//! Newline-delimited JSON status publishing over TCP.
//!
//! One report per line to every connected consumer. Strictly
//! best-effort: a slow client is bounded by the write timeout, a dead
//! one is dropped on the next publish. The replication cadence never
//! waits on the network beyond that timeout.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::replicator::StatusSink;
use crate::report::StatusReport;
use crate::BridgeResult;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// A listening status publisher. New consumers are accepted on each
/// publish; no dedicated accept thread.
pub struct TcpPublisher {
    listener: TcpListener,
    clients: Vec<(TcpStream, SocketAddr)>,
}

impl TcpPublisher {
    /// Bind the listening socket. Does not block afterwards.
    pub fn bind(addr: impl ToSocketAddrs) -> BridgeResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "status publisher listening");
        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Currently connected consumers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = Self::prepare(&stream) {
                        tracing::warn!(%peer, %err, "rejecting status client");
                        continue;
                    }
                    tracing::info!(%peer, "status client connected");
                    self.clients.push((stream, peer));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn prepare(stream: &TcpStream) -> std::io::Result<()> {
        // The listener is non-blocking; accepted streams must not be.
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(DEFAULT_WRITE_TIMEOUT))?;
        stream.set_nodelay(true)
    }
}

impl StatusSink for TcpPublisher {
    fn publish(&mut self, report: &StatusReport) -> BridgeResult<()> {
        self.accept_pending();
        if self.clients.is_empty() {
            return Ok(());
        }
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        self.clients.retain_mut(|(stream, peer)| {
            match stream.write_all(line.as_bytes()) {
                Ok(()) => true,
                Err(err) => {
                    tracing::info!(%peer, %err, "status client disconnected");
                    false
                }
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "tcp"
    }
}
