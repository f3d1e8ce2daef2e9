//! Latency telemetry over UDP.
//!
//! Pipeline stages bracket their work with small plain-text datagrams so an
//! external listener can reconstruct per-stage latencies offline. Sending is
//! strictly fire-and-forget: a missing listener, a failed bind or a full
//! socket buffer never slows the pipeline down or surfaces as an error.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Port the latency listener is expected on.
pub const TELEMETRY_PORT: u16 = 7201;

/// Pipeline stage a checkpoint belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TelemetryCategory {
    /// Frame capture from one camera.
    Capture,
    /// Homography estimation for one camera pair.
    Homography,
    /// Compositing one output frame.
    Stitch,
}

impl TelemetryCategory {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "Capture",
            Self::Homography => "Homography",
            Self::Stitch => "Stitch",
        }
    }
}

/// Checkpoint within a stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TelemetryPhase {
    /// The stage started its work.
    Start,
    /// Keypoint detection finished.
    Detect,
    /// Descriptor matching finished.
    Match,
    /// The stage finished its work.
    End,
}

impl TelemetryPhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Detect => "Detect",
            Self::Match => "Match",
            Self::End => "End",
        }
    }
}

/// A handle sending `"<category> <id> <phase> <timestamp_ms>"` datagrams.
///
/// Cheap to clone, all clones share one socket.
#[derive(Clone)]
pub struct TelemetryClient {
    socket: Option<Arc<UdpSocket>>,
    target: SocketAddr,
}

impl TelemetryClient {
    /// Create a client targeting the conventional local listener port.
    pub fn new() -> Self {
        Self::with_port(TELEMETRY_PORT)
    }

    /// Create a client targeting `port` on the loopback interface.
    pub fn with_port(port: u16) -> Self {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
            Ok(socket) => {
                if let Err(e) = socket.set_nonblocking(true) {
                    log::warn!("telemetry socket left blocking: {e}");
                }
                Some(Arc::new(socket))
            }
            Err(e) => {
                log::warn!("telemetry disabled, could not bind a socket: {e}");
                None
            }
        };
        Self {
            socket,
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
        }
    }

    /// Send a checkpoint stamped with the current wall clock.
    pub fn send(&self, category: TelemetryCategory, id: usize, phase: TelemetryPhase) {
        self.send_at(category, id, phase, SystemTime::now());
    }

    /// Send a checkpoint stamped with an explicit instant, for stages that
    /// report interior checkpoints after the fact.
    pub fn send_at(
        &self,
        category: TelemetryCategory,
        id: usize,
        phase: TelemetryPhase,
        timestamp: SystemTime,
    ) {
        let Some(socket) = &self.socket else {
            return;
        };

        let millis = timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let message = format!(
            "{} {} {} {}",
            category.as_str(),
            id,
            phase.as_str(),
            millis
        );

        // Fire and forget.
        let _ = socket.send_to(message.as_bytes(), self.target);
    }
}

impl Default for TelemetryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn checkpoint_datagram_format() -> std::io::Result<()> {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_read_timeout(Some(Duration::from_secs(2)))?;
        let port = listener.local_addr()?.port();

        let client = TelemetryClient::with_port(port);
        client.send(TelemetryCategory::Capture, 2, TelemetryPhase::Start);

        let mut buf = [0u8; 128];
        let (len, _) = listener.recv_from(&mut buf)?;
        let message = std::str::from_utf8(&buf[..len]).expect("ascii datagram");

        let fields: Vec<&str> = message.split(' ').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], "Capture");
        assert_eq!(fields[1], "2");
        assert_eq!(fields[2], "Start");
        assert!(fields[3].parse::<u128>().unwrap() > 0);

        Ok(())
    }

    #[test]
    fn sending_without_a_listener_is_silent() {
        let client = TelemetryClient::with_port(1);
        client.send(TelemetryCategory::Stitch, 0, TelemetryPhase::End);
        client.send(TelemetryCategory::Homography, 1, TelemetryPhase::Match);
    }

    #[test]
    fn clones_share_the_socket() {
        let client = TelemetryClient::new();
        let clone = client.clone();
        clone.send(TelemetryCategory::Capture, 0, TelemetryPhase::Start);
    }
}
