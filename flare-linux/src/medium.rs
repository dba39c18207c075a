//! LAN medium: every frame goes out as one UDP broadcast datagram; every datagram heard is fed to the engine.

use std::net::SocketAddr;
use std::sync::Arc;

use flare_core::{DeliveredPacket, MeshEngine, ReceiveOutcome};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

// Frames are a few dozen bytes; anything larger is not ours.
const RECV_BUF_LEN: usize = 2048;

/// Bind the shared socket on all interfaces with broadcast enabled.
pub fn make_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    std_sock.set_broadcast(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Resolve the destination for outgoing frames.
pub fn broadcast_dest(addr: &str, port: u16) -> std::io::Result<SocketAddr> {
    format!("{}:{}", addr, port)
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })
}

/// Encode a message and put each frame on the medium. Returns the number of frames sent.
pub async fn broadcast(
    engine: &MeshEngine,
    socket: &UdpSocket,
    dest: SocketAddr,
    message: &str,
) -> anyhow::Result<usize> {
    let frames = engine.send_broadcast(message)?;
    for f in &frames {
        socket.send_to(f, dest).await?;
    }
    debug!(frames = frames.len(), %dest, "broadcast sent");
    Ok(frames.len())
}

/// Feed every datagram to the engine and forward delivered packets to `delivered_tx`.
/// Returns when the socket fails or the receiver side of the channel is dropped.
pub async fn recv_loop(
    engine: Arc<MeshEngine>,
    socket: Arc<UdpSocket>,
    delivered_tx: UnboundedSender<DeliveredPacket>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        if n == 0 {
            continue;
        }
        // The medium reports no signal strength.
        match engine.receive_raw(&buf[..n], 0, &from.to_string()) {
            Ok(ReceiveOutcome::Ignored(e)) => trace!(%from, error = %e, "not a flare frame"),
            Ok(outcome) => trace!(%from, ?outcome, "frame accepted"),
            Err(e) => warn!(%from, error = %e, "receive failed"),
        }
        if !drain(&engine, &delivered_tx) {
            return Ok(());
        }
    }
}

/// Move every queued packet to the channel. False once nobody is listening.
pub fn drain(engine: &MeshEngine, delivered_tx: &UnboundedSender<DeliveredPacket>) -> bool {
    while let Some(packet) = engine.poll_packet() {
        if delivered_tx.send(packet).is_err() {
            return false;
        }
    }
    true
}

/// One line for the terminal: `[sender @ address] text`.
pub fn format_packet(packet: &DeliveredPacket) -> String {
    format!(
        "[{} @ {}] {}",
        packet.sender_id,
        packet.source_address,
        String::from_utf8_lossy(&packet.payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_core::{EngineConfig, ManualClock};
    use tokio::sync::mpsc;

    fn engine(id: &str, start: u64, loopback: bool) -> MeshEngine {
        let config = EngineConfig {
            loopback,
            ..EngineConfig::default()
        };
        MeshEngine::with_config(Some(id), config, ManualClock::new(start))
    }

    #[test]
    fn dest_parses_or_errors() {
        assert_eq!(
            broadcast_dest("10.0.0.255", 47474).unwrap(),
            "10.0.0.255:47474".parse::<SocketAddr>().unwrap()
        );
        assert!(broadcast_dest("not an address", 47474).is_err());
    }

    #[test]
    fn format_shows_sender_and_address() {
        let packet = DeliveredPacket {
            payload: b"water at the school".to_vec(),
            rssi: 0,
            source_address: "192.168.1.20:47474".into(),
            sender_id: "node-b".into(),
            received_at: 0,
        };
        assert_eq!(
            format_packet(&packet),
            "[node-b @ 192.168.1.20:47474] water at the school"
        );
    }

    #[test]
    fn drain_forwards_loopback_delivery() {
        let e = engine("node-a", 1_700_000_000, true);
        e.send_broadcast("ping").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(drain(&e, &tx));
        let p = rx.try_recv().unwrap();
        assert_eq!(p.payload, b"ping");
        drop(rx);
        e.send_broadcast("pong").unwrap();
        assert!(!drain(&e, &tx));
    }

    #[tokio::test]
    async fn frames_cross_loopback_sockets() {
        let sender = engine("node-a", 1_700_000_000, false);
        let receiver = Arc::new(engine("node-b", 1_700_100_000, false));
        let tx_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let rx_sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let dest = rx_sock.local_addr().unwrap();

        let (dtx, mut drx) = mpsc::unbounded_channel();
        let task = tokio::spawn(recv_loop(receiver.clone(), rx_sock, dtx));

        let n = broadcast(&sender, &tx_sock, dest, "need insulin, 4th floor")
            .await
            .unwrap();
        assert_eq!(n, 2);
        let p = drx.recv().await.unwrap();
        assert_eq!(p.payload, b"need insulin, 4th floor");
        assert_eq!(p.sender_id, "node-a");
        assert_eq!(p.source_address, tx_sock.local_addr().unwrap().to_string());
        assert_eq!(receiver.neighbors()[0].device_id, "node-a");
        task.abort();
    }
}
