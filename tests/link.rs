//! End-to-end link tests over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use vpcie_link::prelude::*;
use vpcie_link::transport::{self, PacketReader, PacketWriter};

const WAIT: Duration = Duration::from_secs(5);

type Peer = (PacketReader<OwnedReadHalf>, PacketWriter<OwnedWriteHalf>);

fn config_for(addr: std::net::SocketAddr) -> LinkConfigBuilder {
    LinkConfig::builder()
        .remote_addr(addr)
        .socket_timeout(Duration::from_secs(5))
        .reconnect_backoff(Duration::from_secs(10), Duration::from_secs(30))
}

async fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("accept timed out")
        .unwrap();
    transport::split(stream)
}

/// Root complex link connected to a hand-driven peer socket.
async fn raw_peer(builder: impl FnOnce(LinkConfigBuilder) -> LinkConfigBuilder) -> (Link, Peer, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = builder(config_for(listener.local_addr().unwrap())).build().unwrap();
    let link = Link::new(0, config);

    link.connect().await.unwrap();
    let peer = accept(&listener).await;
    (link, peer, listener)
}

async fn next_response(reader: &mut PacketReader<OwnedReadHalf>) -> Packet {
    loop {
        let packet = timeout(WAIT, reader.read_packet())
            .await
            .expect("peer read timed out")
            .unwrap()
            .expect("link closed the connection");
        if packet.message_type() != Some(MessageType::Keepalive) {
            return packet;
        }
    }
}

async fn wait_for_state(link: &Link, state: LinkState) {
    let mut rx = link.subscribe_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("link never reached {state:?}"))
        .unwrap();
}

#[tokio::test]
async fn test_handshake_establishes_session() {
    let (link, (mut reader, mut writer), _listener) = raw_peer(|b| b).await;
    assert_eq!(link.state(), LinkState::Handshaking);
    assert_eq!(link.role(), Role::RootComplex);
    assert!(link.is_connected());

    writer.write_packet(&Packet::handshake(42, 1)).await.unwrap();
    wait_for_state(&link, LinkState::Established).await;
    assert_eq!(link.session_id(), 42);
    assert_eq!(link.session().handshake(), Handshake::Complete(0));

    let ack = next_response(&mut reader).await;
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.seq_num(), 1);
    assert_eq!(ack.header.session_id, 42);

    link.disconnect().await;
}

#[tokio::test]
async fn test_peer_config_write_then_read() {
    let (link, (mut reader, mut writer), _listener) = raw_peer(|b| b).await;
    writer.write_packet(&Packet::handshake(7, 1)).await.unwrap();
    next_response(&mut reader).await;

    let data: Vec<u8> = (0x10..0x20).collect();
    writer
        .write_packet(&Packet::request(MessageType::ConfigWrite, 7, 2, 0, data.clone()))
        .await
        .unwrap();
    let ack = next_response(&mut reader).await;
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.seq_num(), 2);

    writer
        .write_packet(&Packet::read_request(MessageType::ConfigRead, 7, 3, 0, 16))
        .await
        .unwrap();
    let ack = next_response(&mut reader).await;
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.seq_num(), 3);
    assert_eq!(ack.payload, data);

    let mut local = [0u8; 16];
    link.space().config_read(0, &mut local).unwrap();
    assert_eq!(local.to_vec(), data);

    link.disconnect().await;
}

#[tokio::test]
async fn test_mem_read_outside_bars_is_nacked() {
    let (link, (mut reader, mut writer), _listener) = raw_peer(|b| b).await;
    link.space().bar_map(0, 0x1000, 0x100, BarKind::Memory).unwrap();

    writer
        .write_packet(&Packet::read_request(MessageType::MemRead, 0, 9, 0x5000, 4))
        .await
        .unwrap();
    let nack = next_response(&mut reader).await;
    assert_eq!(nack.message_type(), Some(MessageType::Nack));
    assert_eq!(nack.seq_num(), 9);
    assert_eq!(nack.nack_code(), Some(ErrorCode::NoSuchAddress));
    assert_eq!(link.stats().errors, 0);

    link.disconnect().await;
}

#[tokio::test]
async fn test_bad_magic_and_oversized_keep_stream_in_sync() {
    let (link, (mut reader, mut writer), _listener) = raw_peer(|b| b).await;

    let mut bad = Packet::request(MessageType::ConfigWrite, 0, 4, 0, vec![0xFF; 4]);
    bad.header.magic = 0x1234_5678;
    writer.write_packet(&bad).await.unwrap();
    let nack = next_response(&mut reader).await;
    assert_eq!(nack.nack_code(), Some(ErrorCode::Malformed));
    assert_eq!(nack.seq_num(), 4);

    let mut huge = Packet::request(MessageType::MemWrite, 0, 5, 0, vec![0xAA; MAX_PAYLOAD + 8]);
    huge.header.length = (MAX_PAYLOAD + 8) as u32;
    writer.write_packet(&huge).await.unwrap();
    let nack = next_response(&mut reader).await;
    assert_eq!(nack.nack_code(), Some(ErrorCode::Malformed));
    assert_eq!(nack.seq_num(), 5);

    writer
        .write_packet(&Packet::read_request(MessageType::ConfigRead, 0, 6, 0, 4))
        .await
        .unwrap();
    let ack = next_response(&mut reader).await;
    assert_eq!(ack.seq_num(), 6);
    assert_eq!(ack.payload, vec![0; 4]);

    assert!(link.is_connected());
    assert_eq!(link.stats().errors, 2);
    link.disconnect().await;
}

#[tokio::test]
async fn test_keepalives_carry_fresh_sequence_numbers() {
    let (link, (mut reader, _writer), _listener) =
        raw_peer(|b| b.keepalive_interval(Duration::from_millis(50))).await;

    let mut seqs = Vec::new();
    while seqs.len() < 3 {
        let packet = timeout(WAIT, reader.read_packet()).await.unwrap().unwrap().unwrap();
        assert_eq!(packet.message_type(), Some(MessageType::Keepalive));
        assert!(packet.payload.is_empty());
        seqs.push(packet.seq_num());
    }
    assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    assert!(link.stats().tx_packets >= 2);

    link.disconnect().await;
}

#[tokio::test]
async fn test_orderly_close_schedules_one_reconnect() {
    let (link, peer, listener) = raw_peer(|b| b).await;
    drop(listener);
    drop(peer);

    wait_for_state(&link, LinkState::Reconnecting).await;
    assert!(!link.is_connected());
    assert_eq!(link.stats().reconnects, 1);

    link.disconnect().await;
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(link.stats().reconnects, 1);
}

#[tokio::test]
async fn test_reconnect_after_peer_reset() {
    let (link, peer, listener) = raw_peer(|b| {
        b.reconnect_backoff(Duration::from_millis(20), Duration::from_millis(200))
    })
    .await;
    drop(peer);

    let (mut reader, mut writer) = accept(&listener).await;
    writer.write_packet(&Packet::handshake(99, 1)).await.unwrap();
    next_response(&mut reader).await;

    wait_for_state(&link, LinkState::Established).await;
    assert_eq!(link.session_id(), 99);
    assert_eq!(link.stats().reconnects, 1);

    link.disconnect().await;
}

#[tokio::test]
async fn test_explicit_disconnect_does_not_reconnect() {
    let (link, _peer, listener) = raw_peer(|b| {
        b.reconnect_backoff(Duration::from_millis(10), Duration::from_millis(20))
    })
    .await;

    link.disconnect().await;
    assert_eq!(link.role(), Role::None);
    assert!(!link.is_connected());

    let second = timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(second.is_err(), "link dialled again after disconnect");
    assert_eq!(link.stats().reconnects, 0);
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let (link, _peer, _listener) = raw_peer(|b| b.socket_timeout(Duration::from_millis(200))).await;

    let err = link.remote_config_read(0, 4).await.unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error: {err}");
    assert!(link.stats().timeouts >= 1);

    link.disconnect().await;
}

/// Endpoint and root complex links talking to each other.
async fn linked_pair(irq: Option<Arc<dyn IrqSink>>) -> (Link, Link) {
    let endpoint_config = LinkConfig::builder().local_port(0).build().unwrap();
    let endpoint = match irq {
        Some(sink) => Link::with_irq_sink(1, endpoint_config, sink),
        None => Link::new(1, endpoint_config),
    };
    assert!(endpoint.set_role(Role::Endpoint));
    let port = endpoint.listen().await.unwrap().port();

    let accepting = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.connect().await })
    };

    let root = Link::new(
        0,
        config_for(([127, 0, 0, 1], port).into()).build().unwrap(),
    );
    root.connect().await.unwrap();
    timeout(WAIT, accepting).await.unwrap().unwrap().unwrap();

    wait_for_state(&root, LinkState::Established).await;
    (endpoint, root)
}

#[tokio::test]
async fn test_endpoint_assigns_session_id() {
    let (endpoint, root) = linked_pair(None).await;

    assert_eq!(endpoint.role(), Role::Endpoint);
    assert_eq!(endpoint.state(), LinkState::Established);
    assert_ne!(endpoint.session_id(), 0);
    assert_eq!(root.session_id(), endpoint.session_id());

    root.disconnect().await;
    endpoint.disconnect().await;
}

#[tokio::test]
async fn test_remote_accesses_hit_endpoint_space() {
    let (endpoint, root) = linked_pair(None).await;
    endpoint
        .space()
        .bar_map(2, 0xC000_0000, 0x1000, BarKind::Memory)
        .unwrap();

    let data: Vec<u8> = (0..16).collect();
    root.remote_config_write(0, &data).await.unwrap();
    assert_eq!(root.remote_config_read(0, 16).await.unwrap(), data);

    root.remote_mem_write(0xC000_0100, &[0xAA, 0xBB]).await.unwrap();
    assert_eq!(root.remote_mem_read(0xC000_0100, 2).await.unwrap(), vec![0xAA, 0xBB]);

    let mut local = [0u8; 2];
    endpoint.space().mem_read(0xC000_0100, &mut local).unwrap();
    assert_eq!(local, [0xAA, 0xBB]);

    let err = root.remote_mem_read(0xD000_0000, 4).await.unwrap_err();
    assert!(matches!(err, LinkError::Remote(ErrorCode::NoSuchAddress)));
    let err = root.remote_config_read(4094, 4).await.unwrap_err();
    assert!(matches!(err, LinkError::Remote(ErrorCode::OutOfRange)));

    assert_eq!(root.stats().errors, 2);
    assert_eq!(endpoint.stats().errors, 0);

    root.disconnect().await;
    endpoint.disconnect().await;
}

#[tokio::test]
async fn test_irq_delivery_and_reverse_requests() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn IrqSink> = Arc::new(move |irq: u32| {
        let _ = tx.send(irq);
    });
    let (endpoint, root) = linked_pair(Some(sink)).await;

    root.raise_irq(11).await.unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(11));

    root.space().config_write(0x40, &[1, 2, 3, 4]).unwrap();
    assert_eq!(
        endpoint.remote_config_read(0x40, 4).await.unwrap(),
        vec![1, 2, 3, 4]
    );

    root.disconnect().await;
    endpoint.disconnect().await;
}

#[tokio::test]
async fn test_loopback_self_test() {
    let registry = Registry::new();
    let config = LinkConfig::builder().loopback(true).build().unwrap();
    let id = registry.attach(config).unwrap();

    registry.control(id, Command::Connect).await.unwrap();
    let link = registry.get(id).unwrap();
    assert_eq!(link.role(), Role::Loopback);

    link.space().bar_map(0, 0, 0x100, BarKind::Io).unwrap();
    link.remote_mem_write(0x10, &[5, 6, 7]).await.unwrap();
    assert_eq!(link.remote_mem_read(0x10, 3).await.unwrap(), vec![5, 6, 7]);

    registry.detach(id).await.unwrap();
    assert!(!link.is_connected());
    assert_eq!(link.space().mapped_count(), 0);
}
