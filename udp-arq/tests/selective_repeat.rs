//! Integration tests for the selective-repeat engine.
//!
//! Every test runs real tokio UDP sockets on loopback.  Lossy scenarios use
//! the seeded simulator so a failure reproduces; wire-level scenarios put a
//! bare `tokio::net::UdpSocket` on the other end and drive the protocol by
//! hand.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use udp_arq::packet::{Kind, Packet};
use udp_arq::state::Epoch;
use udp_arq::{
    Config, Listener, SelectiveRepeatClient, SelectiveRepeatServer, SimulatorConfig, TimerConfig,
    Transport,
};

const WAIT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(loss: f64, seed: u64) -> Config {
    let config = Config::default().with_timers(TimerConfig::fast());
    if loss > 0.0 {
        config.with_simulator(SimulatorConfig::lossy(loss, seed))
    } else {
        config
    }
}

async fn server(config: Config) -> (SelectiveRepeatServer, SocketAddr) {
    let server = SelectiveRepeatServer::new(config);
    server
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind server");
    let addr = server.local_addr().expect("bound address");
    (server, addr)
}

async fn client(config: Config, server: SocketAddr) -> SelectiveRepeatClient {
    let client = SelectiveRepeatClient::new(config);
    client.connect(server).await.expect("connect");
    client
}

/// A hand-driven peer.
async fn raw_peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = vec![0u8; 65_535];
    let (n, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("peer receive timed out")
        .unwrap();
    (Packet::decode(&buf[..n]).expect("valid packet"), from)
}

/// Collect every distinct number of one window sent in `epoch`, skipping
/// retransmissions and packets of other windows.  Returns the packets ordered
/// by number and the sender's address.
async fn take_window(socket: &UdpSocket, epoch: Epoch, size: u8) -> (Vec<Packet>, SocketAddr) {
    let mut window: Vec<Option<Packet>> = vec![None; size as usize];
    let mut sender = None;
    while window.iter().any(Option::is_none) {
        let (pkt, from) = recv_packet(socket).await;
        sender = Some(from);
        let seq = pkt.seq(epoch);
        if pkt.kind() != Kind::Data || seq == 0 || pkt.header.window != size {
            continue;
        }
        assert_eq!(pkt.seq(epoch.other()), 0, "exactly one slot in use");
        window[seq as usize - 1] = Some(pkt);
    }
    (window.into_iter().flatten().collect(), sender.unwrap())
}

/// Discard everything already queued on `socket`.
fn drain(socket: &UdpSocket) {
    let mut buf = [0u8; 4096];
    while socket.try_recv_from(&mut buf).is_ok() {}
}

async fn ack_all(socket: &UdpSocket, to: SocketAddr, epoch: Epoch, size: u8) {
    for seq in 1..=size {
        let ack = Packet::ack(epoch, seq, size).encode();
        socket.send_to(&ack, to).await.unwrap();
    }
}

fn message(i: usize) -> Vec<u8> {
    format!("message-{i:03}-{}", "x".repeat(i * 7 % 300)).into_bytes()
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_trip_survives_twenty_percent_loss() {
    const COUNT: usize = 60;

    let (server, addr) = server(config(0.2, 11)).await;
    let client = client(config(0.2, 12), addr).await;

    for i in 0..COUNT {
        client.send(message(i)).await.unwrap();
    }

    let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    for i in 0..COUNT {
        let got = timeout(WAIT, peer.receive()).await.unwrap().unwrap();
        assert_eq!(got, message(i), "message {i} corrupted or out of order");
    }

    timeout(WAIT, client.flush()).await.unwrap().unwrap();
    let stats = client.stats();
    assert!(client.transfer_completed());
    assert_eq!(stats.max_windows_in_flight, 1);
    assert_eq!(stats.windows_in_flight, 0);
    assert!(stats.windows_sent >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_thousand_bytes_in_three_chunks_with_ten_percent_loss() {
    let payload: Vec<u8> = (0..5_000u32).map(|i| (i * 31 % 251) as u8).collect();

    let (server, addr) = server(config(0.1, 21)).await;
    let client = client(config(0.1, 22), addr).await;

    for chunk in payload.chunks(2_048) {
        client.send(chunk.to_vec()).await.unwrap();
    }

    let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    let mut rebuilt = Vec::new();
    while rebuilt.len() < payload.len() {
        rebuilt.extend(timeout(WAIT, peer.receive()).await.unwrap().unwrap());
    }
    assert_eq!(rebuilt, payload);

    timeout(WAIT, client.flush()).await.unwrap().unwrap();
    let stats = client.stats();
    assert!(
        stats.retransmit_rounds < 20,
        "took {} retransmission rounds",
        stats.retransmit_rounds
    );
    assert!(stats.max_windows_in_flight <= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_replies_travel_back() {
    let (server, addr) = server(config(0.1, 31)).await;
    let client = client(config(0.1, 32), addr).await;

    client.send(b"ping".to_vec()).await.unwrap();
    let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    assert_eq!(timeout(WAIT, peer.receive()).await.unwrap().unwrap(), b"ping");

    for i in 0..10 {
        peer.send(message(i)).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(timeout(WAIT, client.receive()).await.unwrap().unwrap(), message(i));
    }
    timeout(WAIT, peer.flush()).await.unwrap().unwrap();
    assert_eq!(peer.stats().max_windows_in_flight, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_keeps_peers_apart() {
    const PEERS: usize = 3;
    const COUNT: usize = 15;

    let (server, addr) = server(config(0.1, 41)).await;

    let mut clients = Vec::new();
    for p in 0..PEERS {
        let client = client(config(0.1, 100 + p as u64), addr).await;
        for i in 0..COUNT {
            client.send(format!("peer{p}-{i}").into_bytes()).await.unwrap();
        }
        clients.push(client);
    }

    let mut readers = Vec::new();
    for _ in 0..PEERS {
        let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        readers.push(tokio::spawn(async move {
            let first = String::from_utf8(peer.receive().await.unwrap()).unwrap();
            let tag = first.split('-').next().unwrap().to_string();
            assert_eq!(first, format!("{tag}-0"));
            for i in 1..COUNT {
                let got = String::from_utf8(peer.receive().await.unwrap()).unwrap();
                assert_eq!(got, format!("{tag}-{i}"));
            }
            peer.send(format!("done-{tag}").into_bytes()).await.unwrap();
            tag
        }));
    }

    let mut tags = Vec::new();
    for reader in readers {
        tags.push(timeout(WAIT, reader).await.unwrap().unwrap());
    }
    tags.sort();
    assert_eq!(tags, vec!["peer0", "peer1", "peer2"]);
    assert_eq!(server.peer_count(), PEERS);

    for (p, client) in clients.iter().enumerate() {
        let reply = timeout(WAIT, client.receive()).await.unwrap().unwrap();
        assert_eq!(reply, format!("done-peer{p}").into_bytes());
    }
}

// ---------------------------------------------------------------------------
// Wire-level behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consecutive_windows_alternate_epoch_slots() {
    let (raw, raw_addr) = raw_peer().await;
    let client = client(config(0.0, 0), raw_addr).await;

    let mut payload = 0u8;
    for (epoch, size) in [(Epoch::Zero, 2u8), (Epoch::One, 3), (Epoch::Zero, 2)] {
        for _ in 0..size {
            client.send(vec![payload]).await.unwrap();
            payload += 1;
        }
        let (window, from) = take_window(&raw, epoch, size).await;
        let first = payload - size;
        let seen: Vec<u8> = window.iter().map(|p| p.payload[0]).collect();
        assert_eq!(seen, (first..payload).collect::<Vec<_>>());

        ack_all(&raw, from, epoch, size).await;
        timeout(WAIT, client.flush()).await.unwrap().unwrap();
        drain(&raw);
    }
    assert_eq!(client.stats().windows_sent, 3);
}

#[tokio::test]
async fn full_queue_blocks_until_window_is_acknowledged() {
    let (raw, raw_addr) = raw_peer().await;
    let client = Arc::new(client(config(0.0, 0).with_max_window(2), raw_addr).await);

    client.send(b"1".to_vec()).await.unwrap();
    client.send(b"2".to_vec()).await.unwrap();
    let (first, from) = take_window(&raw, Epoch::Zero, 2).await;
    assert_eq!(first[0].payload, b"1");

    // The window is out; these two refill the queue to capacity.
    timeout(WAIT, client.send(b"3".to_vec())).await.unwrap().unwrap();
    timeout(WAIT, client.send(b"4".to_vec())).await.unwrap().unwrap();

    let blocked = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(b"5".to_vec()).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!blocked.is_finished(), "send past capacity must wait");
    assert!(!client.transfer_completed());

    ack_all(&raw, from, Epoch::Zero, 2).await;
    timeout(WAIT, blocked).await.unwrap().unwrap().unwrap();

    let (second, from) = take_window(&raw, Epoch::One, 2).await;
    assert_eq!(second[0].payload, b"3");
    assert_eq!(second[1].payload, b"4");
    ack_all(&raw, from, Epoch::One, 2).await;

    let (third, from) = take_window(&raw, Epoch::Zero, 1).await;
    assert_eq!(third[0].payload, b"5");
    ack_all(&raw, from, Epoch::Zero, 1).await;
    timeout(WAIT, client.flush()).await.unwrap().unwrap();
}

#[tokio::test]
async fn acks_outside_the_window_change_nothing() {
    let (raw, raw_addr) = raw_peer().await;
    let client = client(config(0.0, 0), raw_addr).await;

    client.send(b"only".to_vec()).await.unwrap();
    let (_, from) = take_window(&raw, Epoch::Zero, 1).await;

    for bogus in [Packet::ack(Epoch::Zero, 9, 1), Packet::ack(Epoch::One, 1, 1)] {
        raw.send_to(&bogus.encode(), from).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.transfer_completed());

    ack_all(&raw, from, Epoch::Zero, 1).await;
    timeout(WAIT, client.flush()).await.unwrap().unwrap();
}

#[tokio::test]
async fn stale_retransmission_is_reacked_not_redelivered() {
    let (raw, raw_addr) = raw_peer().await;
    let client = client(config(0.0, 0), raw_addr).await;
    // Learn the client's address from its first datagram.
    client.send(b"hello".to_vec()).await.unwrap();
    let (_, to) = take_window(&raw, Epoch::Zero, 1).await;
    ack_all(&raw, to, Epoch::Zero, 1).await;

    let send = |pkt: Packet| {
        let raw = &raw;
        async move { raw.send_to(&pkt.encode(), to).await.unwrap() }
    };

    // Epoch-0 window of two, second number duplicated.
    send(Packet::data(Epoch::Zero, 2, 2, b"w0-2".to_vec())).await;
    send(Packet::data(Epoch::Zero, 2, 2, b"w0-2".to_vec())).await;
    send(Packet::data(Epoch::Zero, 1, 2, b"w0-1".to_vec())).await;
    assert_eq!(timeout(WAIT, client.receive()).await.unwrap().unwrap(), b"w0-1");
    assert_eq!(timeout(WAIT, client.receive()).await.unwrap().unwrap(), b"w0-2");

    // Old number 2 again: must be re-acked in slot 0 and not delivered.
    drain(&raw);
    send(Packet::data(Epoch::Zero, 2, 2, b"w0-2".to_vec())).await;
    let reack = loop {
        let (pkt, _) = recv_packet(&raw).await;
        if pkt.kind() == Kind::Ack && pkt.header.slots == [2, 0] {
            break pkt;
        }
    };
    assert_eq!(reack.header.window, 2);

    // The genuine epoch-1 window reuses number 2.
    send(Packet::data(Epoch::One, 2, 2, b"w1-2".to_vec())).await;
    send(Packet::data(Epoch::One, 1, 2, b"w1-1".to_vec())).await;
    assert_eq!(timeout(WAIT, client.receive()).await.unwrap().unwrap(), b"w1-1");
    assert_eq!(timeout(WAIT, client.receive()).await.unwrap().unwrap(), b"w1-2");

    assert!(
        timeout(Duration::from_millis(100), client.receive()).await.is_err(),
        "nothing else may be delivered"
    );
    assert_eq!(client.stats().delivered, 4);
    assert!(client.stats().stale_packets >= 1);
}
