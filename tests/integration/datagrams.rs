use crate::*;
use portage_engine::protocol::ACK_TOKEN;
use portage_engine::{
    shutdown_channel, BoxSet, Cardinality, CommType, ReceiveJob, SendJob, TickOutcome, UdpLink,
};
use std::time::Instant;
use tokio::net::{TcpStream, UdpSocket};

async fn udp_link_to(peer: std::net::SocketAddr) -> UdpLink {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    UdpLink::new(socket, peer).unwrap()
}

/// One datagram, send job to receive job, lands in the receiver's box.
#[tokio::test]
async fn test_udp_end_to_end() {
    let send_cfg = job_config(CommType::UdpSend, Cardinality::OneToOne, 64);
    let recv_cfg = job_config(CommType::UdpSend, Cardinality::OneToOne, 64);

    let recv_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let recv_addr = recv_socket.local_addr().unwrap();

    let out_boxes = BoxSet::with_boxes(1, 8);
    out_boxes.get(1).unwrap().enqueue(single(b"ping", 64, 1)).await.unwrap();
    let in_boxes = BoxSet::with_boxes(1, 8);

    let (_tx_s, shutdown_s) = shutdown_channel();
    let (_tx_r, shutdown_r) = shutdown_channel();
    let mut sender = SendJob::<TcpStream>::udp(
        send_cfg,
        udp_link_to(recv_addr).await,
        out_boxes,
        shutdown_s,
    )
    .unwrap();
    let mut receiver =
        ReceiveJob::<TcpStream>::udp(recv_cfg, recv_socket, in_boxes.clone(), shutdown_r).unwrap();

    assert_eq!(sender.tick().await.unwrap(), TickOutcome::Sent);
    assert_eq!(receiver.tick().await.unwrap(), TickOutcome::Received(1));
    assert_eq!(
        in_boxes.get(1).unwrap().dequeue().await.unwrap().payload.as_ref(),
        b"ping"
    );
}

/// Many-to-one datagrams carry a leading box id and route to that box.
#[tokio::test]
async fn test_udp_many_to_one_routes_by_box_id() {
    let send_cfg = job_config(CommType::UdpSend, Cardinality::ManyToOne, 64);
    let recv_cfg = job_config(CommType::UdpSend, Cardinality::ManyToOne, 64);

    let recv_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let recv_addr = recv_socket.local_addr().unwrap();

    let out_boxes = BoxSet::with_boxes(3, 8);
    out_boxes.get(2).unwrap().enqueue(single(b"for2", 64, 2)).await.unwrap();
    let in_boxes = BoxSet::with_boxes(3, 8);

    let (_tx_s, shutdown_s) = shutdown_channel();
    let (_tx_r, shutdown_r) = shutdown_channel();
    let mut sender = SendJob::<TcpStream>::udp(
        send_cfg,
        udp_link_to(recv_addr).await,
        out_boxes,
        shutdown_s,
    )
    .unwrap();
    let mut receiver =
        ReceiveJob::<TcpStream>::udp(recv_cfg, recv_socket, in_boxes.clone(), shutdown_r).unwrap();

    assert_eq!(sender.tick().await.unwrap(), TickOutcome::Sent);
    assert_eq!(receiver.tick().await.unwrap(), TickOutcome::Received(1));

    assert_eq!(
        in_boxes.get(2).unwrap().dequeue().await.unwrap().payload.as_ref(),
        b"for2"
    );
    assert!(in_boxes.get(1).unwrap().is_empty().await);
    assert!(in_boxes.get(3).unwrap().is_empty().await);
}

/// A with-ack receive job confirms each accepted datagram back to its
/// sender with the ACK token.
#[tokio::test]
async fn test_receive_job_acks_accepted_datagram() {
    let recv_cfg = job_config(CommType::UdpSendWithAck, Cardinality::OneToOne, 64);

    let recv_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let recv_addr = recv_socket.local_addr().unwrap();
    let in_boxes = BoxSet::with_boxes(1, 8);

    let (_tx, shutdown) = shutdown_channel();
    let mut receiver =
        ReceiveJob::<TcpStream>::udp(recv_cfg, recv_socket, in_boxes, shutdown).unwrap();

    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    probe.send_to(b"ping", recv_addr).await.unwrap();

    assert_eq!(receiver.tick().await.unwrap(), TickOutcome::Received(1));

    let mut buf = [0u8; 4];
    let (n, from) = probe.recv_from(&mut buf).await.unwrap();
    assert_eq!(from, recv_addr);
    assert_eq!(&buf[..n], &[ACK_TOKEN]);
}

/// A with-ack sender whose peer never answers reports the datagram as
/// unacked within the configured bound, never hanging.
#[tokio::test]
async fn test_unacked_send_stays_bounded() {
    let cfg = job_config(CommType::UdpSendWithAck, Cardinality::OneToOne, 64);

    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sink_addr = sink.local_addr().unwrap();

    let boxes = BoxSet::with_boxes(1, 8);
    boxes.get(1).unwrap().enqueue(single(b"ping", 64, 1)).await.unwrap();

    let (_tx, shutdown) = shutdown_channel();
    let mut sender =
        SendJob::<TcpStream>::udp(cfg, udp_link_to(sink_addr).await, boxes, shutdown).unwrap();

    let started = Instant::now();
    assert_eq!(sender.tick().await.unwrap(), TickOutcome::SentUnacked);
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}

/// A scripted ACK arriving during the wait completes the hand-off and the
/// tick reports a full send.
#[tokio::test]
async fn test_scripted_ack_completes_send() {
    let cfg = job_config(CommType::UdpSendWithAck, Cardinality::OneToOne, 64);

    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sink_addr = sink.local_addr().unwrap();

    let boxes = BoxSet::with_boxes(1, 8);
    boxes.get(1).unwrap().enqueue(single(b"ping", 64, 1)).await.unwrap();

    let link = udp_link_to(sink_addr).await;
    let sender_addr = link.local();

    let acker = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&[ACK_TOKEN], sender_addr).await.unwrap();
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut sender = SendJob::<TcpStream>::udp(cfg, link, boxes, shutdown).unwrap();

    assert_eq!(sender.tick().await.unwrap(), TickOutcome::Sent);
    acker.await.unwrap();
}
