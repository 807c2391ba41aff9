use crate::*;
use portage_engine::{shutdown_channel, BoxSet, Cardinality, CommType, SendJob, TickOutcome};

/// Two duplex peers over one TCP connection, ticking in turn: each side's
/// sends land in the other side's answer boxes, and no tick blocks past
/// its listen window.
#[tokio::test]
async fn test_duplex_peers_exchange_messages() {
    let cfg_a = job_config(CommType::TcpBidirectional, Cardinality::BidirectionalEqual, 64);
    let cfg_b = cfg_a.clone();

    let a_out = BoxSet::with_boxes(1, 8);
    let a_in = BoxSet::with_boxes(1, 8);
    let b_out = BoxSet::with_boxes(1, 8);
    let b_in = BoxSet::with_boxes(1, 8);

    a_out.get(1).unwrap().enqueue(single(b"ping", 64, 1)).await.unwrap();
    b_out.get(1).unwrap().enqueue(single(b"pong", 64, 1)).await.unwrap();

    let (side_a, side_b) = tcp_pair().await;
    let (_tx_a, shutdown_a) = shutdown_channel();
    let (_tx_b, shutdown_b) = shutdown_channel();

    let mut job_a = SendJob::tcp(cfg_a, side_a, a_out, a_in.clone(), shutdown_a).unwrap();
    let mut job_b = SendJob::tcp(cfg_b, side_b, b_out, b_in.clone(), shutdown_b).unwrap();

    // A sends; nothing inbound yet, so its listen window closes quietly.
    assert_eq!(job_a.tick().await.unwrap(), TickOutcome::Sent);

    // B sends its own message and picks up A's.
    assert_eq!(job_b.tick().await.unwrap(), TickOutcome::Received(1));
    assert_eq!(b_in.get(1).unwrap().dequeue().await.unwrap().payload.as_ref(), b"ping");

    // A has no more work; its next tick just receives B's message.
    assert_eq!(job_a.tick().await.unwrap(), TickOutcome::Received(1));
    assert_eq!(a_in.get(1).unwrap().dequeue().await.unwrap().payload.as_ref(), b"pong");
}

/// A quiet duplex tick with no local work is plain idle.
#[tokio::test]
async fn test_duplex_idle_tick() {
    let cfg = job_config(CommType::TcpBidirectional, Cardinality::BidirectionalEqual, 64);
    let (side_a, _side_b) = tcp_pair().await;
    let (_tx, shutdown) = shutdown_channel();

    let mut job = SendJob::tcp(
        cfg,
        side_a,
        BoxSet::with_boxes(1, 8),
        BoxSet::with_boxes(1, 8),
        shutdown,
    )
    .unwrap();
    assert_eq!(job.tick().await.unwrap(), TickOutcome::Idle);
}
