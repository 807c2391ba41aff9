use crate::*;
use portage_core::crypto::{Cipher, SecurityMode};
use portage_engine::{
    shutdown_channel, BoxSet, Cardinality, CommType, EngineError, SendJob, TickOutcome,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_framed(stream: &mut TcpStream) -> Vec<u8> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    let mut body = vec![0u8; u32::from_le_bytes(prefix) as usize];
    stream.read_exact(&mut body).await.unwrap();
    body
}

async fn write_framed(stream: &mut TcpStream, body: &[u8]) {
    stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

/// One-to-one: a reply of two frame lengths splits into exactly two
/// messages in the single answer box.
#[tokio::test]
async fn test_answer_split_one_to_one() {
    let cfg = job_config(CommType::TcpSendWithAnswer, Cardinality::OneToOne, 4);
    let boxes = BoxSet::with_boxes(1, 8);
    let answers = BoxSet::with_boxes(1, 8);
    boxes.get(1).unwrap().enqueue(single(b"ask", 4, 1)).await.unwrap();

    let (local, mut remote) = tcp_pair().await;
    let peer = tokio::spawn(async move {
        assert_eq!(read_framed(&mut remote).await, b"ask");
        write_framed(&mut remote, b"ABCDEFGH").await;
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut job = SendJob::tcp(cfg, local, boxes, answers.clone(), shutdown).unwrap();

    assert_eq!(job.tick().await.unwrap(), TickOutcome::AnswerDelivered(2));
    peer.await.unwrap();

    let answer_box = answers.get(1).unwrap();
    assert_eq!(answer_box.dequeue().await.unwrap().payload.as_ref(), b"ABCD");
    assert_eq!(answer_box.dequeue().await.unwrap().payload.as_ref(), b"EFGH");
    assert!(answer_box.is_empty().await);
}

/// A reply that is not a multiple of the frame length is a fatal protocol
/// error and delivers nothing.
#[tokio::test]
async fn test_answer_invalid_length_is_fatal() {
    let cfg = job_config(CommType::TcpSendWithAnswer, Cardinality::OneToOne, 4);
    let boxes = BoxSet::with_boxes(1, 8);
    let answers = BoxSet::with_boxes(1, 8);
    boxes.get(1).unwrap().enqueue(single(b"ask", 4, 1)).await.unwrap();

    let (local, mut remote) = tcp_pair().await;
    let peer = tokio::spawn(async move {
        let _ = read_framed(&mut remote).await;
        write_framed(&mut remote, b"SEVEN!!").await;
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut job = SendJob::tcp(cfg, local, boxes, answers.clone(), shutdown).unwrap();

    let err = job.tick().await.unwrap_err();
    peer.await.unwrap();
    assert!(matches!(err, EngineError::InvalidReplyLength { len: 7, frame_len: 4 }));
    assert!(err.is_fatal());
    assert!(answers.get(1).unwrap().is_empty().await);
}

/// Many-to-one: each reply frame carries a leading box id and lands in
/// that box.
#[tokio::test]
async fn test_answer_routes_by_leading_box_id() {
    let cfg = job_config(CommType::TcpSendWithAnswer, Cardinality::ManyToOne, 8);
    let boxes = BoxSet::with_boxes(3, 8);
    let answers = BoxSet::with_boxes(3, 8);
    boxes.get(2).unwrap().enqueue(single(b"ask", 8, 2)).await.unwrap();

    let (local, mut remote) = tcp_pair().await;
    let peer = tokio::spawn(async move {
        let _ = read_framed(&mut remote).await;

        // Two 8-byte frames: [box id][payload].
        let mut reply = Vec::new();
        reply.extend_from_slice(&3u32.to_le_bytes());
        reply.extend_from_slice(b"for3");
        reply.extend_from_slice(&1u32.to_le_bytes());
        reply.extend_from_slice(b"for1");
        write_framed(&mut remote, &reply).await;
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut job = SendJob::tcp(cfg, local, boxes, answers.clone(), shutdown).unwrap();

    assert_eq!(job.tick().await.unwrap(), TickOutcome::AnswerDelivered(2));
    peer.await.unwrap();

    assert_eq!(answers.get(3).unwrap().dequeue().await.unwrap().payload.as_ref(), b"for3");
    assert_eq!(answers.get(1).unwrap().dequeue().await.unwrap().payload.as_ref(), b"for1");
    assert!(answers.get(2).unwrap().is_empty().await);
}

/// A reply frame naming an unconfigured box is fatal.
#[tokio::test]
async fn test_answer_unknown_box_id_is_fatal() {
    let cfg = job_config(CommType::TcpSendWithAnswer, Cardinality::ManyToOne, 8);
    let boxes = BoxSet::with_boxes(2, 8);
    let answers = BoxSet::with_boxes(2, 8);
    boxes.get(1).unwrap().enqueue(single(b"ask", 8, 1)).await.unwrap();

    let (local, mut remote) = tcp_pair().await;
    let peer = tokio::spawn(async move {
        let _ = read_framed(&mut remote).await;
        let mut reply = Vec::new();
        reply.extend_from_slice(&9u32.to_le_bytes());
        reply.extend_from_slice(b"lost");
        write_framed(&mut remote, &reply).await;
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut job = SendJob::tcp(cfg, local, boxes, answers.clone(), shutdown).unwrap();

    let err = job.tick().await.unwrap_err();
    peer.await.unwrap();
    assert!(matches!(err, EngineError::AnswerBoxOutOfRange { box_id: 9, boxes: 2 }));
}

/// The request and the reply each travel as one ciphertext with a single
/// authenticated-mode overhead; the decrypted reply still splits per frame.
#[tokio::test]
async fn test_encrypted_answer_round_trip() {
    // frame length 4 once the 28-byte high-mode overhead is subtracted
    let mut cfg = job_config(CommType::TcpSendWithAnswer, Cardinality::OneToOne, 32);
    cfg.security = SecurityMode::Sym256High;
    cfg.passphrase = "shared secret".into();

    let boxes = BoxSet::with_boxes(1, 8);
    let answers = BoxSet::with_boxes(1, 8);
    boxes.get(1).unwrap().enqueue(single(b"ask", 32, 1)).await.unwrap();

    let (local, mut remote) = tcp_pair().await;
    let peer = tokio::spawn(async move {
        let peer_cipher = Cipher::new(SecurityMode::Sym256High, "shared secret");
        let request = read_framed(&mut remote).await;
        assert_eq!(peer_cipher.decrypt(&request).unwrap(), b"ask");

        let reply = peer_cipher.encrypt(b"ABCDEFGH").unwrap();
        write_framed(&mut remote, &reply).await;
    });

    let (_tx, shutdown) = shutdown_channel();
    let mut job = SendJob::tcp(cfg, local, boxes, answers.clone(), shutdown).unwrap();

    assert_eq!(job.tick().await.unwrap(), TickOutcome::AnswerDelivered(2));
    peer.await.unwrap();

    let answer_box = answers.get(1).unwrap();
    assert_eq!(answer_box.dequeue().await.unwrap().payload.as_ref(), b"ABCD");
    assert_eq!(answer_box.dequeue().await.unwrap().payload.as_ref(), b"EFGH");
}
