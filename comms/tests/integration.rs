use std::{
    net::SocketAddr,
    sync::{Arc, mpsc},
    time::Duration,
};

use comms::{
    Client, Connection, TcpClient, TcpServer,
    msg::{CommMessage, Command, MessageMeta, NodeRole, Protos},
};
use tokio::{io, runtime::Runtime};

const TIMEOUT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn any_local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let mut meta = MessageMeta::new(Command::Data, NodeRole::Worker, 1);
    meta.request_id = 11;
    let msg = CommMessage::new(meta, Protos::Raw, b"Hello, world!".to_vec());

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    let received: CommMessage = rx.recv_into(&mut buf).await.unwrap();

    assert_eq!(received, msg);
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    use tokio::io::AsyncWriteExt;

    let (mut one, two) = io::duplex(64);
    let len = (comms::MAX_FRAME_LEN as u64 + 1).to_be_bytes();
    one.write_all(&len).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    let err = rx.recv_into::<CommMessage>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn server_replies_through_connection() {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = runtime();

    let handler = Arc::new(|conn: &Connection, msg: CommMessage| {
        let mut doubled = msg.data.clone();
        doubled.iter_mut().for_each(|b| *b *= 2);
        conn.send_message(msg.reply(Protos::Raw, doubled)).unwrap();
    });
    let server = TcpServer::bind(rt.handle(), any_local(), handler).unwrap();

    let (resp_tx, resp_rx) = mpsc::channel();
    let client = TcpClient::connect(rt.handle(), server.local_addr(), TIMEOUT, move |msg| {
        let _ = resp_tx.send(msg);
    })
    .unwrap();

    let mut meta = MessageMeta::new(Command::Data, NodeRole::Worker, 0);
    meta.request_id = 5;
    client.send(&meta, Protos::Raw, &[1, 2, 3]).unwrap();

    let resp = resp_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(resp.meta.request_id, 5);
    assert_eq!(resp.data, vec![2, 4, 6]);
}

#[test]
fn closed_client_fails_to_send() {
    let rt = runtime();

    let handler = Arc::new(|_: &Connection, _: CommMessage| {});
    let server = TcpServer::bind(rt.handle(), any_local(), handler).unwrap();
    let client = TcpClient::connect(rt.handle(), server.local_addr(), TIMEOUT, |_| {}).unwrap();

    client.close();

    let meta = MessageMeta::new(Command::Data, NodeRole::Worker, 0);
    let err = client.send(&meta, Protos::Raw, &[]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    assert!(client.is_closed());
}

#[test]
fn binding_a_taken_port_fails() {
    let rt = runtime();

    let handler = Arc::new(|_: &Connection, _: CommMessage| {});
    let first = TcpServer::bind(rt.handle(), any_local(), handler.clone()).unwrap();
    assert!(TcpServer::bind(rt.handle(), first.local_addr(), handler).is_err());
}

#[test]
fn connecting_to_a_stopped_server_fails() {
    let rt = runtime();

    let listener = std::net::TcpListener::bind(any_local()).unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let res = TcpClient::connect(rt.handle(), addr, Duration::from_millis(500), |_| {});
    assert!(res.is_err());
}
