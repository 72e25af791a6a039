//! Integration tests for TcpServer
//!
//! These tests run the gateway behind a real TCP listener.

use std::net::SocketAddr;
use std::time::Duration;

use attractap_gateway::memory::InMemoryServices;
use attractap_gateway::{Gateway, TcpServer, TcpServerConfig};
use attractap_protocol::payloads::RegisterRequest;
use attractap_protocol::{Envelope, Frame, Message, MessageType, ReaderCodec};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

async fn start_server(max_connections: usize) -> (SocketAddr, Gateway<InMemoryServices>) {
    let gateway = Gateway::new(InMemoryServices::new(), Default::default());
    let server = TcpServer::bind(TcpServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_connections,
    })
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(server.run(gateway.clone()));
    (addr, gateway)
}

async fn register(framed: &mut Framed<TcpStream, ReaderCodec>) -> Message {
    let request =
        Message::typed_event(MessageType::ReaderRegister, &RegisterRequest::default()).unwrap();
    framed
        .send(Frame::try_from(&Envelope::Message(request)).unwrap())
        .await
        .unwrap();

    let frame = timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("Register response timeout")
        .unwrap()
        .unwrap();
    match frame {
        Frame::Text(text) => match Envelope::from_json(&text).unwrap() {
            Envelope::Message(message) => message,
            Envelope::Heartbeat => panic!("unexpected heartbeat"),
        },
        Frame::Binary(_) => panic!("unexpected binary frame"),
    }
}

#[tokio::test]
async fn test_register_over_tcp() {
    let (addr, gateway) = start_server(10).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, ReaderCodec::new());

    let response = register(&mut framed).await;
    assert!(response.is(&MessageType::ReaderRegister));
    assert!(response.payload["token"].is_string());

    let registry = gateway.registry();
    let connections = registry.connection_ids();
    assert_eq!(connections.len(), 1);
    let info = registry.info(connections[0]).unwrap();
    assert_eq!(info.remote_addr.unwrap().ip(), addr.ip());
    assert!(info.reader_id.is_none());
}

#[tokio::test]
async fn test_connections_beyond_limit_are_rejected() {
    let (addr, _gateway) = start_server(1).await;

    let mut first = Framed::new(TcpStream::connect(addr).await.unwrap(), ReaderCodec::new());
    register(&mut first).await;

    let mut second = Framed::new(TcpStream::connect(addr).await.unwrap(), ReaderCodec::new());
    let closed = timeout(Duration::from_secs(5), second.next())
        .await
        .expect("Rejected connection should be closed");
    assert!(closed.is_none() || closed.unwrap().is_err());

    // The first connection is unaffected
    register(&mut first).await;
}
