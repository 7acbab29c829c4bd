//! Wire-level behaviour of the adoption endpoint.

mod common;

use bytes::Bytes;
use common::*;
use flock_core::{FlockMode, HeartbeatRequest, Role, RpcRequest, RpcResponse};
use flock_server::adoption::{decode_frame, encode_frame, frame_codec, AdoptionClient};
use flock_server::config::StartMode;
use flock_server::discovery::MemoryNetwork;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

async fn pending_node(secret: Option<&str>) -> TestNode {
    let mut config = test_config("n1");
    config.bootstrap_secret = secret.map(str::to_string);
    start_node(
        &MemoryNetwork::new(),
        "127.0.0.1",
        config,
        StartMode::Agent,
        FakeControlPlane::default(),
    )
    .await
}

fn target(node: &TestNode) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], node.runtime.adoption_addr().port()))
}

async fn client(node: &TestNode) -> AdoptionClient {
    AdoptionClient::connect(target(node), Duration::from_secs(1), Duration::from_secs(2))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_heartbeat_never_requests_reconfigure() {
    let node = pending_node(None).await;
    let mut client = client(&node).await;

    assert!(!client.heartbeat().await.unwrap().reconfigure);
    assert_eq!(status(&node.runtime).await.mode, FlockMode::Pending);

    assert!(client.adopt(adopt_request(Role::Agent)).await.unwrap().accepted);
    assert!(!client.heartbeat().await.unwrap().reconfigure);
    assert_eq!(status(&node.runtime).await.mode, FlockMode::Agent);

    node.runtime.run_until(async {}).await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_error_envelope() {
    let node = pending_node(None).await;
    let stream = TcpStream::connect(target(&node)).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec());

    framed.send(Bytes::from_static(b"{\"method\":\"reboot\"}")).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    match decode_frame::<RpcResponse>(&frame).unwrap() {
        RpcResponse::Error { message } => assert!(message.contains("malformed")),
        other => panic!("expected error envelope, got {other:?}"),
    }

    // The connection stays usable
    let heartbeat = encode_frame(&RpcRequest::Heartbeat(HeartbeatRequest {})).unwrap();
    framed.send(heartbeat).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    assert!(matches!(
        decode_frame::<RpcResponse>(&frame).unwrap(),
        RpcResponse::Heartbeat(_)
    ));

    assert_eq!(status(&node.runtime).await.mode, FlockMode::Pending);
    node.runtime.run_until(async {}).await.unwrap();
}

#[tokio::test]
async fn test_preshared_secret_gates_adoption() {
    let node = pending_node(Some("s3cret")).await;
    let mut client = client(&node).await;

    let rejected = client.adopt(adopt_request(Role::Agent)).await.unwrap();
    assert!(!rejected.accepted);
    assert_eq!(status(&node.runtime).await.mode, FlockMode::Pending);

    let mut request = adopt_request(Role::Agent);
    request.bootstrap_secret = Some("wrong".to_string());
    assert!(!client.adopt(request).await.unwrap().accepted);

    let mut request = adopt_request(Role::Agent);
    request.bootstrap_secret = Some("s3cret".to_string());
    assert!(client.adopt(request).await.unwrap().accepted);
    assert_eq!(status(&node.runtime).await.mode, FlockMode::Agent);

    node.runtime.run_until(async {}).await.unwrap();
}

#[tokio::test]
async fn test_silent_connection_is_closed() {
    let mut config = test_config("n1");
    config.connection_idle_timeout = Duration::from_millis(300);
    let node = start_node(
        &MemoryNetwork::new(),
        "127.0.0.1",
        config,
        StartMode::Agent,
        FakeControlPlane::default(),
    )
    .await;

    let stream = TcpStream::connect(target(&node)).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec());

    // Never sends a request
    let closed = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("server closes the idle connection");
    assert!(matches!(closed, None | Some(Err(_))));

    node.runtime.run_until(async {}).await.unwrap();
}

#[tokio::test]
async fn test_open_connection_is_closed_on_shutdown() {
    let node = pending_node(None).await;
    let stream = TcpStream::connect(target(&node)).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec());

    let heartbeat = encode_frame(&RpcRequest::Heartbeat(HeartbeatRequest {})).unwrap();
    framed.send(heartbeat).await.unwrap();
    assert!(framed.next().await.unwrap().is_ok());

    node.runtime.run_until(async {}).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("connection closed with the node");
    assert!(matches!(closed, None | Some(Err(_))));
}
