//! Topology discovery against fake RESP nodes.

use std::sync::Arc;

use bytes::BytesMut;
use kvsync::config::{EndpointConfig, TopologyMode};
use kvsync::sync::Topology;
use kvsync::SyncError;
use kvsync_client::{resp, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `PING` and `CLUSTER NODES` on every accepted connection.
async fn spawn_node(listener: TcpListener, nodes: Arc<String>) {
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let nodes = nodes.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                loop {
                    while let Ok(Some(Value::Array(args))) = resp::decode_value(&mut buf) {
                        let name = args
                            .first()
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_ascii_uppercase();
                        let reply = match name.as_str() {
                            "PING" => "+PONG\r\n".to_string(),
                            "CLUSTER" => format!("${}\r\n{}\r\n", nodes.len(), nodes),
                            _ => "-ERR unknown command\r\n".to_string(),
                        };
                        if socket.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    match socket.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            });
        }
    });
}

#[tokio::test]
async fn test_discovers_serving_primaries() {
    let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let a_addr = a.local_addr().unwrap().to_string();
    let b_addr = b.local_addr().unwrap().to_string();

    let nodes = Arc::new(format!(
        "aaaa {a_addr}@1 myself,master - 0 0 1 connected 0-8191\n\
         bbbb {b_addr}@2 master - 0 0 2 connected 8192-16383\n\
         cccc 127.0.0.1:1@3 slave aaaa 0 0 1 connected\n\
         dddd 127.0.0.1:2@4 master,fail - 0 0 3 disconnected\n"
    ));
    spawn_node(a, nodes.clone()).await;
    spawn_node(b, nodes).await;

    let config = EndpointConfig {
        hosts: vec![a_addr.clone()],
        mode: TopologyMode::Cluster,
        connect_timeout_ms: 1000,
    };
    let topology = Topology::connect(&config).await.unwrap();

    assert!(topology.is_cluster());
    assert_eq!(topology.len(), 2);
    assert_eq!(topology.shards()[0].store().addr(), a_addr);
    assert_eq!(topology.shards()[1].store().addr(), b_addr);
    // foo hashes to slot 12182
    assert_eq!(topology.route(b"foo"), Some(1));
}

#[tokio::test]
async fn test_unreachable_seeds_are_fatal() {
    let config = EndpointConfig {
        hosts: vec!["127.0.0.1:1".into(), "127.0.0.1:2".into()],
        mode: TopologyMode::Auto,
        connect_timeout_ms: 200,
    };
    let err = Topology::connect(&config).await.unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));
}

#[tokio::test]
async fn test_single_node_health_check() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    spawn_node(listener, Arc::new(String::new())).await;

    let config = EndpointConfig {
        hosts: vec![addr.clone()],
        ..Default::default()
    };
    let topology = Topology::connect(&config).await.unwrap();
    assert!(!topology.is_cluster());
    assert_eq!(topology.shards()[0].store().addr(), addr);
}

#[tokio::test]
async fn test_node_without_own_address_uses_seed_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let nodes = Arc::new(format!(
        "aaaa :{port}@1{port} myself,master - 0 0 1 connected 0-16383\n"
    ));
    spawn_node(listener, nodes).await;

    let config = EndpointConfig {
        hosts: vec![format!("127.0.0.1:{port}")],
        mode: TopologyMode::Cluster,
        connect_timeout_ms: 1000,
    };
    let topology = Topology::connect(&config).await.unwrap();

    assert_eq!(topology.len(), 1);
    assert_eq!(topology.shards()[0].store().addr(), format!("127.0.0.1:{port}"));
    assert_eq!(topology.route(b"foo"), Some(0));
}
