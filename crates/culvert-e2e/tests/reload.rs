//! Hot reload end-to-end tests

use std::time::Duration;

use culvert_e2e::{alloc_exposed_port, MockTcpService, TestAgent, TestServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("culvert_server=debug,culvert_agent=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_hot_add_exposes_new_port() {
    init_test();

    let server = TestServer::start().await;
    let mock = MockTcpService::start().await;

    let first_port = alloc_exposed_port();
    server.seed_client("c1").await;
    server.seed_port("c1", first_port, mock.port()).await;

    let agent = TestAgent::start(&server, "c1");
    assert!(server.wait_for_listener("c1", first_port).await);

    // Open a connection on the existing port before the reload
    let mut existing = TcpStream::connect(("127.0.0.1", first_port)).await.unwrap();
    existing.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 6];
    tokio::time::timeout(Duration::from_secs(5), existing.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();

    // Operator adds a mapping and reloads
    let second_port = alloc_exposed_port();
    server.seed_port("c1", second_port, mock.port()).await;
    assert_eq!(server.control("RELOAD c1").await, "OK\n");

    // The new port accepts and forwards
    let mut fresh = TcpStream::connect(("127.0.0.1", second_port))
        .await
        .expect("new port did not come up");
    fresh.write_all(b"hot-added").await.unwrap();
    let mut buf = [0u8; 9];
    tokio::time::timeout(Duration::from_secs(5), fresh.read_exact(&mut buf))
        .await
        .expect("echo on new port timed out")
        .unwrap();
    assert_eq!(&buf, b"hot-added");

    // The pre-reload connection is undisturbed
    existing.write_all(b"after").await.unwrap();
    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), existing.read_exact(&mut buf))
        .await
        .expect("existing connection broken by reload")
        .unwrap();
    assert_eq!(&buf, b"after");

    agent.stop().await;
}

#[tokio::test]
async fn test_hot_remove_closes_listener() {
    init_test();

    let server = TestServer::start().await;
    let mock = MockTcpService::start().await;

    let keep_port = alloc_exposed_port();
    let drop_port = alloc_exposed_port();
    server.seed_client("c1").await;
    server.seed_port("c1", keep_port, mock.port()).await;
    let drop_id = server.seed_port("c1", drop_port, mock.port()).await;

    let agent = TestAgent::start(&server, "c1");
    assert!(server.wait_for_listener("c1", keep_port).await);
    assert!(server.wait_for_listener("c1", drop_port).await);

    server
        .catalog
        .set_port_enabled(drop_id, false)
        .await
        .unwrap();
    assert_eq!(server.control("RELOAD c1").await, "OK\n");

    // New dials to the removed port are refused
    assert!(TcpStream::connect(("127.0.0.1", drop_port)).await.is_err());

    // The kept port still works
    let mut admin = TcpStream::connect(("127.0.0.1", keep_port)).await.unwrap();
    admin.write_all(b"still-up").await.unwrap();
    let mut buf = [0u8; 8];
    tokio::time::timeout(Duration::from_secs(5), admin.read_exact(&mut buf))
        .await
        .expect("kept port broken")
        .unwrap();
    assert_eq!(&buf, b"still-up");

    agent.stop().await;
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    init_test();

    let server = TestServer::start().await;
    let mock = MockTcpService::start().await;

    let exposed = alloc_exposed_port();
    server.seed_client("c1").await;
    server.seed_port("c1", exposed, mock.port()).await;

    let agent = TestAgent::start(&server, "c1");
    assert!(server.wait_for_listener("c1", exposed).await);

    let session = server.manager.get("c1").expect("session missing");
    let before = session.active_ports().await;

    assert_eq!(server.control("RELOAD c1").await, "OK\n");
    assert_eq!(server.control("RELOAD c1").await, "OK\n");

    assert_eq!(session.active_ports().await, before);

    agent.stop().await;
}

#[tokio::test]
async fn test_port_conflict_skips_only_the_conflicting_mapping() {
    init_test();

    let server = TestServer::start().await;
    let mock = MockTcpService::start().await;

    let contested = alloc_exposed_port();
    let free_port = alloc_exposed_port();

    server.seed_client("c1").await;
    server.seed_port("c1", contested, mock.port()).await;
    server.seed_client("c2").await;
    server.seed_port("c2", contested, mock.port()).await;
    server.seed_port("c2", free_port, mock.port()).await;

    // c1 binds the contested port first
    let agent1 = TestAgent::start(&server, "c1");
    assert!(server.wait_for_listener("c1", contested).await);

    // c2's bind of the contested port fails and is skipped; its other
    // mapping still comes up
    let agent2 = TestAgent::start(&server, "c2");
    assert!(server.wait_for_listener("c2", free_port).await);

    let session = server.manager.get("c2").expect("c2 session missing");
    assert_eq!(session.active_ports().await, vec![free_port]);

    agent1.stop().await;
    agent2.stop().await;
}
