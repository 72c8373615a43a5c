//! Control channel end-to-end tests

use std::time::Duration;

use culvert_e2e::{alloc_exposed_port, wait_for, MockTcpService, TestAgent, TestServer};

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("culvert_server=debug,culvert_agent=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_list_shows_connected_clients() {
    init_test();

    let server = TestServer::start().await;
    server.seed_client("alpha").await;
    server.seed_client("beta").await;

    assert_eq!(server.control("LIST").await, "OK\n");

    let agent_a = TestAgent::start(&server, "alpha");
    let agent_b = TestAgent::start(&server, "beta");

    assert!(
        wait_for(
            || async { server.manager.connected_ids() == vec!["alpha", "beta"] },
            Duration::from_secs(5),
        )
        .await
    );
    assert_eq!(server.control("LIST").await, "alpha\nbeta\nOK\n");

    agent_a.stop().await;
    agent_b.stop().await;
}

#[tokio::test]
async fn test_kick_disconnects_and_agent_reconnects() {
    init_test();

    let server = TestServer::start().await;
    let mock = MockTcpService::start().await;

    let exposed = alloc_exposed_port();
    server.seed_client("c1").await;
    server.seed_port("c1", exposed, mock.port()).await;

    let agent = TestAgent::start(&server, "c1");
    assert!(server.wait_for_listener("c1", exposed).await);
    let first_epoch = server.manager.get("c1").unwrap().epoch();

    assert_eq!(server.control("KICK c1").await, "OK\n");

    // The session disappears along with its listeners
    assert!(
        wait_for(
            || async {
                match server.manager.get("c1") {
                    None => true,
                    // Or the agent already reconnected as a fresh session
                    Some(session) => session.epoch() != first_epoch,
                }
            },
            Duration::from_secs(2),
        )
        .await,
        "kicked session lingered"
    );

    // The agent's reconnect loop brings it back
    assert!(
        wait_for(
            || async {
                server
                    .manager
                    .get("c1")
                    .map(|s| s.epoch() != first_epoch)
                    .unwrap_or(false)
            },
            Duration::from_secs(5),
        )
        .await,
        "agent did not reconnect after KICK"
    );
    assert!(server.wait_for_listener("c1", exposed).await);

    agent.stop().await;
}

#[tokio::test]
async fn test_kick_unknown_client() {
    init_test();

    let server = TestServer::start().await;
    assert_eq!(
        server.control("KICK ghost").await,
        "ERROR: client not connected\n"
    );
}

#[tokio::test]
async fn test_reload_disconnected_client_is_ok() {
    init_test();

    let server = TestServer::start().await;
    server.seed_client("c1").await;

    // Documented behavior: reload of a disconnected client is a no-op OK
    assert_eq!(server.control("RELOAD c1").await, "OK\n");
}

#[tokio::test]
async fn test_unknown_command() {
    init_test();

    let server = TestServer::start().await;
    assert_eq!(
        server.control("DESTROY everything").await,
        "ERROR: unknown command\n"
    );
}
