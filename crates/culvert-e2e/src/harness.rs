//! Test harness: a complete server over an in-memory catalog, plus a real
//! agent driven by the production runtime.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use culvert_agent::config::TlsConfig as AgentTlsConfig;
use culvert_agent::{runtime, AgentConfig};
use culvert_catalog::Catalog;
use culvert_server::{Authenticator, ControlChannel, FramedPlane, SessionManager};
use culvert_transport::TransportKind;

/// Secret shared by every test client.
pub const TEST_SECRET: &str = "test-secret";

/// Counter handing out exposed ports within this test binary.
static NEXT_EXPOSED_PORT: AtomicU16 = AtomicU16::new(0);

/// Allocate an exposed port no other test will use.
///
/// Test binaries run as separate concurrent processes, so the range is
/// derived from the process id to keep their allocations apart.
pub fn alloc_exposed_port() -> u16 {
    let base = 40000 + (std::process::id() as u16 % 64) * 256;
    base + NEXT_EXPOSED_PORT.fetch_add(1, Ordering::Relaxed)
}

/// Poll `condition` until it holds or `timeout` expires.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// A running test server over the framed transport, without TLS.
pub struct TestServer {
    /// Address of the client-facing listener
    pub addr: SocketAddr,
    /// Path of the control socket
    pub control_path: PathBuf,
    /// The catalog backing the server; tests seed it directly
    pub catalog: Catalog,
    /// The session manager, exposed for direct assertions
    pub manager: Arc<SessionManager>,
    _control: ControlChannel,
    _tmp: TempDir,
    plane_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let catalog = Catalog::open_in_memory()
            .await
            .expect("Failed to open in-memory catalog");
        let manager = SessionManager::new();
        let auth = Authenticator::new(catalog.clone());

        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let control_path = tmp.path().join("culvert.sock");
        let control = ControlChannel::bind(&control_path, manager.clone())
            .await
            .expect("Failed to bind control socket");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind server listener");
        let addr = listener.local_addr().unwrap();

        let plane = FramedPlane::new(manager.clone(), catalog.clone(), auth, None);
        let plane_task = tokio::spawn(async move {
            if let Err(e) = plane.run_with_listener(listener).await {
                tracing::error!("Framed plane error: {}", e);
            }
        });

        Self {
            addr,
            control_path,
            catalog,
            manager,
            _control: control,
            _tmp: tmp,
            plane_task,
        }
    }

    /// Register a client with the shared test secret.
    pub async fn seed_client(&self, client_id: &str) {
        self.catalog
            .create_client(client_id, client_id, TEST_SECRET)
            .await
            .expect("Failed to seed client");
    }

    /// Register an enabled port mapping and return its id.
    pub async fn seed_port(&self, client_id: &str, exposed_port: u16, target_port: u16) -> i64 {
        self.catalog
            .add_port(client_id, exposed_port, None, target_port)
            .await
            .expect("Failed to seed port")
    }

    /// Send one command over the control socket and return the full reply.
    pub async fn control(&self, command: &str) -> String {
        let mut stream = UnixStream::connect(&self.control_path)
            .await
            .expect("Failed to connect to control socket");
        stream
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .expect("Failed to send control command");

        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .await
            .expect("Failed to read control reply");
        reply
    }

    /// Wait until a client session is registered and exposes `port`.
    pub async fn wait_for_listener(&self, client_id: &str, port: u16) -> bool {
        wait_for(
            || async {
                match self.manager.get(client_id) {
                    Some(session) => session.active_ports().await.contains(&port),
                    None => false,
                }
            },
            Duration::from_secs(5),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.plane_task.abort();
    }
}

/// A real agent run against a [`TestServer`].
pub struct TestAgent {
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestAgent {
    pub fn start(server: &TestServer, client_id: &str) -> Self {
        let config = AgentConfig {
            server_address: server.addr.to_string(),
            client_id: client_id.to_string(),
            auth_token: TEST_SECRET.to_string(),
            reconnect_delay: Duration::from_millis(200),
            max_retries: 5,
            transport: TransportKind::Framed,
            tls: AgentTlsConfig {
                enabled: false,
                ca_file: "unused".into(),
                cert_file: None,
                key_file: None,
            },
        };

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(runtime::run(config, shutdown.clone()));

        Self { shutdown, task }
    }

    /// Cooperative shutdown; waits for the runtime to wind down.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
