//! Local control channel.
//!
//! A Unix-domain stream socket accepting one newline-terminated command per
//! connection: `RELOAD <client_id>`, `LIST`, `KICK <client_id>`. The socket
//! file is world-writable; filesystem permissions are the only gate.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::manager::SessionManager;

pub struct ControlChannel {
    path: PathBuf,
    cancel: CancellationToken,
}

impl ControlChannel {
    /// Bind the control socket, replacing any stale socket file, and start
    /// serving commands.
    pub async fn bind(path: &Path, manager: Arc<SessionManager>) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)?;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o666);
        std::fs::set_permissions(path, permissions)?;

        tracing::info!("Control socket listening at {}", path.display());

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    result = listener.accept() => match result {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            tracing::warn!("Control socket accept error: {}", e);
                            continue;
                        }
                    },
                };

                let manager = manager.clone();
                tokio::spawn(handle_connection(stream, manager));
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            cancel,
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_connection(stream: UnixStream, manager: Arc<SessionManager>) {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = String::new();
    let mut reader = BufReader::new(read_half);
    if reader.read_line(&mut line).await.is_err() {
        return;
    }

    let reply = dispatch(&line, &manager).await;
    let _ = write_half.write_all(reply.as_bytes()).await;
}

async fn dispatch(line: &str, manager: &SessionManager) -> String {
    let line = line.trim();
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "RELOAD" => {
            if arg.is_empty() {
                return "ERROR: client_id required\n".to_string();
            }
            // A disconnected client is a successful no-op
            match manager.reload(arg).await {
                Ok(_) => "OK\n".to_string(),
                Err(e) => format!("ERROR: {}\n", e),
            }
        }
        "LIST" => {
            let mut reply = String::new();
            for client_id in manager.connected_ids() {
                reply.push_str(&client_id);
                reply.push('\n');
            }
            reply.push_str("OK\n");
            reply
        }
        "KICK" => {
            if arg.is_empty() {
                return "ERROR: client_id required\n".to_string();
            }
            match manager.get(arg) {
                Some(session) => {
                    session.close_mux().await;
                    "OK\n".to_string()
                }
                None => "ERROR: client not connected\n".to_string(),
            }
        }
        _ => "ERROR: unknown command\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_without_sessions() {
        let manager = SessionManager::new();

        assert_eq!(dispatch("LIST\n", &manager).await, "OK\n");
        assert_eq!(dispatch("RELOAD ghost\n", &manager).await, "OK\n");
        assert_eq!(
            dispatch("KICK ghost\n", &manager).await,
            "ERROR: client not connected\n"
        );
        assert_eq!(
            dispatch("RELOAD\n", &manager).await,
            "ERROR: client_id required\n"
        );
        assert_eq!(
            dispatch("KICK\n", &manager).await,
            "ERROR: client_id required\n"
        );
        assert_eq!(
            dispatch("FLUSH all\n", &manager).await,
            "ERROR: unknown command\n"
        );
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("culvert.sock");

        // Leave a stale file behind
        std::fs::write(&path, b"stale").unwrap();

        let manager = SessionManager::new();
        let control = ControlChannel::bind(&path, manager).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        control.shutdown();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_command_roundtrip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("culvert.sock");

        let manager = SessionManager::new();
        let _control = ControlChannel::bind(&path, manager).await.unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"LIST\n").await.unwrap();

        let mut reply = String::new();
        let mut reader = BufReader::new(stream);
        reader.read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "OK\n");
    }
}
