//! Relay daemon over real sockets
//!
//! Starts a [`RelayServer`] on an ephemeral port and drives it with
//! WebSocket clients speaking the panelsync wire protocol, then with the
//! real primary and remote runtimes through restarts of either side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use panelsync_core::{
    AuthorityConfig, BroadcastMessage, ClientType, Collaborators, CommandMessage, ConnectionRole,
    LifecycleMessage, LocalCommand, LoggingEvaluator, MemoryPersistence, PanelConfig, PanelId,
    PanelSummary, Position, PrimaryHandle, PrimaryRuntime, ReconnectPolicy, Relay, RelayConfig,
    RemoteHandle, RemoteRuntime, TracingSurface, ViewStatus, WireMessage,
};
use panelsync_relay::RelayServer;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    addr: SocketAddr,
    relay: Relay,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn start(config: RelayConfig) -> Self {
        Self::start_at("127.0.0.1:0".parse().unwrap(), config).await
    }

    /// Serve on `addr`; used to bring a relay back on its old port
    async fn start_at(addr: SocketAddr, config: RelayConfig) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RelayServer::new(config);
        let relay = server.relay().clone();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));
        Self {
            addr,
            relay,
            shutdown: Some(tx),
            task,
        }
    }

    async fn client(&self, client_type: ClientType) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        send(&mut ws, &WireMessage::register(client_type)).await;
        ws
    }

    async fn wait_for(&self, role: ConnectionRole, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.relay.registry().count_by_role(role) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never saw {count} {role:?} connections"));
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn send(ws: &mut Client, message: &WireMessage) {
    ws.send(Message::Text(message.to_json().unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Client) -> WireMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return WireMessage::parse(&text).unwrap();
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

#[tokio::test]
async fn test_remote_handshake_and_command_routing() {
    let running = Running::start(RelayConfig::default()).await;

    let mut primary = running.client(ClientType::Main).await;
    running.wait_for(ConnectionRole::Primary, 1).await;

    let mut remote = running.client(ClientType::Remote).await;
    assert_eq!(
        recv(&mut primary).await,
        WireMessage::Lifecycle(LifecycleMessage::RequestFullState)
    );

    let baseline = WireMessage::Broadcast(BroadcastMessage::FullState {
        panels: vec![PanelSummary {
            id: PanelId::from("panel_1_0"),
            title: "Drums".to_string(),
            playing: true,
            stale: false,
            position: Position::new(10.0, 20.0),
        }],
        timestamp: 1,
    });
    send(&mut primary, &baseline).await;
    assert_eq!(recv(&mut remote).await, baseline);

    let play = WireMessage::Command(CommandMessage::PanelPlay {
        panel: PanelId::from("panel_1_0"),
    });
    send(&mut remote, &play).await;
    assert_eq!(recv(&mut primary).await, play);

    running.stop().await;
}

#[tokio::test]
async fn test_remote_learns_primary_status() {
    let running = Running::start(RelayConfig::default()).await;

    let mut remote = running.client(ClientType::Remote).await;
    assert_eq!(
        recv(&mut remote).await,
        WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected: false })
    );

    let mut primary = running.client(ClientType::Main).await;
    assert_eq!(
        recv(&mut remote).await,
        WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected: true })
    );

    primary.close(None).await.unwrap();
    assert_eq!(
        recv(&mut remote).await,
        WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected: false })
    );
    running.wait_for(ConnectionRole::Primary, 0).await;

    running.stop().await;
}

#[tokio::test]
async fn test_health_reports_connections_by_role() {
    let running = Running::start(RelayConfig::default()).await;

    let _primary = running.client(ClientType::Main).await;
    let _remote = running.client(ClientType::Remote).await;
    running.wait_for(ConnectionRole::Primary, 1).await;
    running.wait_for(ConnectionRole::Remote, 1).await;

    let response = http_get(running.addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let report: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(report["status"], "ok");
    assert_eq!(report["primary_connected"], true);
    assert_eq!(report["primaries"], 1);
    assert_eq!(report["remotes"], 1);
    assert_eq!(report["total_connections"], 2);

    running.stop().await;
}

#[tokio::test]
async fn test_static_directory_is_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("remote.html"), "<h1>remote</h1>").unwrap();
    let config = RelayConfig {
        static_dir: Some(dir.path().to_path_buf()),
        ..RelayConfig::default()
    };
    let running = Running::start(config).await;

    let response = http_get(running.addr, "/remote.html").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(body(&response), "<h1>remote</h1>");

    let missing = http_get(running.addr, "/nope.html").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    running.stop().await;
}

#[tokio::test]
async fn test_binary_and_malformed_frames_are_dropped() {
    let running = Running::start(RelayConfig::default()).await;

    let mut primary = running.client(ClientType::Main).await;
    running.wait_for(ConnectionRole::Primary, 1).await;
    let mut remote = running.client(ClientType::Remote).await;
    assert_eq!(
        recv(&mut primary).await,
        WireMessage::Lifecycle(LifecycleMessage::RequestFullState)
    );

    remote
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .unwrap();
    remote
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();

    // The next frame the primary sees is the valid command sent after them
    let stop = WireMessage::Command(CommandMessage::StopAll);
    send(&mut remote, &stop).await;
    assert_eq!(recv(&mut primary).await, stop);

    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let running = Running::start(RelayConfig::default()).await;
    let mut remote = running.client(ClientType::Remote).await;
    recv(&mut remote).await;

    running.stop().await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match remote.next().await {
                None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket stayed open after shutdown");
}

// =============================================================================
// Client runtimes against a live relay
// =============================================================================

struct Spawned {
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Spawned {
    fn run<F>(run: impl FnOnce(oneshot::Receiver<()>) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop, rx) = oneshot::channel();
        Self {
            stop,
            task: tokio::spawn(run(rx)),
        }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("runtime did not stop")
            .unwrap();
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        delay: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(1),
    }
}

async fn start_primary(
    addr: SocketAddr,
    persistence: Arc<MemoryPersistence>,
) -> (Spawned, PrimaryHandle) {
    let (mut runtime, handle) = PrimaryRuntime::new(
        format!("ws://{addr}/ws"),
        fast_policy(),
        AuthorityConfig::default(),
        Collaborators {
            evaluator: Arc::new(LoggingEvaluator::new()),
            surface: Arc::new(TracingSurface),
            persistence,
        },
    );
    runtime.load().await.unwrap();
    let spawned = Spawned::run(|rx| {
        runtime.run(async move {
            let _ = rx.await;
        })
    });
    (spawned, handle)
}

fn start_remote(addr: SocketAddr) -> (Spawned, RemoteHandle) {
    let (runtime, handle) = RemoteRuntime::new(format!("ws://{addr}/ws"), fast_policy());
    let spawned = Spawned::run(|rx| {
        runtime.run(async move {
            let _ = rx.await;
        })
    });
    (spawned, handle)
}

/// Wait until the remote is live and shows exactly the primary's panels
async fn wait_until_mirrored(primary: &PrimaryHandle, remote: &RemoteHandle) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = remote.view();
            if let Some(snapshot) = primary.snapshot().await {
                let shown: Vec<_> = view
                    .panels()
                    .iter()
                    .map(|p| (p.id.clone(), p.title.clone(), p.playing, p.stale))
                    .collect();
                let expected: Vec<_> = snapshot
                    .panels
                    .iter()
                    .map(|p| (p.id.clone(), p.title.clone(), p.playing, p.stale))
                    .collect();
                if view.status() == ViewStatus::Live && shown == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    if result.is_err() {
        let view = remote.view();
        panic!(
            "remote never mirrored the primary: status={:?} panels={:?} snapshot={:?}",
            view.status(),
            view.panels(),
            primary.snapshot().await.map(|s| s.panels)
        );
    }
}

async fn wait_for_status(remote: &RemoteHandle, status: ViewStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while remote.view().status() != status {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("remote never reached {status:?}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runtimes_recover_from_primary_and_relay_restarts() {
    let running = Running::start(RelayConfig::default()).await;
    let addr = running.addr;
    let persistence = Arc::new(MemoryPersistence::new());

    let (primary_task, primary) = start_primary(addr, persistence.clone()).await;
    let (remote_task, remote) = start_remote(addr);

    let bass = primary
        .create_panel(PanelConfig::titled("Bass").with_source("s(\"bass\")"))
        .await
        .unwrap();
    primary
        .create_panel(PanelConfig::titled("Pad"))
        .await
        .unwrap();
    assert!(primary.send(LocalCommand::Play(bass.clone())).await);
    wait_until_mirrored(&primary, &remote).await;
    assert!(remote.view().panel(&bass).unwrap().playing);

    // Commands from the remote reach the authority through the relay
    assert!(remote.send(CommandMessage::PanelPause { panel: bass.clone() }).await);
    wait_until_mirrored(&primary, &remote).await;
    assert!(!remote.view().panel(&bass).unwrap().playing);

    // Primary goes away and comes back with its persisted panels
    primary_task.stop().await;
    wait_for_status(&remote, ViewStatus::Disconnected).await;
    assert!(!remote.view().controls_enabled());

    let (primary_task, primary) = start_primary(addr, persistence.clone()).await;
    assert!(primary.send(LocalCommand::Play(bass.clone())).await);
    wait_until_mirrored(&primary, &remote).await;
    assert!(remote.view().panel(&bass).unwrap().playing);

    // Relay goes away; both clients reconnect to the new one on the same port
    running.stop().await;
    wait_for_status(&remote, ViewStatus::Disconnected).await;
    assert!(primary.send(LocalCommand::Pause(bass.clone())).await);

    let running = Running::start_at(addr, RelayConfig::default()).await;
    wait_until_mirrored(&primary, &remote).await;
    assert!(primary.status().is_connected());
    assert!(!remote.view().panel(&bass).unwrap().playing);
    assert_eq!(remote.view().panels().len(), 2);

    remote_task.stop().await;
    primary_task.stop().await;
    running.stop().await;
}
