//! Mock venue stream server.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and record the request path of each
//! - Push text frames to every open connection
//! - Drop every open connection to simulate a network failure

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    DropAll,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    paths: Arc<Mutex<Vec<String>>>,
    open: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (commands, _) = broadcast::channel::<Command>(64);
        let paths: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let open: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

        let commands_clone = commands.clone();
        let paths_clone = paths.clone();
        let open_clone = open.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let rx = commands_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            rx,
                            paths_clone.clone(),
                            open_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            paths,
            open,
        }
    }

    /// Base URL (`ws://127.0.0.1:<port>`).
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Request paths of every accepted connection, in order.
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn open_connections(&self) -> u32 {
        *self.open.lock().unwrap()
    }

    /// Push a text frame to every open connection.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Send(text.into()));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_all(&self) {
        let _ = self.commands.send(Command::DropAll);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut commands: broadcast::Receiver<Command>,
    paths: Arc<Mutex<Vec<String>>>,
    open: Arc<Mutex<u32>>,
) {
    let record = paths.clone();
    let callback = move |req: &Request, resp: Response| {
        record.lock().unwrap().push(req.uri().to_string());
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    *open.lock().unwrap() += 1;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Ok(Command::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::DropAll) | Err(_) => break,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    *open.lock().unwrap() -= 1;
}
