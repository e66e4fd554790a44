//! Unix socket server for hallpassd

use hallpass_api::{ClientInfo, ClientRole, Command, Event, Request, Response};
use hallpass_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// What the connection tasks report up to the dispatch loop
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

/// The socket server.
///
/// Each connection gets a reader task (parses request lines, forwards
/// them to the dispatch loop) and a writer task (serializes responses
/// and, for subscribed clients, broadcast events). The dispatch loop
/// in the daemon owns all decisions; this layer only moves frames.
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Bind the socket. A leftover socket file from a previous run is
    /// replaced. Permissions allow owner and group only; kiosk accounts
    /// join the daemon's group.
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);
        Ok(())
    }

    /// Take the dispatch-loop end of the message channel. Yields once.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections forever.
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid);

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id.clone();
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    info: info.clone(),
                    response_tx,
                    subscribed: false,
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                // Subscription state lives here so the
                                // writer task can filter events without a
                                // round trip through the dispatch loop
                                match request.command {
                                    Command::SubscribeEvents => {
                                        set_subscribed(&clients, &reader_id, true).await;
                                    }
                                    Command::UnsubscribeEvents => {
                                        set_subscribed(&clients, &reader_id, false).await;
                                    }
                                    _ => {}
                                }

                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Unparseable request line");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        let mut event_rx = self.event_tx.subscribe();
        let writer_clients = self.clients.clone();
        let writer_message_tx = self.message_tx.clone();
        let writer_id = client_id;

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                tokio::select! {
                    response = response_rx.recv() => {
                        let Some(mut msg) = response else { break };
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %writer_id, error = %e, "Write error");
                            break;
                        }
                    }

                    event = event_rx.recv() => {
                        let event = match event {
                            Ok(event) => event,
                            // Missed events are acceptable; the next
                            // state_changed carries the full board
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let subscribed = {
                            let clients = writer_clients.read().await;
                            clients.get(&writer_id).map(|h| h.subscribed).unwrap_or(false)
                        };
                        if !subscribed {
                            continue;
                        }

                        match serde_json::to_string(&event) {
                            Ok(mut msg) => {
                                msg.push('\n');
                                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                    debug!(client_id = %writer_id, error = %e, "Event write error");
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "Event serialization failed");
                            }
                        }
                    }
                }
            }

            let _ = writer_message_tx.send(ServerMessage::ClientDisconnected {
                client_id: writer_id.clone(),
            });
            let mut clients = writer_clients.write().await;
            clients.remove(&writer_id);
        });
    }

    /// Queue a response line for one client.
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Fan an event out to every subscribed client.
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file.
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn set_subscribed(
    clients: &Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    client_id: &ClientId,
    subscribed: bool,
) {
    let mut clients = clients.write().await;
    if let Some(handle) = clients.get_mut(client_id) {
        handle.subscribed = subscribed;
    }
}

/// Map a peer UID to a role: the daemon's own user and root run the
/// teacher dashboard; anything else is a student kiosk.
fn role_for_uid(uid: Option<u32>) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Teacher,
        Some(u) if u == nix::unistd::getuid().as_raw() => ClientRole::Teacher,
        _ => ClientRole::Kiosk,
    }
}

fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();
    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}
