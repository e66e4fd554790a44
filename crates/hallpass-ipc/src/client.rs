//! IPC client for hallpassd

use hallpass_api::{Command, Event, Request, Response, ResponseResult};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// Delay between attempts in [`IpcClient::connect_with_retry`].
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// A request/response connection to hallpassd.
///
/// Strictly lock-step: one request line out, one response line back,
/// and the response must echo the request's id. Clients that want
/// events call [`IpcClient::subscribe`], which consumes the
/// connection, since event lines would otherwise interleave with
/// responses.
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Connect, retrying until `wait` has elapsed.
    ///
    /// Kiosks and dashboards often come up in parallel with the daemon;
    /// this rides out the gap before the socket is bound. Gives back
    /// the last connection error once the wait is spent.
    pub async fn connect_with_retry(
        socket_path: impl AsRef<Path>,
        wait: Duration,
    ) -> IpcResult<Self> {
        let socket_path = socket_path.as_ref();
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            match UnixStream::connect(socket_path).await {
                Ok(stream) => return Ok(Self::from_stream(stream)),
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    return Err(IpcError::Io(e));
                }
                Err(_) => tokio::time::sleep(RETRY_DELAY).await,
            }
        }
    }

    fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        }
    }

    /// Send a command and wait for the matching response.
    ///
    /// A response carrying any other request id means the stream has
    /// desynchronized and no later pairing can be trusted, so it is
    /// surfaced as a hard error rather than skipped.
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut json = serde_json::to_string(&Request::new(request_id, command))?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        let response: Response = read_json_line(&mut self.reader).await?;
        if response.request_id != request_id {
            return Err(IpcError::RequestIdMismatch {
                sent: request_id,
                got: response.request_id,
            });
        }
        Ok(response)
    }

    /// Subscribe to events, turning this connection into an event stream.
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;
        match response.result {
            ResponseResult::Ok(_) => Ok(EventStream {
                reader: self.reader,
            }),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }
}

/// Stream of board events from hallpassd
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
}

impl EventStream {
    /// Wait for the next event.
    pub async fn next(&mut self) -> IpcResult<Event> {
        read_json_line(&mut self.reader).await
    }
}

/// Read one newline-delimited JSON value, mapping EOF to
/// [`IpcError::ConnectionClosed`].
async fn read_json_line<T: DeserializeOwned>(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
) -> IpcResult<T> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(serde_json::from_str(line.trim())?)
}
