//! Control commands and the control socket.
//!
//! The socket speaks newline-delimited JSON: one [`Request`] per line in, one
//! [`Response`] per line out.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::datapath::{Datapath, DropStats};
use crate::device::MacAddr;
use crate::error::VnicError;
use crate::host::Host;
use crate::manager::Manager;
use crate::status::{InterfaceStats, StatusRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Add,
    Delete,
}

/// Add or delete one virtual interface.
///
/// `physical_interface_name` is ignored for `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub cmd: Command,
    #[serde(default)]
    pub physical_interface_name: String,
    pub virtual_interface_name_prefix: String,
    pub port: u16,
}

/// Error kinds reported to control clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Mismatch,
    ResourceExhausted,
    AlreadyRegistered,
    Internal,
    PortOutOfRange,
    InvalidName,
    NetworkDown,
    Busy,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlReply {
    pub fn success() -> Self {
        ControlReply {
            ok: true,
            code: None,
            message: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        ControlReply {
            ok: false,
            code: Some(code),
            message: Some(message.into()),
        }
    }
}

impl From<&VnicError> for ControlReply {
    fn from(e: &VnicError) -> Self {
        ControlReply::failure(e.code(), e.to_string())
    }
}

impl From<Result<(), VnicError>> for ControlReply {
    fn from(result: Result<(), VnicError>) -> Self {
        match result {
            Ok(()) => ControlReply::success(),
            Err(e) => ControlReply::from(&e),
        }
    }
}

/// One request on the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Command(ControlCommand),
    Status,
    Stats,
    Open { name: String },
    Stop { name: String },
    SetMac { name: String, mac: MacAddr },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Reply(ControlReply),
    Status {
        rows: Vec<StatusRow>,
    },
    Stats {
        interfaces: Vec<InterfaceStats>,
        drops: DropStats,
    },
}

/// Dispatch one request to the manager.
pub fn handle_request<H: Host>(
    manager: &Manager<H>,
    datapath: &Datapath<H>,
    request: Request,
) -> Response {
    match request {
        Request::Command(command) => Response::Reply(manager.execute(&command)),
        Request::Status => Response::Status {
            rows: manager.status(),
        },
        Request::Stats => Response::Stats {
            interfaces: manager.stats(),
            drops: datapath.drop_stats(),
        },
        Request::Open { name } => Response::Reply(manager.open(&name).into()),
        Request::Stop { name } => Response::Reply(manager.stop(&name).into()),
        Request::SetMac { name, mac } => {
            Response::Reply(manager.set_mac_address(&name, mac).into())
        }
    }
}

/// Parse and dispatch one request line, producing the response line.
pub fn handle_line<H: Host>(manager: &Manager<H>, datapath: &Datapath<H>, line: &str) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(manager, datapath, request),
        Err(e) => {
            debug!(error = %e, "Malformed control request");
            Response::Reply(ControlReply::failure(
                ErrorCode::BadRequest,
                format!("malformed request: {e}"),
            ))
        }
    };
    // Response only holds strings, integers and plain enums.
    serde_json::to_string(&response).unwrap_or_else(|e| internal_error_line(&e.to_string()))
}

/// Reply line used when a response cannot be serialized.
fn internal_error_line(message: &str) -> String {
    serde_json::json!({
        "kind": "reply",
        "ok": false,
        "code": "internal",
        "message": message,
    })
    .to_string()
}

/// Unix socket server for control requests.
pub struct ControlServer<H: Host> {
    manager: Arc<Manager<H>>,
    datapath: Arc<Datapath<H>>,
    listener: UnixListener,
    path: PathBuf,
}

impl<H: Host + 'static> ControlServer<H> {
    /// Bind the control socket, replacing a stale socket file.
    pub fn bind(
        path: impl AsRef<Path>,
        manager: Arc<Manager<H>>,
        datapath: Arc<Datapath<H>>,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Control socket listening");

        Ok(Self {
            manager,
            datapath,
            listener,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&self.manager);
                    let datapath = Arc::clone(&self.datapath);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, manager, datapath).await {
                            warn!(error = %e, "Control connection failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept control connection");
                }
            }
        }
    }
}

impl<H: Host> Drop for ControlServer<H> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_connection<H: Host>(
    stream: UnixStream,
    manager: Arc<Manager<H>>,
    datapath: Arc<Datapath<H>>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut response = handle_line(&manager, &datapath, &line);
        response.push('\n');
        writer.write_all(response.as_bytes()).await?;
    }
    Ok(())
}

/// Send one request to a control socket and wait for the response.
pub async fn request(path: impl AsRef<Path>, request: &Request) -> io::Result<Response> {
    let stream = UnixStream::connect(path).await?;
    let (reader, mut writer) = stream.into_split();

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "control socket closed"))?;
    Ok(serde_json::from_str(&reply)?)
}
