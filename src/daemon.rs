//! WebSocket server for the tenant file manager
//!
//! Every connection may address any tenant; the tenant name travels with
//! each request and selects the sandbox root.

use crate::filemanager::archive::DownloadStream;
use crate::filemanager::{config::FileManagerConfig, FileManagerService};
use crate::protocol::{ClientMessage, FileManagerResponse, ServerMessage};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    WebSocketStream,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Largest client message accepted; requests are small JSON documents.
const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Network settings for `serve`
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: String,
    pub port: u16,
    /// When set, the first message must be a `hello` carrying this token
    pub auth_token: Option<String>,
}

pub struct DaemonState {
    pub file_manager: FileManagerService,
    pub auth_token: Option<String>,
}

pub type SharedState = Arc<DaemonState>;

/// Run the server until Ctrl+C or SIGTERM.
pub async fn run(config: FileManagerConfig, options: ServerOptions) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.storage_root)?;
    std::fs::create_dir_all(&config.upload_staging_dir)?;
    tracing::info!("Serving tenants from {}", config.storage_root.display());

    let state: SharedState = Arc::new(DaemonState {
        file_manager: FileManagerService::new(config),
        auth_token: options.auth_token.filter(|t| !t.trim().is_empty()),
    });

    let listener = TcpListener::bind(format!("{}:{}", options.bind, options.port)).await?;
    tracing::info!("File manager WebSocket server on {}:{}", options.bind, options.port);

    #[cfg(unix)]
    run_server_loop_unix(listener, state).await;

    #[cfg(not(unix))]
    run_server_loop_ctrlc_only(listener, state).await;

    Ok(())
}

/// Server loop with Unix signal handling (SIGTERM + Ctrl+C)
#[cfg(unix)]
async fn run_server_loop_unix(listener: TcpListener, state: SharedState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to set up SIGTERM handler: {}. Only Ctrl+C will work for shutdown.", e);
            run_server_loop_ctrlc_only(listener, state).await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_connection(stream, addr, state.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Server shutting down (Ctrl+C)");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Server shutting down (SIGTERM)");
                break;
            }
        }
    }
}

/// Server loop with Ctrl+C only (fallback or non-Unix)
async fn run_server_loop_ctrlc_only(listener: TcpListener, state: SharedState) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_connection(stream, addr, state.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Server shutting down (Ctrl+C)");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) {
    if let Err(e) = handle_connection(stream, addr, state).await {
        tracing::warn!("Connection {} ended with error: {}", addr, e);
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) -> Result<(), BoxError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    };
    let ws = accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut tx, mut rx) = ws.split();
    tracing::info!("Client connected: {}", addr);

    let mut authenticated = state.auth_token.is_none();
    while let Some(result) = rx.next().await {
        match result? {
            Message::Text(text) => {
                let msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!("Unparsable message from {}: {}", addr, e);
                        send(&mut tx, &ServerMessage::Error {
                            code: "400".to_string(),
                            message: format!("Unrecognized message: {}", e),
                        })
                        .await?;
                        continue;
                    }
                };

                if !authenticated {
                    if !hello_matches(&msg, state.auth_token.as_deref()) {
                        tracing::warn!("Rejecting unauthenticated client {}", addr);
                        send(&mut tx, &ServerMessage::Error {
                            code: "401".to_string(),
                            message: "Authentication required.".to_string(),
                        })
                        .await?;
                        let _ = tx.send(Message::Close(None)).await;
                        break;
                    }
                    authenticated = true;
                }

                process_client_msg(msg, &state, &mut tx, authenticated).await?;
            }
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!("Client disconnected: {}", addr);
    Ok(())
}

fn hello_matches(msg: &ClientMessage, expected: Option<&str>) -> bool {
    match (msg, expected) {
        (_, None) => true,
        (ClientMessage::Hello { auth_token: Some(token), .. }, Some(expected)) => {
            token.len() == expected.len() && bool::from(token.as_bytes().ct_eq(expected.as_bytes()))
        }
        _ => false,
    }
}

async fn process_client_msg(
    msg: ClientMessage,
    state: &SharedState,
    tx: &mut WsSink,
    authenticated: bool,
) -> Result<(), BoxError> {
    let file_manager = &state.file_manager;
    match msg {
        ClientMessage::Hello { client_version, .. } => {
            tracing::debug!("Client hello (version {})", client_version);
            send(tx, &ServerMessage::Welcome {
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                authenticated,
            })
            .await?;
        }
        ClientMessage::Ping => send(tx, &ServerMessage::Pong).await?,
        ClientMessage::FileAction {
            request_id,
            tenant,
            request,
        } => {
            let response = file_manager.dispatch(&tenant, &request).await;
            send(tx, &ServerMessage::FileResponse { request_id, response }).await?;
        }
        ClientMessage::Download {
            request_id,
            tenant,
            request,
        } => match file_manager.download(&tenant, &request).await {
            Ok(stream) => {
                let chunk_size = file_manager.config().download_chunk_size;
                stream_download(tx, request_id, stream, chunk_size).await?;
            }
            Err(e) => {
                tracing::warn!("Download for {} failed: {}", tenant, e);
                let response = FileManagerResponse::failure(&e);
                send(tx, &ServerMessage::FileResponse { request_id, response }).await?;
            }
        },
        ClientMessage::Upload {
            request_id,
            tenant,
            request,
        } => {
            let response = file_manager.upload(&tenant, &request).await;
            send(tx, &ServerMessage::FileResponse { request_id, response }).await?;
        }
        ClientMessage::GetImage {
            request_id,
            tenant,
            path,
        } => match file_manager.image(&tenant, &path).await {
            Ok((content_type, bytes)) => {
                send(tx, &ServerMessage::Image {
                    request_id,
                    content_type,
                    data: BASE64.encode(&bytes),
                })
                .await?;
            }
            Err(e) => {
                tracing::debug!("Image {} for {} failed: {}", path, tenant, e);
                let response = FileManagerResponse::failure(&e);
                send(tx, &ServerMessage::FileResponse { request_id, response }).await?;
            }
        },
    }
    Ok(())
}

async fn send(tx: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
    tx.send(Message::Text(serde_json::to_string(msg)?)).await?;
    Ok(())
}

/// Announce the download, then send its body in checksummed chunks.
///
/// The stream (and any staged archive) is dropped when this returns,
/// whether or not the client stayed connected.
async fn stream_download(
    tx: &mut WsSink,
    request_id: String,
    stream: DownloadStream,
    chunk_size: u64,
) -> Result<(), BoxError> {
    send(tx, &ServerMessage::DownloadStart {
        request_id: request_id.clone(),
        file_name: stream.file_name.clone(),
        content_type: stream.content_type.clone(),
        content_length: stream.content_length,
    })
    .await?;

    let mut file = stream.open().await?;
    let mut buf = vec![0u8; chunk_size.max(1) as usize];
    let mut sent = 0u64;
    let mut chunk_index = 0u64;
    loop {
        let n = read_chunk(&mut file, &mut buf).await?;
        sent += n as u64;
        let is_last = n < buf.len() || sent >= stream.content_length;
        send(tx, &chunk_message(&request_id, chunk_index, &buf[..n], is_last)).await?;
        if is_last {
            break;
        }
        chunk_index += 1;
    }

    tracing::debug!(
        "Sent {} {} ({} bytes, {} chunks)",
        if stream.is_archive() { "archive" } else { "file" },
        stream.file_name,
        sent,
        chunk_index + 1
    );
    Ok(())
}

/// Fill `buf` unless the file ends first.
async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn chunk_message(request_id: &str, chunk_index: u64, data: &[u8], is_last: bool) -> ServerMessage {
    ServerMessage::DownloadChunk {
        request_id: request_id.to_string(),
        chunk_index,
        data: BASE64.encode(data),
        checksum: format!("{:x}", md5::compute(data)),
        is_last,
    }
}
