use std::io;
use std::sync::Arc;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::ParrotEngine;
use crate::envelope;

// --- OpCodes ---
pub const OP_CHECK: u8   = 0x01;
pub const OP_ADMIT: u8   = 0x02;
pub const OP_PROCESS: u8 = 0x03;
pub const OP_STATS: u8   = 0x04;
pub const OP_SAVE: u8    = 0x05;

// --- Response status ---
pub const STATUS_OK: u8  = 0x00;
pub const STATUS_ERR: u8 = 0x01;

/// Largest accepted request body. Bigger frames close the connection.
pub const MAX_FRAME: usize = 1 << 20;

type Reply = (u8, Vec<u8>);

/// Binary protocol front-end.
///
/// Request: `[op u8][len u32 LE][body]`, body is a JSON message envelope
/// (empty for STATS and SAVE). Response: `[status u8][len u32 LE][json]`.
pub struct ParrotServer {
    engine: Arc<ParrotEngine>,
}

impl ParrotServer {
    pub fn new(engine: Arc<ParrotEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Parrot listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("Client connected: {}", peer);
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, engine).await {
                            // Ignore expected disconnections to keep logs clean
                            if e.kind() != io::ErrorKind::UnexpectedEof {
                                warn!("Client error: {}", e);
                            }
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, engine: Arc<ParrotEngine>) -> io::Result<()> {
    let mut body = Vec::new();

    loop {
        // 1. Header: op + length
        let mut header = [0u8; 5];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        let op_code = header[0];
        let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;

        // 2. Body
        if length > MAX_FRAME {
            warn!("Payload too large: {} bytes (max {})", length, MAX_FRAME);
            return Ok(());
        }
        body.resize(length, 0);
        stream.read_exact(&mut body).await?;

        // 3. Process
        let Some((status, reply)) = dispatch(op_code, &body, &engine).await else {
            warn!("Unknown OpCode: 0x{:02X}", op_code);
            return Ok(());
        };

        let mut writer = BufWriter::new(&mut stream);
        write_frame(&mut writer, status, &reply).await?;
        writer.flush().await?;
    }
}

async fn dispatch(op_code: u8, body: &[u8], engine: &Arc<ParrotEngine>) -> Option<Reply> {
    let reply = match op_code {
        OP_CHECK => match envelope::message_from_slice(body, engine.now_millis()) {
            Ok(msg) => ok(&engine.check(&msg).await),
            Err(e) => bad_request(e),
        },
        OP_ADMIT => match envelope::message_from_slice(body, engine.now_millis()) {
            Ok(msg) => ok(&json!({ "admitted": engine.admit(&msg).await })),
            Err(e) => bad_request(e),
        },
        OP_PROCESS => match envelope::message_from_slice(body, engine.now_millis()) {
            Ok(msg) => ok(&engine.process_reply(&msg).await),
            Err(e) => bad_request(e),
        },
        OP_STATS => ok(&engine.stats()),
        OP_SAVE => handle_save(engine).await,
        _ => return None,
    };
    Some(reply)
}

async fn handle_save(engine: &Arc<ParrotEngine>) -> Reply {
    // Snapshot I/O is blocking
    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || engine.save_now()).await {
        Ok(Ok(bytes)) => ok(&json!({ "saved": bytes.is_some(), "bytes": bytes })),
        Ok(Err(e)) => {
            error!("Snapshot failed: {}", e);
            failure(e)
        }
        Err(e) => {
            error!("Snapshot task error: {}", e);
            failure(e)
        }
    }
}

fn ok<T: Serialize>(value: &T) -> Reply {
    match serde_json::to_vec(value) {
        Ok(bytes) => (STATUS_OK, bytes),
        Err(e) => failure(e),
    }
}

fn bad_request(e: serde_json::Error) -> Reply {
    debug!("Rejected envelope: {}", e);
    failure(format!("invalid envelope: {}", e))
}

fn failure(e: impl ToString) -> Reply {
    let body = json!({ "error": e.to_string() }).to_string().into_bytes();
    (STATUS_ERR, body)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, tag: u8, body: &[u8]) -> io::Result<()> {
    writer.write_all(&[tag]).await?;
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await
}
