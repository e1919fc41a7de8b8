// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol: length-prefixed JSON over a Unix socket
//!
//! Every message is a 4-byte big-endian length followed by that many bytes
//! of JSON. A connection carries one request and one response.

use std::time::Duration;

use keeper_core::{
    InstanceDraft, InstanceId, InstancePatch, InstanceSnapshot, ScheduledTask, TaskDraft, TaskId,
    TaskPatch,
};
use keeper_engine::ErrorKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reported in `Hello` responses
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read/write timeout for a single message
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest message body accepted
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Requests a client may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Hello { version: String },
    /// Daemon uptime and counts
    Status,
    Shutdown,

    ListInstances,
    GetInstance { id: InstanceId },
    CreateInstance { instance: InstanceDraft },
    UpdateInstance { id: InstanceId, patch: InstancePatch },
    DeleteInstance { id: InstanceId },
    StartInstance { id: InstanceId },
    StopInstance { id: InstanceId },
    RestartInstance { id: InstanceId },
    /// Raw text written to the instance's session
    SendInput { id: InstanceId, text: String },

    ListTasks {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_id: Option<InstanceId>,
    },
    GetTask { id: TaskId },
    CreateTask { task: TaskDraft },
    UpdateTask { id: TaskId, patch: TaskPatch },
    DeleteTask { id: TaskId },
    ToggleTask { id: TaskId, enabled: bool },
    RunTask { id: TaskId },
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Pong,
    Hello { version: String },
    ShuttingDown,
    Status {
        uptime_secs: u64,
        instances: usize,
        running: usize,
        tasks: usize,
        armed: usize,
    },
    Instances { instances: Vec<InstanceSnapshot> },
    Instance { instance: Box<InstanceSnapshot> },
    Started { session_id: String },
    InputSent { delivered: bool },
    Tasks { tasks: Vec<ScheduledTask> },
    Task { task: Box<ScheduledTask> },
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl ToString) -> Self {
        Response::Error {
            kind,
            message: message.to_string(),
        }
    }
}

/// Framing and transport failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
}

/// Serialize to a JSON body (no length prefix)
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write one length-prefixed message
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), ProtocolError> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::TooLarge(body.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message
///
/// EOF before the length prefix is `ConnectionClosed`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

async fn read_with_timeout<R, T>(reader: &mut R, timeout: Duration) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let body = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&body)
}

async fn write_with_timeout<W, T>(
    writer: &mut W,
    value: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(value)?;
    tokio::time::timeout(timeout, write_message(writer, &body))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    read_with_timeout(reader, timeout).await
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_with_timeout(writer, request, timeout).await
}

pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    read_with_timeout(reader, timeout).await
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_with_timeout(writer, response, timeout).await
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
