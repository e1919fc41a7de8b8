// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::time::Instant;

use keeper_adapters::SessionProvider;
use keeper_core::{Clock, IdGen, InstanceState};
use keeper_engine::{LifecycleError, Orchestrator, TaskEngine, TaskError};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::protocol::{self, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Everything a connection handler needs; cheap to clone per connection
pub struct Context<P, C, I> {
    pub orchestrator: Orchestrator<P, C, I>,
    pub engine: TaskEngine<P, C, I>,
    pub started: Instant,
    pub shutdown: mpsc::Sender<()>,
}

impl<P, C, I> Clone for Context<P, C, I> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            engine: self.engine.clone(),
            started: self.started,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Handle a single client connection
pub async fn handle_connection<P, C, I>(
    ctx: &Context<P, C, I>,
    stream: UnixStream,
) -> Result<(), ServerError>
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    let (mut reader, mut writer) = stream.into_split();

    let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("Request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before sending request");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to read request: {}", e);
            return Err(ServerError::Protocol(e));
        }
    };

    debug!(?request, "received request");
    let response = handle_request(ctx, request).await;
    debug!(?response, "sending response");

    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
        .await
        .map_err(ServerError::Protocol)?;

    Ok(())
}

fn lifecycle_failure(e: LifecycleError) -> Response {
    Response::error(e.kind(), e)
}

fn task_failure(e: TaskError) -> Response {
    Response::error(e.kind(), e)
}

/// Handle a single request and return a response
pub async fn handle_request<P, C, I>(ctx: &Context<P, C, I>, request: Request) -> Response
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    let orchestrator = &ctx.orchestrator;
    let engine = &ctx.engine;

    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Status => {
            let instances = orchestrator.list();
            let running = instances
                .iter()
                .filter(|s| s.status.state == InstanceState::Running)
                .count();
            Response::Status {
                uptime_secs: ctx.started.elapsed().as_secs(),
                instances: instances.len(),
                running,
                tasks: engine.list_tasks().len(),
                armed: engine.armed_count(),
            }
        }

        Request::Shutdown => {
            if ctx.shutdown.try_send(()).is_err() {
                debug!("shutdown already requested");
            }
            Response::ShuttingDown
        }

        Request::ListInstances => Response::Instances {
            instances: orchestrator.list(),
        },

        Request::GetInstance { id } => match orchestrator.snapshot(&id) {
            Ok(snapshot) => Response::Instance {
                instance: Box::new(snapshot),
            },
            Err(e) => lifecycle_failure(e),
        },

        Request::CreateInstance { instance } => {
            match orchestrator
                .create_instance(instance)
                .and_then(|def| orchestrator.snapshot(&def.id))
            {
                Ok(snapshot) => Response::Instance {
                    instance: Box::new(snapshot),
                },
                Err(e) => lifecycle_failure(e),
            }
        }

        Request::UpdateInstance { id, patch } => {
            match orchestrator.update_instance(&id, patch).await {
                Ok(def) => match orchestrator.snapshot(&def.id) {
                    Ok(snapshot) => Response::Instance {
                        instance: Box::new(snapshot),
                    },
                    Err(e) => lifecycle_failure(e),
                },
                Err(e) => lifecycle_failure(e),
            }
        }

        Request::DeleteInstance { id } => match orchestrator.delete_instance(&id).await {
            Ok(_) => Response::Ok,
            Err(e) => lifecycle_failure(e),
        },

        Request::StartInstance { id } => match orchestrator.start(&id).await {
            Ok(session_id) => Response::Started { session_id },
            Err(e) => lifecycle_failure(e),
        },

        Request::StopInstance { id } => match orchestrator.stop(&id).await {
            Ok(()) => Response::Ok,
            Err(e) => lifecycle_failure(e),
        },

        Request::RestartInstance { id } => match orchestrator.restart(&id).await {
            Ok(session_id) => Response::Started { session_id },
            Err(e) => lifecycle_failure(e),
        },

        Request::SendInput { id, text } => match orchestrator.send_input(&id, &text).await {
            Ok(delivered) => Response::InputSent { delivered },
            Err(e) => lifecycle_failure(e),
        },

        Request::ListTasks { instance_id } => Response::Tasks {
            tasks: match instance_id {
                Some(instance_id) => engine.tasks_for_instance(&instance_id),
                None => engine.list_tasks(),
            },
        },

        Request::GetTask { id } => match engine.get_task(&id) {
            Some(task) => Response::Task {
                task: Box::new(task),
            },
            None => task_failure(TaskError::NotFound(id)),
        },

        Request::CreateTask { task } => match engine.create_task(task) {
            Ok(task) => Response::Task {
                task: Box::new(task),
            },
            Err(e) => task_failure(e),
        },

        Request::UpdateTask { id, patch } => match engine.update_task(&id, patch) {
            Ok(task) => Response::Task {
                task: Box::new(task),
            },
            Err(e) => task_failure(e),
        },

        Request::DeleteTask { id } => match engine.delete_task(&id) {
            Ok(_) => Response::Ok,
            Err(e) => task_failure(e),
        },

        Request::ToggleTask { id, enabled } => match engine.toggle_task(&id, enabled) {
            Ok(task) => Response::Task {
                task: Box::new(task),
            },
            Err(e) => task_failure(e),
        },

        Request::RunTask { id } => match engine.run_task_now(&id).await {
            Ok(()) => Response::Ok,
            Err(e) => task_failure(e),
        },
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
