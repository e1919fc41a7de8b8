// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session callbacks from the provider into the orchestrator

use crate::orchestrator::Inner;
use async_trait::async_trait;
use keeper_adapters::{SessionProvider, SessionSink};
use keeper_core::{Clock, Event, IdGen, InstanceId, InstanceState};
use std::sync::Weak;

/// First thing a new session reports, delivered to the waiting `start`
#[derive(Debug)]
pub(crate) enum Readiness {
    Ready(Option<u32>),
    Failed(String),
    Exited(Option<i32>),
}

/// Sink handed to the provider for one session of one instance
pub(crate) struct InstanceSink<P, C, I> {
    instance_id: InstanceId,
    inner: Weak<Inner<P, C, I>>,
}

impl<P, C, I> InstanceSink<P, C, I> {
    pub(crate) fn new(instance_id: InstanceId, inner: Weak<Inner<P, C, I>>) -> Self {
        Self { instance_id, inner }
    }
}

#[async_trait]
impl<P, C, I> SessionSink for InstanceSink<P, C, I>
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    async fn ready(&self, session_id: &str, pid: Option<u32>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.resolve_pending(session_id, Readiness::Ready(pid)) {
            tracing::debug!(instance_id = %self.instance_id, session_id, "late ready ignored");
        }
    }

    async fn output(&self, session_id: &str, data: &[u8]) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let bound = inner
            .statuses()
            .get(&self.instance_id)
            .is_some_and(|s| s.is_bound_to(session_id));
        if bound {
            inner.bus.publish(Event::InstanceOutput {
                instance_id: self.instance_id.clone(),
                data: data.to_vec(),
            });
        }
    }

    async fn exit(&self, session_id: &str, code: Option<i32>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.resolve_pending(session_id, Readiness::Exited(code)) {
            return;
        }

        let now = inner.clock.now();
        let status = inner.update_bound(&self.instance_id, session_id, |status| {
            // A start that never reached running is a failed start
            if status.state == InstanceState::Starting {
                status.mark_error(format!("session exited while starting (code {:?})", code));
            } else {
                status.mark_stopped(now);
            }
        });
        match status {
            Some(status) => {
                tracing::info!(instance_id = %self.instance_id, session_id, ?code, "session exited");
                inner.transitioned(&self.instance_id, &status);
            }
            None => {
                tracing::debug!(instance_id = %self.instance_id, session_id, "exit of unbound session")
            }
        }
    }

    async fn error(&self, session_id: &str, message: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.resolve_pending(session_id, Readiness::Failed(message.to_string())) {
            return;
        }

        let status = inner.update_bound(&self.instance_id, session_id, |status| {
            status.mark_error(message)
        });
        if let Some(status) = status {
            tracing::error!(instance_id = %self.instance_id, session_id, error = message, "session failed");
            inner.transitioned(&self.instance_id, &status);
        }
    }
}
