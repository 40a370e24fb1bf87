//! In-memory transport that answers from a script.
//!
//! Replies are consumed in order; once the queue is empty every call gets the fallback
//! reply. Every attempt handed to the transport is recorded so callers can assert on
//! what would have gone over the wire.
use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};

use crate::{
    core::request::GatewayResponse,
    ports::transport::{OutgoingRequest, Transport, TransportError, TransportResult},
};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A response with the given status and an empty body.
    Status(u16),
    /// A response with a JSON body.
    Json(u16, serde_json::Value),
    /// The attempt timed out without a response.
    Timeout,
    /// The upstream refused the connection.
    ConnectionRefused,
    /// Wait, then answer with the inner reply.
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn delayed(delay: Duration, reply: ScriptedReply) -> Self {
        ScriptedReply::Delayed(delay, Box::new(reply))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Mutex<ScriptedReply>,
    healthy: AtomicBool,
    calls: Mutex<Vec<OutgoingRequest>>,
    probes: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// A transport answering `200` with an empty body and a healthy probe.
    pub fn new() -> Self {
        Self::with_fallback(ScriptedReply::Status(200))
    }

    pub fn with_fallback(fallback: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            healthy: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply for the next unanswered attempt.
    pub fn push(&self, reply: ScriptedReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Queue the same reply `times` times.
    pub fn push_n(&self, reply: ScriptedReply, times: usize) -> &Self {
        let mut replies = lock(&self.replies);
        replies.extend(std::iter::repeat_n(reply, times));
        drop(replies);
        self
    }

    pub fn set_fallback(&self, reply: ScriptedReply) {
        *lock(&self.fallback) = reply;
    }

    /// Outcome of subsequent health probes.
    pub fn set_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Attempts received so far, in arrival order.
    pub fn calls(&self) -> Vec<OutgoingRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// URLs probed so far.
    pub fn health_probes(&self) -> Vec<String> {
        lock(&self.probes).clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        match lock(&self.replies).pop_front() {
            Some(reply) => reply,
            None => lock(&self.fallback).clone(),
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutgoingRequest) -> TransportResult<GatewayResponse> {
        let timeout = request.timeout;
        let url = request.url.to_string();
        lock(&self.calls).push(request);

        let mut reply = self.next_reply();
        loop {
            match reply {
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                ScriptedReply::Status(status) => return response(status, Bytes::new(), None),
                ScriptedReply::Json(status, value) => {
                    let body = serde_json::to_vec(&value)
                        .map_err(|e| TransportError::Other(e.to_string()))?;
                    return response(status, Bytes::from(body), Some("application/json"));
                }
                ScriptedReply::Timeout => return Err(TransportError::Timeout(timeout)),
                ScriptedReply::ConnectionRefused => {
                    return Err(TransportError::ConnectionError(format!(
                        "connection refused: {url}"
                    )));
                }
            }
        }
    }

    async fn health_check(&self, url: &str, _timeout: Duration) -> TransportResult<bool> {
        lock(&self.probes).push(url.to_string());
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

fn response(
    status: u16,
    body: Bytes,
    content_type: Option<&'static str>,
) -> TransportResult<GatewayResponse> {
    let status = StatusCode::from_u16(status)
        .map_err(|e| TransportError::Other(format!("Invalid scripted status {status}: {e}")))?;
    let mut response = GatewayResponse::new(status, body);
    if let Some(content_type) = content_type {
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    Ok(response)
}
