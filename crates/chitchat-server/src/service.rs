//! Request handling, independent of the transport.
//!
//! Maps decoded request payloads onto [`BroadcastEngine`] operations and
//! builds the response payloads. The QUIC runtime decodes frames, calls into
//! here, and encodes whatever comes back.

use std::sync::Arc;

use chitchat_proto::{LeaveRequest, LeaveResponse, PublishRequest, PublishResponse, SubscribeRequest};

use crate::{
    engine::BroadcastEngine,
    error::EngineError,
    event::ClientId,
    session::SubscriptionSession,
};

/// ChitChat request handlers.
#[derive(Debug, Clone)]
pub struct ChatService {
    engine: Arc<BroadcastEngine>,
}

impl ChatService {
    /// Serve requests against `engine`.
    pub fn new(engine: Arc<BroadcastEngine>) -> Self {
        Self { engine }
    }

    /// Underlying engine.
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    /// Open a subscription. Fails on an empty client id.
    pub fn subscribe(&self, request: &SubscribeRequest) -> Result<SubscriptionSession, EngineError> {
        let client_id = ClientId::new(&request.client_id)?;
        SubscriptionSession::open(Arc::clone(&self.engine), client_id)
    }

    /// Publish a message. Rejections are reported in the ack, never as an
    /// error, and the ack never carries the assigned timestamp.
    pub fn publish(&self, request: &PublishRequest) -> PublishResponse {
        let result = ClientId::new(&request.client_id)
            .and_then(|client_id| self.engine.publish(&client_id, &request.text));

        match result {
            Ok(_) => PublishResponse::accepted(),
            Err(e) => PublishResponse::rejected(e.to_string()),
        }
    }

    /// Leave. Always acknowledged, including for empty or unknown ids.
    pub fn leave(&self, request: &LeaveRequest) -> LeaveResponse {
        let Ok(client_id) = ClientId::new(&request.client_id) else {
            return LeaveResponse { ack: true };
        };

        if let Err(e) = self.engine.leave(&client_id) {
            tracing::error!(client_id = %client_id, error = %e, "leave failed");
        }

        LeaveResponse { ack: true }
    }
}
