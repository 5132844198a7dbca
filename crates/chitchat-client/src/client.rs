//! High-level ChitChat client.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use chitchat_proto::{
    BroadcastEvent, LeaveRequest, Payload, PublishRequest, PublishResponse, SubscribeRequest,
};
use quinn::RecvStream;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::ClientError,
    transport::{Connection, read_frame},
};

/// Events buffered between the receive task and [`Subscription::next`].
const SUBSCRIPTION_BUFFER: usize = 64;

/// Connection to a ChitChat server acting as one client id.
#[derive(Debug)]
pub struct ChatClient {
    connection: Connection,
    client_id: String,
    next_request_id: AtomicU32,
}

impl ChatClient {
    /// Connect to `server_addr` as `client_id`.
    pub async fn connect(
        server_addr: SocketAddr,
        client_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(ClientError::InvalidArgument("client id must not be empty".to_string()));
        }

        let connection = Connection::connect(server_addr).await?;
        Ok(Self { connection, client_id, next_request_id: AtomicU32::new(1) })
    }

    /// Client id this client acts as.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Open the event stream.
    ///
    /// Waits for the first event (the server's Join for this client) so that
    /// a rejected subscription surfaces here rather than as an empty stream.
    /// Events are then read by an independent background task.
    pub async fn subscribe(&self) -> Result<Subscription, ClientError> {
        let request = Payload::Subscribe(SubscribeRequest { client_id: self.client_id.clone() });
        let mut recv = self.send(request).await?;

        let first = match next_payload(&mut recv).await? {
            Some(Payload::Broadcast(event)) => event,
            Some(other) => return Err(unexpected(other)),
            None => return Err(ClientError::NoResponse),
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(receive_loop(recv, tx, first));

        Ok(Subscription { rx, task })
    }

    /// Publish `text`. The ack never carries the assigned timestamp; the
    /// message is observable only through subscriptions.
    pub async fn publish(&self, text: impl Into<String>) -> Result<PublishResponse, ClientError> {
        let request = Payload::Publish(PublishRequest {
            client_id: self.client_id.clone(),
            text: text.into(),
        });

        match self.request(request).await? {
            Payload::PublishAck(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    /// Leave the chat. The server ends this client's subscription stream.
    pub async fn leave(&self) -> Result<bool, ClientError> {
        let request = Payload::Leave(LeaveRequest { client_id: self.client_id.clone() });

        match self.request(request).await? {
            Payload::LeaveAck(response) => Ok(response.ack),
            other => Err(unexpected(other)),
        }
    }

    /// Close the connection. Open subscriptions end and the server treats
    /// this client as disconnected.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn send(&self, payload: Payload) -> Result<RecvStream, ClientError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = payload.into_frame(request_id)?;
        Ok(self.connection.call(&frame).await?)
    }

    async fn request(&self, payload: Payload) -> Result<Payload, ClientError> {
        let mut recv = self.send(payload).await?;
        next_payload(&mut recv).await?.ok_or(ClientError::NoResponse)
    }
}

/// Live event stream of one subscription.
///
/// Dropping it stops the background receive task.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<BroadcastEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Next event, or `None` once the server ended the stream.
    pub async fn next(&mut self) -> Option<BroadcastEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive_loop(mut recv: RecvStream, tx: mpsc::Sender<BroadcastEvent>, first: BroadcastEvent) {
    if tx.send(first).await.is_err() {
        return;
    }

    loop {
        let event = match next_payload(&mut recv).await {
            Ok(Some(Payload::Broadcast(event))) => event,
            Ok(Some(other)) => {
                tracing::warn!(opcode = ?other.opcode(), "unexpected frame on subscription");
                break;
            },
            Ok(None) => {
                tracing::debug!("subscription ended by server");
                break;
            },
            Err(ClientError::Server { code, message }) => {
                tracing::warn!(code, %message, "subscription error");
                break;
            },
            Err(e) => {
                tracing::debug!(error = %e, "subscription stream closed");
                break;
            },
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn next_payload(recv: &mut RecvStream) -> Result<Option<Payload>, ClientError> {
    let Some(frame) = read_frame(recv).await? else {
        return Ok(None);
    };

    match Payload::from_frame(&frame)? {
        Payload::Error(error) => Err(ClientError::Server { code: error.code, message: error.message }),
        payload => Ok(Some(payload)),
    }
}

fn unexpected(payload: Payload) -> ClientError {
    ClientError::UnexpectedResponse(format!("{:?}", payload.opcode()))
}
