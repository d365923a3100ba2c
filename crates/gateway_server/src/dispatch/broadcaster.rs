//! Fan-out of server messages.
//!
//! Handlers hand [`BroadcastJob`]s to the [`Broadcaster`] without waiting. A
//! bounded buffer sits in front of the [`WorkerPool`]; a single dispatch loop
//! moves jobs from the buffer into the pool. Targets are resolved against the
//! registry when a worker picks the job up, so membership changes made after
//! enqueue are visible to the delivery.
//!
//! Direct replies to one connection bypass the buffer entirely.

use super::pool::WorkerPool;
use crate::codec::Codec;
use crate::connection::{Connection, ConnectionRegistry, Member};
use crate::error::ServerError;
use crate::protocol::{
    current_timestamp, status, Envelope, Heartbeat, MessageHeader, MessageKind, Payload,
    ResponseData, RoomId, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Who a broadcast is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    Users(Vec<UserId>),
    Rooms(Vec<RoomId>),
    All,
}

/// An envelope plus its audience.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub envelope: Envelope,
    pub target: BroadcastTarget,
    /// User that must not receive the message.
    pub exclude: Option<UserId>,
}

/// Write deadlines used by the broadcaster.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryTimeouts {
    /// Direct replies to the requesting connection
    pub reply: Duration,
    /// Each frame written during fan-out
    pub fan_out: Duration,
    /// Best-effort error frames
    pub error: Duration,
}

impl Default for DeliveryTimeouts {
    fn default() -> Self {
        Self {
            reply: Duration::from_secs(60),
            fan_out: Duration::from_secs(10),
            error: Duration::from_secs(5),
        }
    }
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    codec: Arc<dyn Codec>,
    pool: Arc<WorkerPool>,
    sender: mpsc::Sender<BroadcastJob>,
    receiver: Mutex<Option<mpsc::Receiver<BroadcastJob>>>,
    timeouts: DeliveryTimeouts,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        codec: Arc<dyn Codec>,
        pool: Arc<WorkerPool>,
        buffer: usize,
        timeouts: DeliveryTimeouts,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        Self {
            registry,
            codec,
            pool,
            sender,
            receiver: Mutex::new(Some(receiver)),
            timeouts,
        }
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Starts the loop that moves buffered jobs into the worker pool.
    ///
    /// On shutdown the buffer is closed, jobs already in it are handed to the
    /// pool, and the loop exits. Returns `None` if the loop was already
    /// started.
    pub async fn spawn_dispatch_loop(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        let mut receiver = self.receiver.lock().await.take()?;
        let broadcaster = self.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = receiver.recv() => match job {
                        Some(job) => broadcaster.dispatch(job).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        receiver.close();
                        while let Some(job) = receiver.recv().await {
                            broadcaster.dispatch(job).await;
                        }
                        break;
                    }
                }
            }
            debug!("Broadcast dispatch loop stopped");
        }))
    }

    /// Refuses further jobs when the dispatch loop never started. Jobs
    /// already buffered are discarded.
    pub async fn close_buffer(&self) {
        if let Some(mut receiver) = self.receiver.lock().await.take() {
            receiver.close();
            let mut discarded = 0;
            while receiver.try_recv().is_ok() {
                discarded += 1;
            }
            debug!("Broadcast buffer closed before dispatch started, {} job(s) discarded", discarded);
        }
    }

    async fn dispatch(self: &Arc<Self>, job: BroadcastJob) {
        let broadcaster = self.clone();
        if let Err(e) = self
            .pool
            .submit(async move {
                let delivered = broadcaster.deliver(job).await;
                debug!("Broadcast delivered to {} connection(s)", delivered);
            })
            .await
        {
            warn!("Dropping broadcast job: {}", e);
        }
    }

    /// Queues a job without waiting. Returns false if it was dropped.
    pub fn broadcast(&self, job: BroadcastJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    "📭 Broadcast buffer full, dropping kind {} message for {:?}",
                    job.envelope.header.msg_type, job.target
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(
                    "Broadcast buffer closed, dropping kind {} message",
                    job.envelope.header.msg_type
                );
                false
            }
        }
    }

    pub fn to_user(&self, user_id: UserId, envelope: Envelope) -> bool {
        self.to_users(vec![user_id], envelope)
    }

    pub fn to_users(&self, user_ids: Vec<UserId>, envelope: Envelope) -> bool {
        self.broadcast(BroadcastJob {
            envelope,
            target: BroadcastTarget::Users(user_ids),
            exclude: None,
        })
    }

    pub fn to_room(&self, room_id: &str, envelope: Envelope, exclude: Option<UserId>) -> bool {
        self.broadcast(BroadcastJob {
            envelope,
            target: BroadcastTarget::Rooms(vec![room_id.to_string()]),
            exclude,
        })
    }

    pub fn to_rooms(&self, room_ids: Vec<RoomId>, envelope: Envelope) -> bool {
        self.broadcast(BroadcastJob {
            envelope,
            target: BroadcastTarget::Rooms(room_ids),
            exclude: None,
        })
    }

    pub fn to_all(&self, envelope: Envelope) -> bool {
        self.to_all_except(envelope, None)
    }

    pub fn to_all_except(&self, envelope: Envelope, exclude: Option<UserId>) -> bool {
        self.broadcast(BroadcastJob {
            envelope,
            target: BroadcastTarget::All,
            exclude,
        })
    }

    async fn resolve(&self, target: &BroadcastTarget) -> Vec<Member> {
        match target {
            BroadcastTarget::All => self.registry.all_connections().await,
            BroadcastTarget::Users(user_ids) => {
                let mut members = Vec::with_capacity(user_ids.len());
                for user_id in user_ids {
                    if let Some(connection) = self.registry.lookup_by_user(*user_id).await {
                        members.push(Member {
                            user_id: *user_id,
                            connection,
                        });
                    }
                }
                members
            }
            BroadcastTarget::Rooms(room_ids) => {
                let mut members = Vec::new();
                for room_id in room_ids {
                    members.extend(self.registry.members_of_room(room_id).await);
                }
                members
            }
        }
    }

    /// Resolves the audience, encodes once, and writes to each connection.
    /// Returns how many writes succeeded.
    pub async fn deliver(&self, job: BroadcastJob) -> usize {
        let bytes = match self.codec.encode_envelope(&job.envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return 0;
            }
        };

        let mut seen = HashSet::new();
        let mut delivered = 0;
        for member in self.resolve(&job.target).await {
            if Some(member.user_id) == job.exclude || !seen.insert(member.connection.id()) {
                continue;
            }
            match member
                .connection
                .send(self.codec.frame_kind(), bytes.clone(), self.timeouts.fan_out)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    "Broadcast to connection {} failed: {}",
                    member.connection.id(),
                    e
                ),
            }
        }
        delivered
    }

    /// Encodes and writes one envelope to one connection.
    pub async fn send_envelope(
        &self,
        connection: &Connection,
        envelope: &Envelope,
    ) -> Result<(), ServerError> {
        let bytes = self.codec.encode_envelope(envelope)?;
        connection
            .send(self.codec.frame_kind(), bytes, self.timeouts.reply)
            .await
    }

    /// Replies to `request` with a response built by the codec.
    pub async fn send_response(
        &self,
        connection: &Connection,
        request: &Envelope,
        status: i32,
        message: &str,
        data: Option<ResponseData>,
    ) -> Result<(), ServerError> {
        let response = self.codec.build_response(request, status, message, data)?;
        self.send_envelope(connection, &response).await
    }

    /// Best-effort error reply. Failures are logged and swallowed.
    ///
    /// When the request could not be decoded an empty header stands in for
    /// it.
    pub async fn send_error(
        &self,
        connection: &Connection,
        request: Option<&Envelope>,
        err: &ServerError,
    ) {
        let fallback = Envelope::default();
        let request = request.unwrap_or(&fallback);
        let data = ResponseData::Error {
            error: err.client_message().to_string(),
            details: err.to_string(),
        };

        let frame = self
            .codec
            .build_response(request, err.status_code(), err.client_message(), Some(data))
            .and_then(|response| self.codec.encode_envelope(&response));
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode error response: {}", e);
                return;
            }
        };

        if let Err(e) = connection
            .send(self.codec.frame_kind(), bytes, self.timeouts.error)
            .await
        {
            debug!(
                "Could not deliver error response to connection {}: {}",
                connection.id(),
                e
            );
        }
    }

    /// Acknowledges a heartbeat, echoing the client's timestamp.
    pub async fn send_heartbeat_ack(
        &self,
        connection: &Connection,
        request: &Envelope,
        client_time: i64,
    ) -> Result<(), ServerError> {
        let body = self.codec.encode_payload(
            MessageKind::Heartbeat.as_u32(),
            &Payload::Heartbeat(Heartbeat { client_time }),
        )?;
        let header = MessageHeader {
            msg_type: MessageKind::Heartbeat.as_u32(),
            timestamp: current_timestamp(),
            ..request.header.clone()
        };
        self.send_envelope(connection, &Envelope::new(header, body))
            .await
    }

    /// Response with status OK and no data.
    pub async fn send_ok(
        &self,
        connection: &Connection,
        request: &Envelope,
        message: &str,
    ) -> Result<(), ServerError> {
        self.send_response(connection, request, status::OK, message, None)
            .await
    }
}
