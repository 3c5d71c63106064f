//! # Real-Time Sync Hub
//!
//! Pushes committed sale changes to the tills watching each register.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Hub Architecture                           │
//! │                                                                         │
//! │  Engines (reconciler, sale desk)                                       │
//! │       │ HubHandle::publish(SaleEvent)                                  │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 SyncHub actor (single task)                     │   │
//! │  │                                                                 │   │
//! │  │   subscribers: register ─► { connection ─► outgoing mpsc }      │   │
//! │  │   snapshots:   register ─► cached open sales (per local day)    │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │ try_send                      │ try_send              │
//! │                 ▼                               ▼                       │
//! │  ┌──────────────────────────┐    ┌──────────────────────────┐          │
//! │  │ /ws?register_id=1        │    │ /ws?register_id=2        │          │
//! │  │ connection task          │    │ connection task          │          │
//! │  │  • JSON text frames      │    │  • JSON text frames      │          │
//! │  │  • ping / pong liveness  │    │  • ping / pong liveness  │          │
//! │  └──────────────────────────┘    └──────────────────────────┘          │
//! │                                                                         │
//! │  Connection Flow:                                                       │
//! │  ────────────────                                                       │
//! │  1. Till connects with a numeric register_id (otherwise: closed)       │
//! │  2. Hub sends initial-snapshot before anything else                    │
//! │  3. Hub forwards events of that register only                          │
//! │  4. Unanswered ping or closed socket ends the subscription             │
//! │  5. Last subscriber gone: the register's snapshot is evicted           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All registry mutation happens inside the actor, so no locks guard it.
//! A connection whose outgoing buffer is full or closed is dropped from the
//! registry; the failure is logged and never reaches other subscribers.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HubSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{HubMessage, SaleEvent};
use till_core::{BusinessDay, Sale};
use till_db::Database;

// =============================================================================
// Constants
// =============================================================================

/// Commands queued for the actor before publishers wait.
const COMMAND_BUFFER: usize = 256;

/// Maximum inbound message size. Tills only send control frames.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

// =============================================================================
// Snapshot Source
// =============================================================================

/// Supplies the initial snapshot of a register.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Today's sales of the register plus open sales from earlier days.
    async fn snapshot(&self, register_id: i64, now: DateTime<Utc>) -> SyncResult<Vec<Sale>>;
}

#[async_trait]
impl SnapshotSource for Database {
    async fn snapshot(&self, register_id: i64, now: DateTime<Utc>) -> SyncResult<Vec<Sale>> {
        Ok(self.sales().open_for_register(register_id, now).await?)
    }
}

// =============================================================================
// Snapshot Cache
// =============================================================================

/// Open sales of one register, valid for one local day.
#[derive(Debug)]
struct CachedSnapshot {
    date: NaiveDate,
    sales: BTreeMap<i64, Sale>,
}

impl CachedSnapshot {
    fn sales(&self) -> Vec<Sale> {
        let mut sales: Vec<Sale> = self.sales.values().cloned().collect();
        sales.sort_by_key(|sale| (sale.created_at, sale.id));
        sales
    }
}

// =============================================================================
// Hub Commands
// =============================================================================

#[derive(Debug)]
enum HubCommand {
    Subscribe {
        register_id: i64,
        conn_id: Uuid,
        tx: mpsc::Sender<HubMessage>,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Unsubscribe {
        register_id: i64,
        conn_id: Uuid,
    },
    Publish(SaleEvent),
    SubscriberCount {
        register_id: i64,
        reply: oneshot::Sender<usize>,
    },
    CachedRegisters {
        reply: oneshot::Sender<Vec<i64>>,
    },
    Shutdown,
}

// =============================================================================
// Hub Handle
// =============================================================================

/// Cloneable handle to the hub actor.
#[derive(Debug, Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Registers a connection. The initial snapshot is queued on `tx`
    /// before any event of the register.
    pub async fn subscribe(
        &self,
        register_id: i64,
        conn_id: Uuid,
        tx: mpsc::Sender<HubMessage>,
    ) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Subscribe {
            register_id,
            conn_id,
            tx,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    pub async fn unsubscribe(&self, register_id: i64, conn_id: Uuid) {
        if self
            .send(HubCommand::Unsubscribe { register_id, conn_id })
            .await
            .is_err()
        {
            debug!(register_id, %conn_id, "Hub already stopped");
        }
    }

    /// Forwards a committed mutation. Never fails the caller: the ledger
    /// write already happened.
    pub async fn publish(&self, event: SaleEvent) {
        if let Err(e) = self.send(HubCommand::Publish(event)).await {
            warn!(?e, "Sale event dropped");
        }
    }

    pub async fn subscriber_count(&self, register_id: i64) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .send(HubCommand::SubscriberCount { register_id, reply })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Registers whose snapshot is currently cached, ascending.
    pub async fn cached_registers(&self) -> Vec<i64> {
        let (reply, rx) = oneshot::channel();
        if self.send(HubCommand::CachedRegisters { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the actor; every connection is closed.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(HubCommand::Shutdown).await
    }

    async fn send(&self, cmd: HubCommand) -> SyncResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::ChannelError("Hub command channel closed".into()))
    }
}

// =============================================================================
// Sync Hub Actor
// =============================================================================

/// Owner of the subscriber registry and the snapshot cache.
pub struct SyncHub {
    source: Arc<dyn SnapshotSource>,
    timezone: Tz,
    subscribers: HashMap<i64, HashMap<Uuid, mpsc::Sender<HubMessage>>>,
    snapshots: HashMap<i64, CachedSnapshot>,
}

impl SyncHub {
    pub fn new(source: Arc<dyn SnapshotSource>, timezone: Tz) -> Self {
        SyncHub {
            source,
            timezone,
            subscribers: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    /// Spawns the actor and returns its handle.
    pub fn start(self) -> HubHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(cmd_rx));
        HubHandle { cmd_tx }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<HubCommand>) {
        info!("Sync hub started");

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HubCommand::Subscribe {
                    register_id,
                    conn_id,
                    tx,
                    reply,
                } => {
                    let result = self.subscribe(register_id, conn_id, tx).await;
                    let _ = reply.send(result);
                }
                HubCommand::Unsubscribe { register_id, conn_id } => {
                    self.unsubscribe(register_id, conn_id);
                }
                HubCommand::Publish(event) => self.publish(event),
                HubCommand::SubscriberCount { register_id, reply } => {
                    let count = self.subscribers.get(&register_id).map_or(0, HashMap::len);
                    let _ = reply.send(count);
                }
                HubCommand::CachedRegisters { reply } => {
                    let mut registers: Vec<i64> = self.snapshots.keys().copied().collect();
                    registers.sort_unstable();
                    let _ = reply.send(registers);
                }
                HubCommand::Shutdown => break,
            }
        }

        // Dropping the senders ends every connection task.
        self.subscribers.clear();
        self.snapshots.clear();
        info!("Sync hub stopped");
    }

    async fn subscribe(
        &mut self,
        register_id: i64,
        conn_id: Uuid,
        tx: mpsc::Sender<HubMessage>,
    ) -> SyncResult<()> {
        let snapshot = self.snapshot(register_id).await?;
        let count = snapshot.len();
        tx.try_send(HubMessage::InitialSnapshot(snapshot))
            .map_err(|e| SyncError::ChannelError(format!("initial snapshot not delivered: {e}")))?;

        let connections = self.subscribers.entry(register_id).or_default();
        connections.insert(conn_id, tx);
        info!(
            register_id,
            %conn_id,
            sales = count,
            subscribers = connections.len(),
            "Till subscribed"
        );
        Ok(())
    }

    /// Cached snapshot, rebuilt from the source when absent or stale.
    async fn snapshot(&mut self, register_id: i64) -> SyncResult<Vec<Sale>> {
        let now = Utc::now();
        let today = BusinessDay::containing(now, self.timezone).date;

        if let Some(cached) = self.snapshots.get(&register_id) {
            if cached.date == today {
                return Ok(cached.sales());
            }
        }

        let sales = self.source.snapshot(register_id, now).await?;
        debug!(register_id, sales = sales.len(), "Snapshot loaded");
        let cached = CachedSnapshot {
            date: today,
            sales: sales.into_iter().map(|sale| (sale.id, sale)).collect(),
        };
        let sales = cached.sales();
        self.snapshots.insert(register_id, cached);
        Ok(sales)
    }

    fn unsubscribe(&mut self, register_id: i64, conn_id: Uuid) {
        let Some(connections) = self.subscribers.get_mut(&register_id) else {
            return;
        };
        if connections.remove(&conn_id).is_some() {
            info!(register_id, %conn_id, "Till unsubscribed");
        }
        if connections.is_empty() {
            self.release(register_id);
        }
    }

    fn publish(&mut self, event: SaleEvent) {
        match event {
            SaleEvent::Created(sale) => match sale.register_id {
                Some(register_id) => {
                    self.cache_sale(register_id, &sale);
                    self.broadcast(register_id, HubMessage::SaleCreated(sale));
                }
                None => debug!(sale_id = sale.id, "Sale without register, not broadcast"),
            },
            SaleEvent::Changed {
                sale,
                change,
                previous_register_id,
            } => {
                let current = sale.register_id;
                if previous_register_id != current {
                    if let Some(old) = previous_register_id {
                        self.forget_sale(old, sale.id);
                        self.broadcast(old, HubMessage::SaleRemoved { id: sale.id });
                    }
                    if let Some(new) = current {
                        self.cache_sale(new, &sale);
                        self.broadcast(new, HubMessage::SaleCreated(sale));
                    }
                } else if let Some(register_id) = current {
                    self.cache_sale(register_id, &sale);
                    self.broadcast(register_id, HubMessage::for_change(change, sale));
                } else {
                    debug!(sale_id = sale.id, "Sale without register, not broadcast");
                }
            }
            SaleEvent::Removed { id, register_id } => {
                if let Some(register_id) = register_id {
                    self.forget_sale(register_id, id);
                    self.broadcast(register_id, HubMessage::SaleRemoved { id });
                }
            }
        }
    }

    fn cache_sale(&mut self, register_id: i64, sale: &Sale) {
        if let Some(cached) = self.snapshots.get_mut(&register_id) {
            cached.sales.insert(sale.id, sale.clone());
        }
    }

    fn forget_sale(&mut self, register_id: i64, sale_id: i64) {
        if let Some(cached) = self.snapshots.get_mut(&register_id) {
            cached.sales.remove(&sale_id);
        }
    }

    fn broadcast(&mut self, register_id: i64, message: HubMessage) {
        let Some(connections) = self.subscribers.get_mut(&register_id) else {
            return;
        };

        let kind = message.kind();
        connections.retain(|conn_id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(register_id, %conn_id, kind, "Outgoing buffer full, dropping connection");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(register_id, %conn_id, kind, "Connection gone, pruning");
                false
            }
        });
        debug!(register_id, kind, subscribers = connections.len(), "Broadcast");

        if connections.is_empty() {
            self.release(register_id);
        }
    }

    /// Forgets a register with no subscribers left.
    fn release(&mut self, register_id: i64) {
        self.subscribers.remove(&register_id);
        if self.snapshots.remove(&register_id).is_some() {
            debug!(register_id, "Snapshot evicted");
        }
    }
}

// =============================================================================
// Hub Server
// =============================================================================

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    ping_interval: Duration,
    outgoing_buffer: usize,
}

/// HTTP front of the hub: `/ws?register_id=N` and `/health`.
pub struct HubServer {
    settings: HubSettings,
    state: AppState,
}

/// Handle for a running server.
#[derive(Debug, Clone)]
pub struct HubServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl HubServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Hub server shutdown channel closed".into()))
    }
}

impl HubServer {
    pub fn new(settings: HubSettings, hub: HubHandle) -> Self {
        let state = AppState {
            hub,
            ping_interval: settings.ping_interval(),
            outgoing_buffer: settings.outgoing_buffer,
        };
        HubServer { settings, state }
    }

    /// Overrides the liveness interval from the settings.
    pub fn ping_interval(mut self, every: Duration) -> Self {
        self.state.ping_interval = every;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
    }

    /// Binds and serves in a background task.
    pub async fn start(self) -> SyncResult<HubServerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let app = self.router();

        let bind_addr = self.settings.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::ServerFailed(format!("Failed to bind to {bind_addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ServerFailed(e.to_string()))?;

        info!(addr = %local_addr, "Hub server started");

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Hub server shutting down");
                })
                .await;
            if let Err(e) = served {
                error!(?e, "Hub server stopped with error");
            }
        });

        Ok(HubServerHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConnectParams {
    register_id: Option<String>,
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let register_id = params
        .register_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            match register_id {
                Some(register_id) => handle_socket(socket, state, register_id).await,
                None => reject(socket, params.register_id).await,
            }
        })
}

/// Closes a connection that named no usable register.
async fn reject(mut socket: WebSocket, raw: Option<String>) {
    warn!(register_id = ?raw, "Connection without a numeric register_id, closing");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("register_id required"),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Drives one till connection until it closes or stops answering pings.
async fn handle_socket(socket: WebSocket, state: AppState, register_id: i64) {
    let conn_id = Uuid::new_v4();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<HubMessage>(state.outgoing_buffer);

    if let Err(e) = state.hub.subscribe(register_id, conn_id, outgoing_tx).await {
        warn!(register_id, ?e, "Subscription failed, closing");
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let mut ping = interval(state.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(message) = outgoing else {
                    debug!(register_id, %conn_id, "Dropped by hub");
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(register_id, ?e, kind = message.kind(), "Failed to serialize message");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json.into())).await {
                    debug!(register_id, %conn_id, ?e, "Send failed");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!(register_id, %conn_id, "Till disconnected");
                    break;
                }
                Some(Ok(_)) => awaiting_pong = false,
                Some(Err(e)) => {
                    debug!(register_id, %conn_id, ?e, "WebSocket error");
                    break;
                }
            },
            _ = ping.tick() => {
                if awaiting_pong {
                    info!(register_id, %conn_id, "Till unresponsive, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                awaiting_pong = true;
                if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(register_id, conn_id).await;
}
