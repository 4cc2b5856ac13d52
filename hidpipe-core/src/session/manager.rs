// SPDX-License-Identifier: Apache-2.0

//! SessionManager - per-device session arbitration.
//!
//! Gates access to one event queue per device and serializes administrative
//! requests (open, close, copy-event, property get/set) against teardown.
//! All administrative work is executed one-at-a-time, in FIFO order, by a
//! single-consumer command task that also owns the teardown flag, so "close
//! while a copy is in progress" can never read from a half-destroyed queue.
//!
//! The producer-side `dispatch` path never goes through the command task:
//! it must not block, so it only touches the lock-free queue, the
//! latest-event history, and the statistics counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::config::PipelineConfig;
use crate::error::{HidError, HidResult, QueueError, SessionError};
use crate::event::{Event, EventType};
use crate::session::state::{SessionLifecycle, SessionState};
use crate::shm::{EventQueue, QueueNotifier, SharedMemoryRegion};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::types::{ClientId, DeviceId};

/// Capability string checked when a client opens the event queue.
pub const QUEUE_CAPABILITY: &str = "hid-event-queue";

/// Command channel depth. Administrative traffic is sparse; a deep backlog
/// means a stuck consumer, and callers should fail rather than pile up.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Externally-supplied authorization oracle.
pub trait EntitlementChecker: Send + Sync {
    fn is_entitled(&self, client: &ClientId, capability: &str) -> bool;
}

/// Permits every client. For tests and trusted single-tenant setups.
pub struct AllowAll;

impl EntitlementChecker for AllowAll {
    fn is_entitled(&self, _client: &ClientId, _capability: &str) -> bool {
        true
    }
}

/// Externally-supplied shared-memory allocator. The core requests a block of
/// a given size; the provider hands back a region the consumer can map by
/// name.
pub trait MemoryProvider: Send + Sync {
    fn allocate(&self, name: &str, size: usize) -> Result<SharedMemoryRegion, QueueError>;
}

/// Default provider backed by POSIX shared memory.
pub struct PosixShmProvider;

impl MemoryProvider for PosixShmProvider {
    fn allocate(&self, name: &str, size: usize) -> Result<SharedMemoryRegion, QueueError> {
        SharedMemoryRegion::create(name, size)
    }
}

bitflags! {
    /// Options accepted on `open`. No flags are defined yet; the selector
    /// carries the word so new flags can be added without changing the
    /// call shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenOptions: u32 {}
}

bitflags! {
    /// Options accepted on `copy_event`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CopyEventOptions: u32 {
        /// Only match a record whose root type equals the selector;
        /// composites carrying the type in a descendant are skipped.
        const EXACT_TYPE = 1 << 0;
    }
}

/// Reply to a successful open: where the consumer should map the queue.
#[derive(Debug, Clone)]
pub struct QueueAttachment {
    pub region_name: String,
    pub region_size: usize,
    pub capacity: usize,
}

/// One client's attachment record, owned by the command task.
struct SessionRecord {
    lifecycle: SessionLifecycle,
    options: OpenOptions,
    properties: HashMap<String, serde_json::Value>,
}

/// Administrative requests; rejectable once teardown begins.
enum AdminCommand {
    Open {
        client: ClientId,
        options: OpenOptions,
        properties: HashMap<String, serde_json::Value>,
        reply: oneshot::Sender<HidResult<QueueAttachment>>,
    },
    Close {
        client: ClientId,
        reply: oneshot::Sender<HidResult<()>>,
    },
    CopyEvent {
        client: ClientId,
        event_type: EventType,
        options: CopyEventOptions,
        reply: oneshot::Sender<HidResult<Event>>,
    },
    GetProperty {
        client: ClientId,
        key: String,
        reply: oneshot::Sender<HidResult<serde_json::Value>>,
    },
    SetProperty {
        client: ClientId,
        key: String,
        value: serde_json::Value,
        reply: oneshot::Sender<HidResult<()>>,
    },
}

enum Command {
    Admin(AdminCommand),
    Teardown { reply: oneshot::Sender<()> },
}

/// Handle to a running session manager.
///
/// Cloneable; the producer driver keeps one for `dispatch`, administrative
/// callers keep others for the async command surface.
#[derive(Clone)]
pub struct SessionHandle {
    device_id: DeviceId,
    tx: mpsc::Sender<Command>,
    queue: Arc<EventQueue>,
    latest: Arc<DashMap<u32, Event>>,
    stats: Arc<SessionStats>,
    teardown: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Spawn a session manager for one device, allocating and owning its
    /// event queue. The returned handle is the only way to reach it.
    pub fn spawn(
        config: PipelineConfig,
        provider: &dyn MemoryProvider,
        entitlements: Arc<dyn EntitlementChecker>,
        notifier: Arc<dyn QueueNotifier>,
    ) -> HidResult<Self> {
        let region_name = format!("hidpipe-{}-{}", config.device_id, std::process::id());
        let region = provider.allocate(&region_name, config.queue.region_size())?;
        let queue = Arc::new(EventQueue::create(
            region,
            config.queue.capacity,
            config.queue.options,
            notifier,
        )?);

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let teardown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SessionStats::default());
        let latest = Arc::new(DashMap::new());

        let handle = Self {
            device_id: config.device_id.clone(),
            tx,
            queue: Arc::clone(&queue),
            latest: Arc::clone(&latest),
            stats: Arc::clone(&stats),
            teardown: Arc::clone(&teardown),
        };

        let worker = Worker {
            device_id: config.device_id,
            queue,
            latest,
            stats,
            teardown,
            entitlements,
            sessions: DashMap::new(),
        };
        tokio::spawn(worker.run(rx));

        Ok(handle)
    }

    /// Device this manager serves.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Live statistics for this device's session.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Producer path: record the event in the copy-event history, then
    /// serialize it into the streaming queue. Never blocks.
    ///
    /// Queue-full and malformed-event failures are counted and returned;
    /// they are recoverable (drop-and-log or retry after backoff). A
    /// corrupted-buffer failure forces teardown of the whole session.
    pub fn dispatch(&self, event: &Event) -> HidResult<()> {
        if self.teardown.load(Ordering::Acquire) {
            return Err(SessionError::Unavailable.into());
        }

        self.latest.insert(event.event_type().tag(), event.clone());

        match self.queue.enqueue(event) {
            Ok(()) => {
                self.stats.record_enqueue();
                self.stats
                    .notifications
                    .store(self.queue.notify_count(), Ordering::Relaxed);
                self.stats
                    .suppressed_full
                    .store(self.queue.suppressed_full_count(), Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.stats.record_enqueue_failure();
                if matches!(err, HidError::Queue(QueueError::CorruptedState { .. })) {
                    tracing::error!(
                        device_id = %self.device_id,
                        error = %err,
                        "Queue state corrupted; forcing teardown"
                    );
                    self.teardown.store(true, Ordering::Release);
                }
                Err(err)
            }
        }
    }

    async fn send<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<HidResult<R>>) -> AdminCommand,
    ) -> HidResult<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Admin(build(reply_tx)))
            .await
            .map_err(|_| HidError::Session(SessionError::Unavailable))?;
        reply_rx
            .await
            .map_err(|_| HidError::Session(SessionError::Unavailable))?
    }

    /// Open an attachment for `client`. Fails with an authorization error,
    /// "already open", or "unavailable" once teardown has begun.
    pub async fn open(
        &self,
        client: ClientId,
        options: OpenOptions,
        properties: HashMap<String, serde_json::Value>,
    ) -> HidResult<QueueAttachment> {
        self.send(|reply| AdminCommand::Open {
            client,
            options,
            properties,
            reply,
        })
        .await
    }

    /// Close `client`'s attachment.
    pub async fn close(&self, client: ClientId) -> HidResult<()> {
        self.send(|reply| AdminCommand::Close { client, reply })
            .await
    }

    /// Fetch the most recent event of `event_type` as a standalone record,
    /// independent of queue state. Never touches the streaming queue's
    /// cursors.
    pub async fn copy_event(
        &self,
        client: ClientId,
        event_type: EventType,
        options: CopyEventOptions,
    ) -> HidResult<Event> {
        self.send(|reply| AdminCommand::CopyEvent {
            client,
            event_type,
            options,
            reply,
        })
        .await
    }

    /// Read a session or queue property.
    pub async fn get_property(
        &self,
        client: ClientId,
        key: impl Into<String>,
    ) -> HidResult<serde_json::Value> {
        let key = key.into();
        self.send(|reply| AdminCommand::GetProperty { client, key, reply })
            .await
    }

    /// Write a session property.
    pub async fn set_property(
        &self,
        client: ClientId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> HidResult<()> {
        let key = key.into();
        self.send(|reply| AdminCommand::SetProperty {
            client,
            key,
            value,
            reply,
        })
        .await
    }

    /// Begin teardown: flip the flag first, so commands already queued
    /// behind this call fail fast, then wait for the worker to close every
    /// session and exit.
    pub async fn teardown(&self) {
        self.teardown.store(true, Ordering::Release);

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Teardown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// Command-task state. Exclusively owned by the single consumer of the
/// command channel; that exclusivity is the serialization point.
struct Worker {
    device_id: DeviceId,
    queue: Arc<EventQueue>,
    latest: Arc<DashMap<u32, Event>>,
    stats: Arc<SessionStats>,
    teardown: Arc<AtomicBool>,
    entitlements: Arc<dyn EntitlementChecker>,
    sessions: DashMap<ClientId, SessionRecord>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Teardown { reply } => {
                    self.close_all();
                    let _ = reply.send(());
                    break;
                }
                // Teardown won the race: everything still queued fails fast.
                Command::Admin(request) if self.teardown.load(Ordering::Acquire) => {
                    Self::reject(request)
                }
                Command::Admin(request) => self.handle(request),
            }
        }

        tracing::debug!(device_id = %self.device_id, "Session manager stopped");
    }

    fn handle(&self, request: AdminCommand) {
        match request {
            AdminCommand::Open {
                client,
                options,
                properties,
                reply,
            } => {
                let _ = reply.send(self.handle_open(client, options, properties));
            }
            AdminCommand::Close { client, reply } => {
                let _ = reply.send(self.handle_close(&client));
            }
            AdminCommand::CopyEvent {
                client,
                event_type,
                options,
                reply,
            } => {
                let _ = reply.send(self.handle_copy(&client, event_type, options));
            }
            AdminCommand::GetProperty { client, key, reply } => {
                let _ = reply.send(self.handle_get_property(&client, &key));
            }
            AdminCommand::SetProperty {
                client,
                key,
                value,
                reply,
            } => {
                let _ = reply.send(self.handle_set_property(&client, key, value));
            }
        }
    }

    fn reject(request: AdminCommand) {
        let unavailable = || HidError::Session(SessionError::Unavailable);
        match request {
            AdminCommand::Open { reply, .. } => drop(reply.send(Err(unavailable()))),
            AdminCommand::Close { reply, .. } => drop(reply.send(Err(unavailable()))),
            AdminCommand::CopyEvent { reply, .. } => drop(reply.send(Err(unavailable()))),
            AdminCommand::GetProperty { reply, .. } => drop(reply.send(Err(unavailable()))),
            AdminCommand::SetProperty { reply, .. } => drop(reply.send(Err(unavailable()))),
        }
    }

    fn handle_open(
        &self,
        client: ClientId,
        options: OpenOptions,
        properties: HashMap<String, serde_json::Value>,
    ) -> HidResult<QueueAttachment> {
        if !self.entitlements.is_entitled(&client, QUEUE_CAPABILITY) {
            tracing::warn!(device_id = %self.device_id, client = %client, "Open denied");
            return Err(SessionError::NotEntitled { client }.into());
        }

        if self.sessions.contains_key(&client) {
            return Err(SessionError::AlreadyOpen { client }.into());
        }

        let mut lifecycle = SessionLifecycle::new();
        lifecycle.transition_to(SessionState::Opening)?;
        lifecycle.transition_to(SessionState::Active)?;

        tracing::info!(device_id = %self.device_id, client = %client, "Session opened");

        self.sessions.insert(
            client,
            SessionRecord {
                lifecycle,
                options,
                properties,
            },
        );

        Ok(QueueAttachment {
            region_name: self.queue.region_name().to_string(),
            region_size: self.queue.region_size(),
            capacity: self.queue.capacity(),
        })
    }

    fn handle_close(&self, client: &ClientId) -> HidResult<()> {
        let Some((_, mut record)) = self.sessions.remove(client) else {
            return Err(SessionError::NotOpen {
                client: client.clone(),
            }
            .into());
        };

        record.lifecycle.transition_to(SessionState::Closing)?;
        record.lifecycle.transition_to(SessionState::Closed)?;

        tracing::info!(device_id = %self.device_id, client = %client, "Session closed");
        Ok(())
    }

    fn require_active(&self, client: &ClientId) -> HidResult<()> {
        match self.sessions.get(client) {
            Some(record) if record.lifecycle.state().accepts_requests() => Ok(()),
            _ => Err(SessionError::NotOpen {
                client: client.clone(),
            }
            .into()),
        }
    }

    fn handle_copy(
        &self,
        client: &ClientId,
        event_type: EventType,
        options: CopyEventOptions,
    ) -> HidResult<Event> {
        self.require_active(client)?;

        // Exact root-type hit first, then any composite whose mask carries
        // the requested type (unless the caller asked for root matches only).
        if let Some(event) = self.latest.get(&event_type.tag()) {
            self.stats.record_copy();
            return Ok(event.clone());
        }

        if !options.contains(CopyEventOptions::EXACT_TYPE) {
            for entry in self.latest.iter() {
                if entry.value().type_mask() & event_type.type_mask() != 0 {
                    self.stats.record_copy();
                    return Ok(entry.value().clone());
                }
            }
        }

        Err(SessionError::NoSuchEvent { event_type }.into())
    }

    fn handle_get_property(&self, client: &ClientId, key: &str) -> HidResult<serde_json::Value> {
        self.require_active(client)?;

        // Reserved keys report queue and session state.
        match key {
            "queue_capacity" => return Ok(serde_json::json!(self.queue.capacity())),
            "region_name" => return Ok(serde_json::json!(self.queue.region_name())),
            "region_size" => return Ok(serde_json::json!(self.queue.region_size())),
            "stats" => {
                let snapshot = self.stats.snapshot();
                return serde_json::to_value(snapshot).map_err(|e| {
                    HidError::Session(SessionError::BadArgument {
                        reason: format!("stats serialization: {}", e),
                    })
                });
            }
            _ => {}
        }

        let record = self.sessions.get(client).ok_or_else(|| SessionError::NotOpen {
            client: client.clone(),
        })?;
        if key == "open_options" {
            return Ok(serde_json::json!(record.options.bits()));
        }
        record
            .properties
            .get(key)
            .cloned()
            .ok_or_else(|| {
                SessionError::BadArgument {
                    reason: format!("unknown property '{}'", key),
                }
                .into()
            })
    }

    fn handle_set_property(
        &self,
        client: &ClientId,
        key: String,
        value: serde_json::Value,
    ) -> HidResult<()> {
        self.require_active(client)?;

        if key.is_empty() {
            return Err(SessionError::BadArgument {
                reason: "property key cannot be empty".to_string(),
            }
            .into());
        }

        let mut record = self
            .sessions
            .get_mut(client)
            .ok_or_else(|| SessionError::NotOpen {
                client: client.clone(),
            })?;
        record.properties.insert(key, value);
        Ok(())
    }

    fn close_all(&self) {
        let clients: Vec<ClientId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for client in clients {
            if let Some((_, mut record)) = self.sessions.remove(&client) {
                let _ = record.lifecycle.transition_to(SessionState::Closing);
                let _ = record.lifecycle.transition_to(SessionState::Closed);
                tracing::info!(
                    device_id = %self.device_id,
                    client = %client,
                    "Session closed by teardown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::shm::NullNotifier;
    use crate::types::{Fixed, Timestamp};

    struct DenyAll;

    impl EntitlementChecker for DenyAll {
        fn is_entitled(&self, _client: &ClientId, _capability: &str) -> bool {
            false
        }
    }

    fn test_config(device: &str) -> PipelineConfig {
        PipelineConfig {
            device_id: DeviceId::new(device).unwrap(),
            queue: QueueConfig::default(),
        }
    }

    fn spawn_manager(device: &str, entitlements: Arc<dyn EntitlementChecker>) -> SessionHandle {
        SessionHandle::spawn(
            test_config(device),
            &PosixShmProvider,
            entitlements,
            Arc::new(NullNotifier),
        )
        .expect("spawn manager")
    }

    fn client(name: &str) -> ClientId {
        ClientId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_open_close_cycle() {
        let handle = spawn_manager("mgr-open-close", Arc::new(AllowAll));
        let c = client("viewer");

        let attachment = handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();
        assert!(attachment.region_name.contains("mgr-open-close"));
        assert!(attachment.capacity >= 64);

        handle.close(c.clone()).await.unwrap();

        // Closed means a fresh open is allowed again.
        handle.open(c, OpenOptions::empty(), HashMap::new()).await.unwrap();
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_double_open_rejected() {
        let handle = spawn_manager("mgr-double-open", Arc::new(AllowAll));
        let c = client("viewer");

        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();
        let err = handle.open(c, OpenOptions::empty(), HashMap::new()).await.unwrap_err();
        assert!(matches!(
            err,
            HidError::Session(SessionError::AlreadyOpen { .. })
        ));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_unentitled_client_rejected() {
        let handle = spawn_manager("mgr-denied", Arc::new(DenyAll));
        let err = handle
            .open(client("intruder"), OpenOptions::empty(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HidError::Session(SessionError::NotEntitled { .. })
        ));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_copy_event_fast_path() {
        let handle = spawn_manager("mgr-copy", Arc::new(AllowAll));
        let c = client("viewer");
        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();

        let event = Event::temperature(Timestamp::from_nanos(77), Fixed::from_int(21));
        handle.dispatch(&event).unwrap();

        let copy = handle
            .copy_event(c.clone(), EventType::Temperature, CopyEventOptions::empty())
            .await
            .unwrap();
        assert_eq!(copy, event);

        // No gyro has ever been dispatched.
        let err = handle.copy_event(c, EventType::Gyro, CopyEventOptions::empty()).await.unwrap_err();
        assert!(matches!(
            err,
            HidError::Session(SessionError::NoSuchEvent { .. })
        ));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_copy_event_finds_composite_by_mask() {
        let handle = spawn_manager("mgr-copy-mask", Arc::new(AllowAll));
        let c = client("viewer");
        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();

        let mut pointer =
            Event::translation(Timestamp::from_nanos(5), Fixed::ONE, Fixed::ZERO, Fixed::ZERO);
        pointer.append_child(Event::button(Timestamp::from_nanos(5), 1, 0, 1, true)).unwrap();
        handle.dispatch(&pointer).unwrap();

        let copy = handle.copy_event(c, EventType::Button, CopyEventOptions::empty()).await.unwrap();
        assert!(copy.find_event(EventType::Button).is_some());
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_copy_event_exact_type_skips_composites() {
        let handle = spawn_manager("mgr-copy-exact", Arc::new(AllowAll));
        let c = client("viewer");
        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();

        // The only Button on record lives inside a pointer composite.
        let mut pointer =
            Event::translation(Timestamp::from_nanos(9), Fixed::ONE, Fixed::ZERO, Fixed::ZERO);
        pointer.append_child(Event::button(Timestamp::from_nanos(9), 1, 0, 1, true)).unwrap();
        handle.dispatch(&pointer).unwrap();

        let err = handle
            .copy_event(c.clone(), EventType::Button, CopyEventOptions::EXACT_TYPE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HidError::Session(SessionError::NoSuchEvent { .. })
        ));

        // The default lookup still falls back to the mask scan.
        let copy = handle
            .copy_event(c, EventType::Button, CopyEventOptions::empty())
            .await
            .unwrap();
        assert!(copy.find_event(EventType::Button).is_some());
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_copy_without_open_fails() {
        let handle = spawn_manager("mgr-no-open", Arc::new(AllowAll));
        let err = handle
            .copy_event(client("stranger"), EventType::Keyboard, CopyEventOptions::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, HidError::Session(SessionError::NotOpen { .. })));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_properties() {
        let handle = spawn_manager("mgr-props", Arc::new(AllowAll));
        let c = client("viewer");

        let mut initial = HashMap::new();
        initial.insert("report_interval_us".to_string(), serde_json::json!(2000));
        handle.open(c.clone(), OpenOptions::empty(), initial).await.unwrap();

        let interval = handle
            .get_property(c.clone(), "report_interval_us")
            .await
            .unwrap();
        assert_eq!(interval, serde_json::json!(2000));

        handle
            .set_property(c.clone(), "report_interval_us", serde_json::json!(500))
            .await
            .unwrap();
        let interval = handle
            .get_property(c.clone(), "report_interval_us")
            .await
            .unwrap();
        assert_eq!(interval, serde_json::json!(500));

        // Reserved keys.
        let cap = handle.get_property(c.clone(), "queue_capacity").await.unwrap();
        assert_eq!(cap, serde_json::json!(16 * 1024));

        let opts = handle.get_property(c.clone(), "open_options").await.unwrap();
        assert_eq!(opts, serde_json::json!(OpenOptions::empty().bits()));

        let err = handle.get_property(c, "no_such_key").await.unwrap_err();
        assert!(matches!(
            err,
            HidError::Session(SessionError::BadArgument { .. })
        ));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_requests_after_teardown_fail_fast() {
        let handle = spawn_manager("mgr-teardown", Arc::new(AllowAll));
        let c = client("viewer");
        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();

        handle.teardown().await;

        let err = handle.open(client("late"), OpenOptions::empty(), HashMap::new()).await.unwrap_err();
        assert!(matches!(err, HidError::Session(SessionError::Unavailable)));

        let err = handle
            .dispatch(&Event::temperature(Timestamp::from_nanos(1), Fixed::ZERO))
            .unwrap_err();
        assert!(matches!(err, HidError::Session(SessionError::Unavailable)));
    }

    #[tokio::test]
    async fn test_close_racing_copy_is_serialized() {
        // Scenario: Close issued concurrently with CopyEvent. Both go
        // through the single command task, so the copy either completes
        // against a live session or fails with NotOpen; it never observes
        // torn-down state.
        let handle = spawn_manager("mgr-race", Arc::new(AllowAll));
        let c = client("viewer");
        handle.open(c.clone(), OpenOptions::empty(), HashMap::new()).await.unwrap();
        handle
            .dispatch(&Event::temperature(Timestamp::from_nanos(3), Fixed::ONE))
            .unwrap();

        let copy_handle = handle.clone();
        let copy_client = c.clone();
        let copier = tokio::spawn(async move {
            copy_handle
                .copy_event(copy_client, EventType::Temperature, CopyEventOptions::empty())
                .await
        });
        let closer = tokio::spawn({
            let handle = handle.clone();
            async move { handle.close(c).await }
        });

        let copy_result = copier.await.unwrap();
        let close_result = closer.await.unwrap();

        assert!(close_result.is_ok());
        match copy_result {
            Ok(event) => assert_eq!(event.event_type(), EventType::Temperature),
            Err(HidError::Session(SessionError::NotOpen { .. })) => {}
            Err(other) => panic!("unexpected copy failure: {other}"),
        }
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_counted() {
        // A 256-byte queue overflows quickly; failures are recoverable and
        // recorded, not fatal.
        let mut config = test_config("mgr-overflow");
        config.queue.capacity = 256;
        let handle = SessionHandle::spawn(
            config,
            &PosixShmProvider,
            Arc::new(AllowAll),
            Arc::new(NullNotifier),
        )
        .unwrap();

        let mut failures = 0;
        for i in 0..10 {
            if handle
                .dispatch(&Event::temperature(Timestamp::from_nanos(i), Fixed::ZERO))
                .is_err()
            {
                failures += 1;
            }
        }

        assert!(failures > 0);
        let stats = handle.stats();
        assert_eq!(stats.enqueued, 10 - failures);
        assert_eq!(stats.enqueue_failures, failures);
        handle.teardown().await;
    }
}
