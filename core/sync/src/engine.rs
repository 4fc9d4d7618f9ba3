//! Sync orchestrator: the consumer-facing façade over the four tiers.

use chrono::{DateTime, Utc};
use futures::join;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use prefsync_common::{
    Error, PreferenceDocument, PreferencePatch, Result, TierId, TierOutcome,
};
use prefsync_storage::StorageTier;

use crate::bridge::CrossTabBridge;
use crate::conflict::{is_newer, resolve, Candidate};
use crate::connectivity::Connectivity;
use crate::queue::{OfflineQueue, DEFAULT_ATTEMPT_WARNING_CAP};
use crate::retry::{with_timeout, RetryConfig};
use crate::scheduler::{DrainLoopHandle, DrainReport, DrainScheduler};
use crate::state::{SyncStatus, SyncTracker};

fn default_remote_timeout_ms() -> u64 {
    5000
}

fn default_drain_interval_secs() -> u64 {
    30
}

fn default_broadcast_debounce_ms() -> u64 {
    50
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_attempt_warning_cap() -> u32 {
    DEFAULT_ATTEMPT_WARNING_CAP
}

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on each remote call.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    /// Period of the background drain tick.
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    /// Period of remote polling; 0 disables it.
    #[serde(default)]
    pub poll_interval_secs: u64,
    /// Cross-tab broadcast debounce window.
    #[serde(default = "default_broadcast_debounce_ms")]
    pub broadcast_debounce_ms: u64,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub retry_jitter: bool,
    /// Attempts after which a failing queue entry is logged as a warning.
    #[serde(default = "default_attempt_warning_cap")]
    pub attempt_warning_cap: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: default_remote_timeout_ms(),
            drain_interval_secs: default_drain_interval_secs(),
            poll_interval_secs: 0,
            broadcast_debounce_ms: default_broadcast_debounce_ms(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            retry_jitter: true,
            attempt_warning_cap: default_attempt_warning_cap(),
        }
    }
}

impl SyncConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Drain tick period, at least one second.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    pub fn broadcast_debounce(&self) -> Duration {
        Duration::from_millis(self.broadcast_debounce_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_backoff_multiplier(self.retry_backoff_multiplier)
            .with_jitter(self.retry_jitter)
    }
}

/// The four tiers of one tab.
///
/// `remote` is `None` for a signed-out session; remote outcomes are then
/// reported as unauthenticated and nothing is queued.
#[derive(Clone)]
pub struct TierSet {
    pub tab: Arc<dyn StorageTier>,
    pub local: Arc<dyn StorageTier>,
    pub offline: Arc<dyn StorageTier>,
    pub remote: Option<Arc<dyn StorageTier>>,
}

impl TierSet {
    fn local_tiers(&self) -> [&Arc<dyn StorageTier>; 3] {
        [&self.tab, &self.local, &self.offline]
    }
}

/// Result of [`SyncOrchestrator::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub document: PreferenceDocument,
    /// Tier the document came from, `None` when defaults were created.
    pub source_tier: Option<TierId>,
}

/// Handle returned by [`SyncOrchestrator::on_remote_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&PreferenceDocument) + Send + Sync>;

/// How far an externally received document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdoptScope {
    /// Tab cache only; the sender already wrote the shared durable tiers.
    TabOnly,
    /// Tab cache and both durable tiers.
    AllLocal,
}

struct DocState {
    document: PreferenceDocument,
    loaded: bool,
    /// Newest `updated_at` the remote is known to have assigned.
    remote_floor: Option<DateTime<Utc>>,
}

impl DocState {
    fn unloaded() -> Self {
        Self {
            document: PreferenceDocument::default_at(DateTime::<Utc>::default()),
            loaded: false,
            remote_floor: None,
        }
    }
}

const NO_REMOTE: &str = "no remote account configured";

/// Keeps one tab's preference document consistent across all tiers.
///
/// Reading and changing preferences never fails because of a tier: every
/// tier error is logged and reported as a [`TierOutcome`].
pub struct SyncOrchestrator {
    tiers: TierSet,
    queue: OfflineQueue,
    connectivity: Connectivity,
    config: SyncConfig,
    retry: RetryConfig,
    bridge: Option<CrossTabBridge>,
    state: RwLock<DocState>,
    /// Serializes saves of this tab.
    save_lock: Mutex<()>,
    /// Orders remote writes; taken before the save lock is released.
    remote_lock: Mutex<()>,
    tracker: SyncTracker,
    listeners: std::sync::Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl SyncOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        tiers: TierSet,
        queue: OfflineQueue,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        let retry = config.retry_config();
        Self {
            tiers,
            queue,
            connectivity,
            config,
            retry,
            bridge: None,
            state: RwLock::new(DocState::unloaded()),
            save_lock: Mutex::new(()),
            remote_lock: Mutex::new(()),
            tracker: SyncTracker::new(),
            listeners: std::sync::Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Attach a cross-tab bridge.
    pub fn with_bridge(mut self, bridge: CrossTabBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Document currently held in memory.
    pub async fn current(&self) -> PreferenceDocument {
        self.state.read().await.document.clone()
    }

    /// Run a remote call, failing fast when offline.
    async fn remote_call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.connectivity.is_online() {
            return Err(Error::Network("offline".to_string()));
        }
        with_timeout(self.config.remote_timeout(), operation).await
    }

    /// Read every tier, resolve the newest document and repair the rest.
    pub async fn load(&self) -> LoadResult {
        let remote_read = async {
            match &self.tiers.remote {
                Some(remote) if self.connectivity.is_online() => {
                    let _progress = self.tracker.begin();
                    Some(self.remote_call(remote.read()).await)
                }
                _ => None,
            }
        };

        let (tab, local, offline, remote) = join!(
            self.tiers.tab.read(),
            self.tiers.local.read(),
            self.tiers.offline.read(),
            remote_read
        );

        let mut candidates = Vec::with_capacity(4);
        for (tier, result) in [
            (TierId::TabCache, tab),
            (TierId::LocalStore, local),
            (TierId::OfflineStore, offline),
        ] {
            match result {
                Ok(Some(doc)) => candidates.push(Candidate::new(tier, doc)),
                Ok(None) => {}
                Err(e) => warn!(tier = %tier, error = %e, "Tier unreadable, treating as empty"),
            }
        }

        // Some(held) when the remote answered; held is None if it is empty.
        let remote_answer = match remote {
            Some(Ok(doc)) => {
                if let Some(doc) = &doc {
                    self.note_remote_stamp(doc.updated_at).await;
                    candidates.push(Candidate::new(TierId::Remote, doc.clone()));
                }
                Some(doc)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Remote read failed");
                None
            }
            None => None,
        };

        let Some(winner) = resolve(&candidates).cloned() else {
            let document = PreferenceDocument::new_default();
            info!("No stored preferences, creating defaults");
            self.write_local_tiers(&document, &[]).await;
            self.set_loaded(&document).await;
            return LoadResult {
                document,
                source_tier: None,
            };
        };

        debug!(tier = %winner.tier, version = winner.document.version, "Resolved preferences");

        self.write_local_tiers(&winner.document, &candidates).await;

        self.set_loaded(&winner.document).await;

        if winner.tier == TierId::Remote {
            self.queue.discard_superseded(winner.document.updated_at).await;
        } else if let Some(held) = remote_answer {
            if held.as_ref() != Some(&winner.document) {
                let _remote = self.remote_lock.lock().await;
                self.write_remote_or_enqueue(&winner.document).await;
            }
        }

        LoadResult {
            document: self.current().await,
            source_tier: Some(winner.tier),
        }
    }

    async fn set_loaded(&self, doc: &PreferenceDocument) {
        let mut state = self.state.write().await;
        if !state.loaded || !is_newer(&state.document, doc) {
            state.document = doc.clone();
        }
        state.loaded = true;
    }

    /// Write `doc` to every local tier whose candidate is missing or differs.
    async fn write_local_tiers(&self, doc: &PreferenceDocument, candidates: &[Candidate]) {
        let stale = |tier: TierId| {
            !candidates
                .iter()
                .any(|c| c.tier == tier && &c.document == doc)
        };

        let write = |tier: &Arc<dyn StorageTier>| {
            let tier = tier.clone();
            let needed = stale(tier.tier());
            async move {
                if !needed {
                    return;
                }
                if let Err(e) = tier.write(doc).await {
                    warn!(tier = %tier.tier(), error = %e, "Failed to back-fill tier");
                }
            }
        };

        let [tab, local, offline] = self.tiers.local_tiers();
        join!(write(tab), write(local), write(offline));
    }

    /// Apply a partial update and propagate it.
    ///
    /// Returns one outcome per tier in `[T1, T2, T3, T4]` order.
    pub async fn save(&self, patch: &PreferencePatch) -> Vec<TierOutcome> {
        if !self.state.read().await.loaded {
            self.load().await;
        }

        let save_guard = self.save_lock.lock().await;

        let doc = {
            let mut state = self.state.write().await;
            let mut next = state.document.clone();
            next.apply(patch);
            next.bump(Utc::now());
            state.document = next.clone();
            state.loaded = true;
            next
        };

        let (tab, local, offline) = join!(
            self.tiers.tab.write(&doc),
            self.tiers.local.write(&doc),
            self.tiers.offline.write(&doc)
        );

        let mut outcomes = Vec::with_capacity(4);
        for (tier, result) in [
            (TierId::TabCache, tab),
            (TierId::LocalStore, local),
            (TierId::OfflineStore, offline),
        ] {
            if let Err(e) = &result {
                warn!(tier = %tier, error = %e, "Local write failed");
            }
            outcomes.push(TierOutcome::from_result(tier, &result));
        }

        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.broadcast(&doc).await {
                warn!(error = %e, "Cross-tab broadcast failed");
            }
        }

        let remote_guard = self.remote_lock.lock().await;
        drop(save_guard);
        outcomes.push(self.write_remote_or_enqueue(&doc).await);
        drop(remote_guard);

        debug!(version = doc.version, "Saved preferences");
        outcomes
    }

    /// Write to the remote, queueing the document on failure.
    ///
    /// The document is first moved past every timestamp the remote has
    /// assigned, and the canonical copy it returns replaces the held one.
    /// Callers hold the remote lock.
    async fn write_remote_or_enqueue(&self, doc: &PreferenceDocument) -> TierOutcome {
        let Some(remote) = &self.tiers.remote else {
            return TierOutcome::failed(TierId::Remote, &Error::Unauthenticated(NO_REMOTE.into()));
        };

        let doc = self.stamp_past_remote(doc).await;

        let result = {
            let _progress = self.tracker.begin();
            self.remote_call(remote.write(&doc)).await
        };

        match result {
            Ok(canonical) => {
                self.queue.discard_superseded(doc.updated_at).await;
                self.tracker.record_sync(Utc::now());
                self.accept_canonical(&doc, canonical).await;
                TierOutcome::ok(TierId::Remote)
            }
            Err(e) => {
                debug!(error = %e, "Remote write deferred to queue");
                self.queue.enqueue(&doc).await;
                TierOutcome::failed(TierId::Remote, &e)
            }
        }
    }

    /// Remember a timestamp assigned by the remote.
    async fn note_remote_stamp(&self, stamp: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if state.remote_floor.map_or(true, |floor| stamp > floor) {
            state.remote_floor = Some(stamp);
        }
    }

    /// Move `doc` past the newest remote timestamp seen so far.
    async fn stamp_past_remote(&self, doc: &PreferenceDocument) -> PreferenceDocument {
        let floor = self.state.read().await.remote_floor;
        match floor {
            Some(floor) if doc.updated_at <= floor => {
                let mut lifted = doc.clone();
                lifted.updated_at = floor + chrono::Duration::milliseconds(1);
                debug!(version = doc.version, "Restamped preferences past remote clock");
                self.replace_held(doc, &lifted).await;
                lifted
            }
            _ => doc.clone(),
        }
    }

    /// Take over the copy the remote stored for `sent`.
    async fn accept_canonical(&self, sent: &PreferenceDocument, canonical: PreferenceDocument) {
        self.note_remote_stamp(canonical.updated_at).await;
        if canonical.updated_at != sent.updated_at {
            self.replace_held(sent, &canonical).await;
        }
    }

    /// Swap `previous` for `next` while this tab still holds `previous`,
    /// then rewrite the local tiers and tell the other tabs.
    async fn replace_held(&self, previous: &PreferenceDocument, next: &PreferenceDocument) {
        {
            let mut state = self.state.write().await;
            if state.document != *previous {
                return;
            }
            state.document = next.clone();
        }

        let (tab, local, offline) = join!(
            self.tiers.tab.write(next),
            self.tiers.local.write(next),
            self.tiers.offline.write(next)
        );
        for (tier, result) in [
            (TierId::TabCache, tab),
            (TierId::LocalStore, local),
            (TierId::OfflineStore, offline),
        ] {
            if let Err(e) = result {
                warn!(tier = %tier, error = %e, "Failed to store canonical preferences");
            }
        }

        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.broadcast(next).await {
                warn!(error = %e, "Cross-tab broadcast failed");
            }
        }
    }

    /// Remove the document from every tier and empty the queue.
    ///
    /// The device identity is kept. The next `save` reloads first.
    pub async fn clear(&self) -> Vec<TierOutcome> {
        let _save = self.save_lock.lock().await;
        let _remote = self.remote_lock.lock().await;

        let remote_clear = async {
            match &self.tiers.remote {
                Some(remote) => {
                    let _progress = self.tracker.begin();
                    self.remote_call(remote.clear()).await
                }
                None => Err(Error::Unauthenticated(NO_REMOTE.into())),
            }
        };

        let (tab, local, offline, remote) = join!(
            self.tiers.tab.clear(),
            self.tiers.local.clear(),
            self.tiers.offline.clear(),
            remote_clear
        );

        let outcomes: Vec<TierOutcome> = [
            (TierId::TabCache, tab),
            (TierId::LocalStore, local),
            (TierId::OfflineStore, offline),
            (TierId::Remote, remote),
        ]
        .into_iter()
        .map(|(tier, result)| {
            if let Err(e) = &result {
                warn!(tier = %tier, error = %e, "Clear failed");
            }
            TierOutcome::from_result(tier, &result)
        })
        .collect();

        self.queue.clear().await;
        self.tracker.reset();
        *self.state.write().await = DocState::unloaded();

        info!("Cleared preferences");
        outcomes
    }

    /// Write a cross-tab broadcast still waiting in the debounce window.
    ///
    /// Call before the runtime shuts down.
    pub async fn flush_broadcasts(&self) -> Result<()> {
        match &self.bridge {
            Some(bridge) => bridge.flush().await,
            None => Ok(()),
        }
    }

    /// Current synchronization status.
    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.connectivity.is_online(),
            sync_in_progress: self.tracker.in_progress(),
            queue_length: self.queue.len().await,
            last_sync_timestamp: self.tracker.last_sync(),
        }
    }

    /// Register a callback fired when another tab or device delivers a
    /// newer document.
    pub fn on_remote_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&PreferenceDocument) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(callback)));
        }
        id
    }

    /// Unregister a callback; returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        match self.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(lid, _)| *lid != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    fn notify(&self, doc: &PreferenceDocument) {
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(doc);
        }
    }

    /// Take over a document received from elsewhere if it is newer.
    async fn adopt(&self, doc: PreferenceDocument, scope: AdoptScope) -> bool {
        {
            let mut state = self.state.write().await;
            if !is_newer(&doc, &state.document) {
                return false;
            }
            state.document = doc.clone();
        }

        if let Err(e) = self.tiers.tab.write(&doc).await {
            warn!(error = %e, "Failed to cache adopted preferences");
        }
        if scope == AdoptScope::AllLocal {
            let (local, offline) = join!(
                self.tiers.local.write(&doc),
                self.tiers.offline.write(&doc)
            );
            for (tier, result) in [(TierId::LocalStore, local), (TierId::OfflineStore, offline)] {
                if let Err(e) = result {
                    warn!(tier = %tier, error = %e, "Failed to store adopted preferences");
                }
            }
        }

        debug!(version = doc.version, ?scope, "Adopted newer preferences");
        self.notify(&doc);
        true
    }

    /// Deliver queued writes to the remote.
    ///
    /// Stops at the first failure and reports the back-off to observe
    /// before the next attempt. Queued documents older than what the
    /// remote already holds are discarded instead of overwriting it.
    pub async fn drain_queue(&self) -> DrainReport {
        let Some(remote) = &self.tiers.remote else {
            return DrainReport::default();
        };
        if !self.connectivity.is_online() || self.queue.is_empty().await {
            return DrainReport {
                remaining: self.queue.len().await,
                ..DrainReport::default()
            };
        }

        let _remote = self.remote_lock.lock().await;
        let _progress = self.tracker.begin();
        let mut drained = 0;

        match self.remote_call(remote.read()).await {
            Ok(Some(current)) => {
                self.note_remote_stamp(current.updated_at).await;
                let discarded = self.queue.discard_superseded(current.updated_at).await;
                if discarded > 0 {
                    info!(discarded, "Remote already holds newer preferences");
                    self.adopt(current, AdoptScope::AllLocal).await;
                }
            }
            Ok(None) => {}
            Err(e) => return self.drain_failed(None, e, drained).await,
        }

        let mut last_id = 0;
        while let Some(entry) = self.queue.peek_oldest().await {
            if entry.id <= last_id {
                // Acknowledged but still listed: the store rejected the update.
                break;
            }
            last_id = entry.id;

            match self.remote_call(remote.write(&entry.payload)).await {
                Ok(canonical) => {
                    self.queue.acknowledge(entry.id).await;
                    self.tracker.record_sync(Utc::now());
                    self.accept_canonical(&entry.payload, canonical).await;
                    drained += 1;
                    debug!(id = entry.id, "Delivered queued preferences");
                }
                Err(e) => return self.drain_failed(Some(entry.id), e, drained).await,
            }
        }

        let remaining = self.queue.len().await;
        if drained > 0 {
            info!(drained, remaining, "Drained offline queue");
        }
        DrainReport {
            drained,
            remaining,
            retry_after: None,
        }
    }

    async fn drain_failed(&self, id: Option<u64>, err: Error, drained: usize) -> DrainReport {
        let id = match id {
            Some(id) => Some(id),
            None => self.queue.peek_oldest().await.map(|e| e.id),
        };
        let attempts = match id {
            Some(id) => self.queue.record_failure(id).await.unwrap_or(1),
            None => 1,
        };
        let delay = self.retry.delay_for_attempt(attempts);
        warn!(attempts, error = %err, retry_in = ?delay, "Queued remote write failed");

        DrainReport {
            drained,
            remaining: self.queue.len().await,
            retry_after: Some(delay),
        }
    }

    /// Fetch the remote document and adopt it if it is newer.
    ///
    /// Returns the adopted document.
    pub async fn poll_remote(&self) -> Result<Option<PreferenceDocument>> {
        let Some(remote) = &self.tiers.remote else {
            return Ok(None);
        };

        let fetched = {
            let _progress = self.tracker.begin();
            self.remote_call(remote.read()).await?
        };

        let Some(doc) = fetched else {
            return Ok(None);
        };
        self.note_remote_stamp(doc.updated_at).await;
        if !self.adopt(doc.clone(), AdoptScope::AllLocal).await {
            return Ok(None);
        }
        self.queue.discard_superseded(doc.updated_at).await;
        Ok(Some(doc))
    }

    /// Start the background drain loop.
    ///
    /// The loop holds only a weak reference and stops once the
    /// orchestrator is dropped.
    pub fn spawn_drain_loop(self: &Arc<Self>) -> DrainLoopHandle {
        let scheduler = DrainScheduler::new(
            self.config.drain_interval(),
            self.config.poll_interval(),
            self.connectivity.clone(),
        );

        let drain_target = Arc::downgrade(self);
        let poll_target = drain_target.clone();

        scheduler.spawn(
            move || {
                let target = drain_target.clone();
                async move {
                    let orchestrator = target.upgrade()?;
                    Some(orchestrator.drain_queue().await)
                }
            },
            move || {
                let target = poll_target.clone();
                async move {
                    let Some(orchestrator) = target.upgrade() else {
                        return false;
                    };
                    if let Err(e) = orchestrator.poll_remote().await {
                        debug!(error = %e, "Remote poll failed");
                    }
                    true
                }
            },
        )
    }

    /// Start applying documents broadcast by other tabs.
    ///
    /// Returns `None` when no bridge is attached.
    pub fn spawn_bridge_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let bridge = self.bridge.as_ref()?;
        let mut messages = bridge.subscribe();
        let target: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let Some(orchestrator) = target.upgrade() else {
                    break;
                };
                orchestrator.adopt(message.document, AdoptScope::TabOnly).await;
            }
        }))
    }
}
