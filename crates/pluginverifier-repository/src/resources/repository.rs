use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    AvailableResource, FetchError, FetchResult, NeverSweepPolicy, ProvideResult, ResourceDisposer,
    ResourceLock, ResourceProvider, ResourceWeight, SweepPolicy, UsageStatistic,
};
use crate::utils::defer::CallOnDrop;

/// Keys of a [`ResourceRepository`].
pub trait ResourceKey: Eq + std::hash::Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ResourceKey for T where T: Eq + std::hash::Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Values of a [`ResourceRepository`].
///
/// Every lock carries its own clone, so resources should be cheap to clone: paths, handles,
/// or anything behind an [`Arc`].
pub trait Resource: Clone + Send + Sync + 'static {}

impl<T> Resource for T where T: Clone + Send + Sync + 'static {}

/// What the waiters of a pending entry are told once it settles.
///
/// `Some(Ok(_))` comes with one lock per waiter, already counted on the installed entry.
/// `None` means nothing was installed and the key has to be looked up again.
type Outcome<R> = Option<Result<R, FetchError>>;

type OutcomeChannel<R> = Shared<oneshot::Receiver<Outcome<R>>>;

/// A key that is being provisioned, or reserved by an `add` that is still creating its resource.
struct PendingEntry<R> {
    id: u64,
    channel: OutcomeChannel<R>,
    /// Requesters waiting for the outcome.
    waiters: u32,
    /// Set under the repository mutex when the entry is installed with the waiters' locks.
    installed: Arc<AtomicBool>,
}

/// The producing side of a [`PendingEntry`].
struct Reservation<R> {
    id: u64,
    sender: oneshot::Sender<Outcome<R>>,
    channel: OutcomeChannel<R>,
    installed: Arc<AtomicBool>,
}

struct Entry<R, W> {
    resource: R,
    weight: W,
    usage: UsageStatistic,
    lock_count: u32,
    /// Set by `remove_all` on locked entries; the last release disposes them.
    dispose_on_release: bool,
}

struct State<K, R, W> {
    entries: HashMap<K, Entry<R, W>>,
    pending: HashMap<K, PendingEntry<R>>,
    total_weight: W,
    is_closed: bool,
    ticks: u64,
}

impl<K: ResourceKey, R: Resource, W: ResourceWeight> State<K, R, W> {
    fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    /// Locks an existing entry, recording the access.
    fn lock_entry(&mut self, key: &K) -> Option<R> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.lock_count += 1;
        entry.usage.record_access(Instant::now(), tick);
        Some(entry.resource.clone())
    }

    /// Marks `key` as pending, so that requesters wait for its outcome instead of provisioning it.
    fn reserve(&mut self, key: K, waiters: u32) -> Reservation<R> {
        let id = self.tick();
        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        let installed = Arc::new(AtomicBool::new(false));

        let previous = self.pending.insert(
            key,
            PendingEntry {
                id,
                channel: channel.clone(),
                waiters,
                installed: Arc::clone(&installed),
            },
        );
        debug_assert!(previous.is_none());

        Reservation {
            id,
            sender,
            channel,
            installed,
        }
    }

    /// Removes the pending marker of reservation `id`, unless it was superseded.
    fn take_pending(&mut self, key: &K, id: u64) -> Option<PendingEntry<R>> {
        if self.pending.get(key)?.id != id {
            return None;
        }
        self.pending.remove(key)
    }

    fn insert_entry(&mut self, key: K, resource: R, weight: W, usage: UsageStatistic, locks: u32) {
        let entry = Entry {
            resource,
            weight,
            usage,
            lock_count: locks,
            dispose_on_release: false,
        };
        let previous = self.entries.insert(key, entry);
        debug_assert!(previous.is_none());
        self.total_weight = self.total_weight + weight;
    }

    fn remove_entry(&mut self, key: &K) -> Option<(K, R)> {
        let (key, entry) = self.entries.remove_entry(key)?;
        self.total_weight = self.total_weight - entry.weight;
        Some((key, entry.resource))
    }

    /// Removes all entries that are not locked, and returns them for disposal.
    fn drain_unlocked(&mut self) -> Vec<(K, R)> {
        let unlocked: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.lock_count == 0)
            .map(|(key, _)| key.clone())
            .collect();
        unlocked
            .iter()
            .filter_map(|key| self.remove_entry(key))
            .collect()
    }

    fn snapshot(&self, include_locked: bool) -> Vec<AvailableResource<K, W>> {
        self.entries
            .iter()
            .filter(|(_, entry)| include_locked || entry.lock_count == 0)
            .map(|(key, entry)| AvailableResource {
                key: key.clone(),
                weight: entry.weight,
                usage: entry.usage,
                is_locked: entry.lock_count > 0,
            })
            .collect()
    }
}

/// Shared internals of a [`ResourceRepository`], also referenced by every [`ResourceLock`].
pub(crate) struct Inner<K, R, W> {
    name: String,
    state: Mutex<State<K, R, W>>,
    provider: Box<dyn ResourceProvider<K, R>>,
    weigher: Box<dyn Fn(&R) -> W + Send + Sync>,
    disposer: Box<dyn ResourceDisposer<K, R>>,
    sweep_policy: Box<dyn SweepPolicy<K, W>>,
}

impl<K: ResourceKey, R: Resource, W: ResourceWeight> Inner<K, R, W> {
    /// Returns a lock on `key`, coalescing concurrent provisioning of the same key.
    async fn fetch(self: &Arc<Self>, key: &K) -> FetchResult<K, R, W> {
        loop {
            let (id, channel, installed) = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if state.is_closed {
                    return Err(FetchError::Closed);
                }

                if let Some(resource) = state.lock_entry(key) {
                    metric!(counter("repository.hit") += 1, "repository" => &self.name);
                    return Ok(ResourceLock::new(key.clone(), resource, Arc::clone(self)));
                }

                match state.pending.get_mut(key) {
                    Some(pending) => {
                        metric!(
                            counter("repository.fetch.deduplicated") += 1,
                            "repository" => &self.name
                        );
                        pending.waiters += 1;
                        (
                            pending.id,
                            pending.channel.clone(),
                            Arc::clone(&pending.installed),
                        )
                    }
                    None => {
                        let reservation = state.reserve(key.clone(), 1);
                        let waiting = (
                            reservation.id,
                            reservation.channel.clone(),
                            Arc::clone(&reservation.installed),
                        );
                        self.spawn_fetch(key.clone(), reservation);
                        waiting
                    }
                }
            };

            // A waiter that goes away hands back the lock counted on its behalf.
            let abandon = {
                let inner = Arc::clone(self);
                let key = key.clone();
                CallOnDrop::new(move || inner.abandon_wait(&key, id, &installed))
            };
            let outcome = channel.await;
            abandon.disarm();

            match outcome {
                Ok(Some(Ok(resource))) => {
                    return Ok(ResourceLock::new(key.clone(), resource, Arc::clone(self)));
                }
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => continue,
                Err(oneshot::Canceled) => return Err(FetchError::Interrupted),
            }
        }
    }

    /// Runs the provider call for a fresh reservation in the background.
    ///
    /// The provisioning is owned by the spawned task, not by any requester: it runs to
    /// completion even if every requester goes away.
    fn spawn_fetch(self: &Arc<Self>, key: K, reservation: Reservation<R>) {
        let Reservation { id, sender, .. } = reservation;

        // Only runs when the task is dropped before completing, e.g. on runtime shutdown.
        // Waiters then observe a cancelled channel.
        let remove_pending = {
            let inner = Arc::clone(self);
            let key = key.clone();
            CallOnDrop::new(move || inner.remove_pending(&key, id))
        };

        let inner = Arc::clone(self);
        let task = async move {
            tracing::trace!(repository = %inner.name, key = ?key, "Provisioning resource");
            metric!(counter("repository.fetch") += 1, "repository" => &inner.name);

            let provided = AssertUnwindSafe(inner.provider.provide(&key))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(&*panic);
                    ProvideResult::Failed(
                        "resource provider panicked".into(),
                        anyhow::anyhow!("{message}"),
                    )
                });

            let outcome = inner.complete_fetch(&key, id, provided);
            remove_pending.disarm();
            sender.send(outcome).ok();
        };
        tokio::spawn(task);
    }

    fn remove_pending(&self, key: &K, id: u64) {
        self.state.lock().take_pending(key, id);
    }

    /// Accounts for a waiter of reservation `id` that stopped waiting.
    fn abandon_wait(&self, key: &K, id: u64, installed: &AtomicBool) {
        {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.get_mut(key) {
                if pending.id == id {
                    pending.waiters -= 1;
                    return;
                }
            }
        }
        // The reservation settled while the mutex was free, so `installed` is final.
        if installed.load(Ordering::Acquire) {
            self.release(key);
        }
    }

    /// Installs the outcome of a provider call and clears the pending marker.
    fn complete_fetch(&self, key: &K, id: u64, provided: ProvideResult<R>) -> Outcome<R> {
        match provided {
            ProvideResult::Provided(resource) => {
                let weight = (self.weigher)(&resource);
                let outcome = self.install(key, id, resource, weight);
                if let Some(Ok(_)) = &outcome {
                    tracing::debug!(
                        repository = %self.name,
                        key = ?key,
                        weight = ?weight,
                        "Resource provisioned"
                    );
                }
                outcome
            }
            ProvideResult::NotFound(reason) => {
                self.remove_pending(key, id);
                tracing::debug!(repository = %self.name, key = ?key, %reason, "Resource not found");
                Some(Err(FetchError::NotFound(reason)))
            }
            ProvideResult::Failed(reason, error) => {
                self.remove_pending(key, id);
                let stderr: &dyn std::error::Error = error.as_ref();
                tracing::warn!(
                    repository = %self.name,
                    key = ?key,
                    error = stderr,
                    "{reason}"
                );
                Some(Err(FetchError::failed(reason, error)))
            }
        }
    }

    /// Turns reservation `id` into an entry, locked once for every waiter.
    ///
    /// If the repository was closed in the meantime, the resource is disposed instead.
    fn install(&self, key: &K, id: u64, resource: R, weight: W) -> Outcome<R> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pending = state.take_pending(key, id);

        if state.is_closed {
            drop(guard);
            tracing::debug!(
                repository = %self.name,
                key = ?key,
                "Repository closed while provisioning, disposing resource"
            );
            self.dispose(key, resource);
            return Some(Err(FetchError::Closed));
        }

        let waiters = pending.as_ref().map_or(0, |pending| pending.waiters);
        let tick = state.tick();
        let now = Instant::now();
        let mut usage = UsageStatistic::new(now, tick);
        if waiters > 0 {
            usage.record_accesses(u64::from(waiters), now, tick);
        }
        state.insert_entry(key.clone(), resource.clone(), weight, usage, waiters);
        if let Some(pending) = &pending {
            pending.installed.store(true, Ordering::Release);
        }
        let total_weight = state.total_weight;
        drop(guard);

        metric!(
            gauge("repository.total_weight") = total_weight.units(),
            "repository" => &self.name
        );
        // With waiters, the sweep runs once they got their locks.
        if waiters == 0 {
            self.cleanup();
        }
        Some(Ok(resource))
    }

    /// Gives back one lock on `key`, disposing the entry if it was the last lock of an entry
    /// scheduled for removal.
    pub(crate) fn release(&self, key: &K) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(key) else {
            tracing::error!(repository = %self.name, key = ?key, "Released lock of unknown entry");
            return;
        };
        debug_assert!(entry.lock_count > 0);
        entry.lock_count = entry.lock_count.saturating_sub(1);

        let disposed = if entry.lock_count == 0 && (entry.dispose_on_release || state.is_closed) {
            state.remove_entry(key)
        } else {
            None
        };
        let sweep = !state.is_closed && self.sweep_policy.is_necessary(state.total_weight);
        drop(guard);

        if let Some((key, resource)) = disposed {
            self.dispose(&key, resource);
        }
        if sweep {
            self.cleanup();
        }
    }

    fn cleanup(&self) -> usize {
        let evicted: Vec<(K, R)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.is_closed || !self.sweep_policy.is_necessary(state.total_weight) {
                return 0;
            }

            let candidates = state.snapshot(false);
            let selected = self
                .sweep_policy
                .select_for_eviction(candidates, state.total_weight);

            selected
                .into_iter()
                .filter_map(|key| match state.entries.get(&key) {
                    Some(entry) if entry.lock_count == 0 => state.remove_entry(&key),
                    _ => None,
                })
                .collect()
        };

        let count = evicted.len();
        if count > 0 {
            tracing::debug!(repository = %self.name, count, "Evicting resources");
            metric!(
                gauge("repository.total_weight") = self.state.lock().total_weight.units(),
                "repository" => &self.name
            );
        }
        for (key, resource) in evicted {
            self.dispose(&key, resource);
        }
        count
    }

    fn dispose(&self, key: &K, resource: R) {
        metric!(counter("repository.evicted") += 1, "repository" => &self.name);
        tracing::trace!(repository = %self.name, key = ?key, "Disposing resource");
        if let Err(err) = self.disposer.dispose(key, resource) {
            let stderr: &dyn std::error::Error = err.as_ref();
            tracing::error!(
                repository = %self.name,
                key = ?key,
                error = stderr,
                "Failed to dispose resource"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// A key-indexed cache of expensive resources.
///
/// Resources are created on demand by a [`ResourceProvider`], weighed, and kept until a
/// [`SweepPolicy`] evicts them or they are removed explicitly. Clients only ever reach a resource
/// through a [`ResourceLock`]; locked entries are never evicted or disposed.
///
/// Concurrent [`get`](Self::get)s of a missing key share a single provider call, which runs in a
/// spawned task outside the repository mutex. Requests for other keys are never blocked by it.
///
/// Dropping the last handle without calling [`close`](Self::close) leaves the cached resources
/// undisposed.
pub struct ResourceRepository<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    inner: Arc<Inner<K, R, W>>,
}

impl<K, R, W> Clone for ResourceRepository<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R, W> fmt::Debug for ResourceRepository<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ResourceRepository")
            .field("name", &self.inner.name)
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .field("total_weight", &state.total_weight)
            .field("is_closed", &state.is_closed)
            .finish()
    }
}

/// Configures and creates a [`ResourceRepository`].
pub struct RepositoryBuilder<K, R, W> {
    name: String,
    weigher: Box<dyn Fn(&R) -> W + Send + Sync>,
    disposer: Box<dyn ResourceDisposer<K, R>>,
    sweep_policy: Box<dyn SweepPolicy<K, W>>,
}

impl<K, R, W> RepositoryBuilder<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    /// The name used in logs and metric tags.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Releases resources once they leave the repository. Defaults to dropping them.
    pub fn disposer(mut self, disposer: impl ResourceDisposer<K, R>) -> Self {
        self.disposer = Box::new(disposer);
        self
    }

    /// Decides about automatic eviction. Defaults to [`NeverSweepPolicy`].
    pub fn sweep_policy(mut self, sweep_policy: impl SweepPolicy<K, W>) -> Self {
        self.sweep_policy = Box::new(sweep_policy);
        self
    }

    pub fn build(self, provider: impl ResourceProvider<K, R>) -> ResourceRepository<K, R, W> {
        let state = State {
            entries: HashMap::new(),
            pending: HashMap::new(),
            total_weight: W::zero(),
            is_closed: false,
            ticks: 0,
        };
        ResourceRepository {
            inner: Arc::new(Inner {
                name: self.name,
                state: Mutex::new(state),
                provider: Box::new(provider),
                weigher: self.weigher,
                disposer: self.disposer,
                sweep_policy: self.sweep_policy,
            }),
        }
    }
}

impl<K, R, W> ResourceRepository<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    /// Starts configuring a repository that weighs its resources with `weigher`.
    pub fn builder(weigher: impl Fn(&R) -> W + Send + Sync + 'static) -> RepositoryBuilder<K, R, W> {
        RepositoryBuilder {
            name: "resources".into(),
            weigher: Box::new(weigher),
            disposer: Box::new(|_: &K, _: R| -> anyhow::Result<()> { Ok(()) }),
            sweep_policy: Box::new(NeverSweepPolicy),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a lock on the resource for `key`, provisioning it if necessary.
    ///
    /// Waits only for the provisioning of this very key, be it started by this call or by a
    /// concurrent one. Every requester of one provisioning observes the same outcome. After
    /// handing out the lock, the repository sweeps if its policy asks for it.
    pub async fn get(&self, key: &K) -> FetchResult<K, R, W> {
        metric!(counter("repository.access") += 1, "repository" => &self.inner.name);
        let result = self.inner.fetch(key).await;
        match &result {
            Ok(_) => {
                self.inner.cleanup();
            }
            Err(err) => {
                metric!(
                    counter("repository.fetch.error") += 1,
                    "repository" => &self.inner.name,
                    "reason" => err.metrics_tag(),
                );
            }
        }
        result
    }

    /// Like [`get`](Self::get), but gives up with [`FetchError::Interrupted`] once `token` is
    /// cancelled.
    ///
    /// Giving up does not cancel the provisioning itself; it completes in the background and
    /// serves later requests.
    pub async fn get_cancellable(&self, key: &K, token: &CancellationToken) -> FetchResult<K, R, W> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Interrupted),
            result = self.get(key) => result,
        }
    }

    /// Adds an already obtained resource without calling the provider.
    ///
    /// Returns `false` if the key is present or being provisioned, or if the repository is closed.
    pub fn add(&self, key: K, resource: R) -> bool {
        match self.try_add_with(key, || Ok::<_, Infallible>(resource)) {
            Ok(added) => added,
            Err(never) => match never {},
        }
    }

    /// Adds a resource created by `create`, which is only called if the key can be added.
    ///
    /// While `create` runs, the key counts as pending: concurrent `get`s wait for it instead of
    /// calling the provider, and other keys are not blocked. Returns `false` if the key is present
    /// or pending, or if the repository is closed before the resource could be added.
    pub fn try_add_with<E>(&self, key: K, create: impl FnOnce() -> Result<R, E>) -> Result<bool, E> {
        let Reservation { id, sender, .. } = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.is_closed || state.entries.contains_key(&key) || state.pending.contains_key(&key) {
                return Ok(false);
            }
            state.reserve(key.clone(), 0)
        };

        let remove_pending = {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            CallOnDrop::new(move || inner.remove_pending(&key, id))
        };

        let resource = match create() {
            Ok(resource) => resource,
            Err(err) => {
                // Waiters look the key up again, which must not find the reservation anymore.
                drop(remove_pending);
                sender.send(None).ok();
                return Err(err);
            }
        };
        let weight = (self.inner.weigher)(&resource);
        remove_pending.disarm();

        let outcome = self.inner.install(&key, id, resource, weight);
        let added = matches!(outcome, Some(Ok(_)));
        if added {
            tracing::debug!(repository = %self.inner.name, key = ?key, weight = ?weight, "Resource added");
        }
        sender.send(outcome).ok();
        Ok(added)
    }

    /// Registers resources that already existed before the repository was created, e.g. files
    /// found on disk, with their last known access time.
    ///
    /// Keys that are already present are skipped. Runs a single sweep afterwards, so that the
    /// least recently used of the preloaded resources are evicted first.
    pub fn preload(&self, resources: impl IntoIterator<Item = (K, R, Instant)>) -> usize {
        let weighed: Vec<(K, R, W, Instant)> = resources
            .into_iter()
            .map(|(key, resource, last_access_time)| {
                let weight = (self.inner.weigher)(&resource);
                (key, resource, weight, last_access_time)
            })
            .collect();

        let mut added = 0;
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.is_closed {
                return 0;
            }
            for (key, resource, weight, last_access_time) in weighed {
                if state.entries.contains_key(&key) || state.pending.contains_key(&key) {
                    continue;
                }
                let usage = UsageStatistic::new(last_access_time, state.tick());
                state.insert_entry(key, resource, weight, usage, 0);
                added += 1;
            }
        }
        self.inner.cleanup();
        added
    }

    /// Removes and disposes the entry for `key` if it exists and is not locked.
    pub fn remove(&self, key: &K) -> bool {
        let removed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match state.entries.get(key) {
                Some(entry) if entry.lock_count == 0 => state.remove_entry(key),
                _ => None,
            }
        };
        match removed {
            Some((key, resource)) => {
                self.inner.dispose(&key, resource);
                true
            }
            None => false,
        }
    }

    /// Removes all unlocked entries. Locked entries are disposed when their last lock is released.
    pub fn remove_all(&self) {
        let removed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            for entry in state.entries.values_mut() {
                if entry.lock_count > 0 {
                    entry.dispose_on_release = true;
                }
            }
            state.drain_unlocked()
        };
        for (key, resource) in removed {
            self.inner.dispose(&key, resource);
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    pub fn get_all_existing_keys(&self) -> HashSet<K> {
        self.inner.state.lock().entries.keys().cloned().collect()
    }

    /// A snapshot of all entries, locked or not.
    pub fn get_available_resources(&self) -> Vec<AvailableResource<K, W>> {
        self.inner.state.lock().snapshot(true)
    }

    pub fn total_weight(&self) -> W {
        self.inner.state.lock().total_weight
    }

    /// Evicts entries if the sweep policy deems it necessary, returning the number of evicted
    /// entries.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    /// Closes the repository.
    ///
    /// New requests fail with [`FetchError::Closed`]. Unlocked entries are disposed right away,
    /// locked ones as soon as their last lock is released. Provisionings that are still running
    /// dispose their resource when they finish. Closing twice does nothing.
    pub fn close(&self) {
        let removed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.is_closed {
                return;
            }
            state.is_closed = true;
            state.drain_unlocked()
        };
        tracing::debug!(
            repository = %self.inner.name,
            disposed = removed.len(),
            "Closing repository"
        );
        for (key, resource) in removed {
            self.inner.dispose(&key, resource);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().is_closed
    }
}
