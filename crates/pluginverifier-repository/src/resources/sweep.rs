use super::{AvailableResource, ResourceWeight};

/// Decides when a repository has to reclaim capacity and which entries to evict.
///
/// Policies only ever see a snapshot of unlocked entries, taken under the same mutex that guards
/// the lock counts, so every key they select can be safely disposed.
pub trait SweepPolicy<K, W>: Send + Sync + 'static {
    /// Whether a sweep is necessary with the given total weight.
    fn is_necessary(&self, total_weight: W) -> bool;

    /// Selects the keys to evict, in eviction order.
    fn select_for_eviction(
        &self,
        candidates: Vec<AvailableResource<K, W>>,
        total_weight: W,
    ) -> Vec<K>;
}

/// A policy that never evicts anything on its own.
///
/// The owner of the repository is responsible for calling `remove` or `remove_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSweepPolicy;

impl<K, W> SweepPolicy<K, W> for NeverSweepPolicy {
    fn is_necessary(&self, _total_weight: W) -> bool {
        false
    }

    fn select_for_eviction(
        &self,
        _candidates: Vec<AvailableResource<K, W>>,
        _total_weight: W,
    ) -> Vec<K> {
        Vec::new()
    }
}

/// Keeps the total weight at or below a maximum, evicting least recently used entries first.
///
/// A sweep starts once the total exceeds `maximum` and continues until it drops to `target`.
/// Among entries last used at the same instant, heavier ones go first.
#[derive(Debug, Clone, Copy)]
pub struct CapacitySweepPolicy<W> {
    maximum: W,
    target: W,
}

impl<W: ResourceWeight> CapacitySweepPolicy<W> {
    pub fn new(maximum: W) -> Self {
        Self {
            maximum,
            target: maximum,
        }
    }

    /// Sets the low-water mark a sweep reduces the total weight to.
    ///
    /// Targets above the maximum are clamped to the maximum.
    pub fn with_target(mut self, target: W) -> Self {
        self.target = target.min(self.maximum);
        self
    }

    pub fn maximum(&self) -> W {
        self.maximum
    }

    pub fn target(&self) -> W {
        self.target
    }
}

impl<K, W> SweepPolicy<K, W> for CapacitySweepPolicy<W>
where
    K: Send + Sync + 'static,
    W: ResourceWeight,
{
    fn is_necessary(&self, total_weight: W) -> bool {
        total_weight > self.maximum
    }

    fn select_for_eviction(
        &self,
        mut candidates: Vec<AvailableResource<K, W>>,
        total_weight: W,
    ) -> Vec<K> {
        candidates.sort_by(|a, b| {
            a.usage
                .last_access_time
                .cmp(&b.usage.last_access_time)
                .then_with(|| b.weight.cmp(&a.weight))
                .then_with(|| a.usage.recency(&b.usage))
        });

        let mut remaining = total_weight;
        let mut selected = Vec::new();
        for candidate in candidates {
            if remaining <= self.target {
                break;
            }
            remaining = remaining - candidate.weight;
            selected.push(candidate.key);
        }
        selected
    }
}
