use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tether_clock::{Clock, DurationSecs, System};

use crate::{
    HealthConfig, HealthConfigError, HealthEntry, HealthProbe, HttpHealthProbe, ProbeError,
};

/// The default time a probe result is reused
pub const DEFAULT_TTL: DurationSecs = DurationSecs(20);

#[derive(Debug, Default)]
struct Slot {
    /// Completed probes, bumped before the lock is released
    flights: AtomicU64,
    state: tokio::sync::Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    /// The last entry a probe produced, reused while younger than the TTL
    cached: Option<Arc<HealthEntry>>,
    /// The outcome of the last probe, including failures
    latest: Option<Arc<HealthEntry>>,
}

/// Memoizes the health of services for a fixed time
///
/// An entry younger than the TTL is returned as is. Otherwise the service is
/// probed again; concurrent requests for the same service wait for that one
/// probe and share its result. Entries are only refreshed when requested.
///
/// Failing to check a service at all yields an
/// [`Unknown`][crate::Connectivity::Unknown] entry. The requests waiting on
/// that probe receive it too, but it is not cached, so the next request tries
/// again.
pub struct HealthCache<P, C = System> {
    probe: P,
    clock: C,
    ttl: DurationSecs,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<P, C: std::fmt::Debug> std::fmt::Debug for HealthCache<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("HealthCache")
            .field("clock", &self.clock)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<P> HealthCache<P> {
    /// Constructs a cache over `probe` using the system clock
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            clock: System,
            ttl: DEFAULT_TTL,
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl HealthCache<HttpHealthProbe> {
    /// Constructs a cache probing the services in `config` over HTTP
    pub fn from_config(config: &HealthConfig) -> Result<Self, HealthConfigError> {
        Ok(Self::new(HttpHealthProbe::new(config)?).with_ttl(config.ttl()))
    }
}

impl<P, C> HealthCache<P, C> {
    /// Replaces the time a probe result is reused
    #[must_use]
    pub fn with_ttl(self, ttl: DurationSecs) -> Self {
        Self { ttl, ..self }
    }

    /// Replaces the clock used to age entries
    pub fn with_clock<C2>(self, clock: C2) -> HealthCache<P, C2> {
        HealthCache {
            probe: self.probe,
            clock,
            ttl: self.ttl,
            slots: self.slots,
        }
    }

    /// The time a probe result is reused
    #[inline]
    pub fn ttl(&self) -> DurationSecs {
        self.ttl
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, service: &str) -> Arc<Slot> {
        self.slots()
            .entry(service.to_owned())
            .or_default()
            .clone()
    }

    fn forget(&self, service: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots();
        if slots.get(service).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(service);
        }
    }
}

impl<P, C> HealthCache<P, C>
where
    P: HealthProbe,
    C: Clock + Send + Sync,
{
    /// The health of `service`, probing it if the cached entry is too old
    pub async fn status(&self, service: &str) -> Arc<HealthEntry> {
        let slot = self.slot(service);
        let observed = slot.flights.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if slot.flights.load(Ordering::Acquire) != observed {
            if let Some(latest) = &state.latest {
                tracing::trace!(service, "sharing the result of a concurrent probe");
                return latest.clone();
            }
        }

        let now = self.clock.now();
        if let Some(entry) = &state.cached {
            if now - entry.checked_at < self.ttl {
                tracing::trace!(service, "health entry still fresh");
                return entry.clone();
            }
        }

        let entry = match self.probe.probe(service).await {
            Ok(report) => {
                let entry = Arc::new(HealthEntry::new(report, self.clock.now()));
                tracing::debug!(
                    service,
                    connectivity = ?entry.connectivity,
                    "refreshed health entry"
                );
                state.cached = Some(entry.clone());
                entry
            }
            Err(err) => {
                tracing::warn!(service, error = %err, "unable to check service health");
                state.cached = None;
                if matches!(err, ProbeError::UnknownService(_)) {
                    self.forget(service, &slot);
                }
                Arc::new(HealthEntry::unknown(now))
            }
        };

        state.latest = Some(entry.clone());
        slot.flights.fetch_add(1, Ordering::Release);
        entry
    }

    /// Drops every cached entry
    ///
    /// A probe in flight is allowed to finish first, and its result is
    /// dropped as well.
    pub async fn clear(&self) {
        let slots: Vec<_> = self.slots().values().cloned().collect();
        for slot in slots {
            let mut state = slot.state.lock().await;
            state.cached = None;
            state.latest = None;
        }
    }
}
