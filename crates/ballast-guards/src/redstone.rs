//! Per-chunk redstone rate limiting with cool-down.
//!
//! The host delivers every redstone activation to
//! [`RedstoneSuppressor::on_activation`] on the main thread; the
//! returned decision tells it whether to let the signal change stand
//! or restore the previous state. Counters reset each window;
//! suppressions and notify cool-downs carry absolute expiry stamps and
//! expired entries are discarded, never honored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ballast_core::config::RedstoneConfig;
use ballast_core::host::HostAdapter;
use ballast_core::id::ChunkKey;
use ballast_core::scheduler::{Scheduler, TimerHandle};
use ballast_core::time::Clock;
use ballast_telemetry::TpsSource;
use tracing::{debug, warn};

/// Minimum gap between suppression notifications for one chunk.
const NOTIFY_GAP_MS: u64 = 10_000;

/// What the host should do with an activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationDecision {
    /// Let the signal change stand.
    Allow,
    /// Cancel it: restore the previous redstone state.
    Cancel,
}

struct SuppressorState {
    counters: HashMap<ChunkKey, u32>,
    window_start_ms: u64,
    suppressed: HashMap<ChunkKey, u64>,
    notified: HashMap<ChunkKey, u64>,
}

/// The per-chunk activation rate limiter.
pub struct RedstoneSuppressor {
    config: RedstoneConfig,
    host: Arc<dyn HostAdapter>,
    clock: Arc<dyn Clock>,
    tps: Arc<dyn TpsSource>,
    state: Mutex<SuppressorState>,
}

impl RedstoneSuppressor {
    /// Create a suppressor.
    pub fn new(
        config: RedstoneConfig,
        host: Arc<dyn HostAdapter>,
        clock: Arc<dyn Clock>,
        tps: Arc<dyn TpsSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            clock,
            tps,
            state: Mutex::new(SuppressorState {
                counters: HashMap::new(),
                window_start_ms: 0,
                suppressed: HashMap::new(),
                notified: HashMap::new(),
            }),
        })
    }

    /// Register the window cleanup timer.
    pub fn arm(self: &Arc<Self>, scheduler: &dyn Scheduler) -> TimerHandle {
        let weak = Arc::downgrade(self);
        scheduler.timer_main(
            self.config.window_seconds * 20,
            Arc::new(move || {
                if let Some(suppressor) = weak.upgrade() {
                    suppressor.cleanup();
                }
            }),
        )
    }

    /// Handle one activation for a chunk. Main thread.
    pub fn on_activation(&self, key: ChunkKey) -> ActivationDecision {
        if !self.config.enabled {
            return ActivationDecision::Allow;
        }
        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock().expect("suppressor state poisoned");
        let state = &mut *state;
        self.roll_window(now_ms, state);

        let expiry = state.suppressed.get(&key).copied();
        if let Some(expiry) = expiry {
            if now_ms < expiry {
                return ActivationDecision::Cancel;
            }
            state.suppressed.remove(&key);
        }

        // Adaptive mode only counts while the server is actually
        // struggling.
        if self.config.adaptive_monitoring && self.tps.current_tps() >= self.config.min_tps {
            return ActivationDecision::Allow;
        }

        let count = {
            let entry = state.counters.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        if count > self.config.max_activations_per_chunk {
            let expiry = now_ms + self.config.cooldown_seconds * 1000;
            state.suppressed.insert(key, expiry);
            warn!(chunk = %key, count, "redstone suppressed");
            self.maybe_notify(key, now_ms, state);
            return ActivationDecision::Cancel;
        }
        ActivationDecision::Allow
    }

    /// Whether a chunk is currently suppressed.
    pub fn is_suppressed(&self, key: ChunkKey) -> bool {
        let now_ms = self.clock.now_millis();
        let state = self.state.lock().expect("suppressor state poisoned");
        state.suppressed.get(&key).is_some_and(|&expiry| now_ms < expiry)
    }

    /// Window-boundary pass: reset counters, drop expired suppressions
    /// and notify cool-downs. Main thread.
    pub fn cleanup(&self) {
        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock().expect("suppressor state poisoned");
        self.roll_window(now_ms, &mut state);
        state.suppressed.retain(|_, &mut expiry| expiry > now_ms);
        state
            .notified
            .retain(|_, &mut last| now_ms.saturating_sub(last) < NOTIFY_GAP_MS);
        debug!(
            suppressed = state.suppressed.len(),
            counters = state.counters.len(),
            "redstone cleanup pass"
        );
    }

    fn roll_window(&self, now_ms: u64, state: &mut SuppressorState) {
        if now_ms.saturating_sub(state.window_start_ms) >= self.config.window_seconds * 1000 {
            state.counters.clear();
            state.window_start_ms = now_ms;
        }
    }

    fn maybe_notify(&self, key: ChunkKey, now_ms: u64, state: &mut SuppressorState) {
        if !self.config.notify {
            return;
        }
        let due = state
            .notified
            .get(&key)
            .is_none_or(|&last| now_ms.saturating_sub(last) >= NOTIFY_GAP_MS);
        if due {
            state.notified.insert(key, now_ms);
            self.host.notify_admins(&format!(
                "&c[Ballast] Redstone suppressed in chunk {} for {} s (over {} activations / {} s)",
                key,
                self.config.cooldown_seconds,
                self.config.max_activations_per_chunk,
                self.config.window_seconds,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::id::WorldId;
    use ballast_test_utils::{FixedTps, ManualClock, MockHost};

    const CHUNK: ChunkKey = ChunkKey {
        world: WorldId(1),
        pos: ballast_core::id::ChunkPos { x: 3, z: -2 },
    };

    struct SuppressorFixture {
        suppressor: Arc<RedstoneSuppressor>,
        host: Arc<MockHost>,
        clock: Arc<ManualClock>,
        tps: Arc<FixedTps>,
    }

    fn fixture(config: RedstoneConfig) -> SuppressorFixture {
        let host = Arc::new(MockHost::new());
        let clock = Arc::new(ManualClock::new());
        let tps = FixedTps::new(20.0);
        // Start the clock away from zero so expiry stamps are
        // unambiguous.
        clock.advance_millis(1_000);
        let suppressor = RedstoneSuppressor::new(config, host.clone(), clock.clone(), tps.clone());
        SuppressorFixture {
            suppressor,
            host,
            clock,
            tps,
        }
    }

    fn scenario_config() -> RedstoneConfig {
        RedstoneConfig {
            enabled: true,
            max_activations_per_chunk: 200,
            window_seconds: 2,
            cooldown_seconds: 10,
            notify: true,
            adaptive_monitoring: false,
            min_tps: 18.0,
        }
    }

    #[test]
    fn two_hundred_allowed_then_suppressed() {
        let fx = fixture(scenario_config());
        for i in 0..200 {
            assert_eq!(
                fx.suppressor.on_activation(CHUNK),
                ActivationDecision::Allow,
                "activation {i} should pass"
            );
        }
        // Activation 201 crosses the limit: cancelled and suppressed.
        assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Cancel);
        assert!(fx.suppressor.is_suppressed(CHUNK));
        assert_eq!(fx.host.admin_notices().len(), 1);
    }

    #[test]
    fn suppression_cancels_without_further_notification() {
        let fx = fixture(scenario_config());
        for _ in 0..201 {
            fx.suppressor.on_activation(CHUNK);
        }
        assert_eq!(fx.host.admin_notices().len(), 1);
        // The next 10 s of activations all cancel, silently.
        for _ in 0..50 {
            fx.clock.advance_millis(100);
            assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Cancel);
        }
        assert_eq!(fx.host.admin_notices().len(), 1);
    }

    #[test]
    fn suppression_expires_after_cooldown() {
        let fx = fixture(scenario_config());
        for _ in 0..201 {
            fx.suppressor.on_activation(CHUNK);
        }
        assert!(fx.suppressor.is_suppressed(CHUNK));
        fx.clock.advance_millis(10_001);
        assert!(!fx.suppressor.is_suppressed(CHUNK));
        // Past expiry the stamp is discarded and counting restarts
        // (in a fresh window).
        assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Allow);
    }

    #[test]
    fn window_boundary_resets_counters() {
        let fx = fixture(scenario_config());
        for _ in 0..150 {
            fx.suppressor.on_activation(CHUNK);
        }
        // A new 2 s window starts: the counter is zeroed, so another
        // 150 activations stay under the limit.
        fx.clock.advance_millis(2_000);
        for _ in 0..150 {
            assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Allow);
        }
        assert!(!fx.suppressor.is_suppressed(CHUNK));
    }

    #[test]
    fn chunks_are_counted_independently_across_worlds() {
        let fx = fixture(RedstoneConfig {
            max_activations_per_chunk: 2,
            ..scenario_config()
        });
        let other_world = ChunkKey::new(WorldId(2), 3, -2);
        for _ in 0..2 {
            fx.suppressor.on_activation(CHUNK);
        }
        assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Cancel);
        // Same coordinates, different world: unaffected.
        assert_eq!(
            fx.suppressor.on_activation(other_world),
            ActivationDecision::Allow
        );
    }

    #[test]
    fn adaptive_mode_only_counts_under_load() {
        let fx = fixture(RedstoneConfig {
            adaptive_monitoring: true,
            max_activations_per_chunk: 5,
            ..scenario_config()
        });
        for _ in 0..50 {
            assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Allow);
        }
        // Server starts struggling: counting engages.
        fx.tps.set(12.0);
        for _ in 0..5 {
            fx.suppressor.on_activation(CHUNK);
        }
        assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Cancel);
    }

    #[test]
    fn cleanup_drops_expired_state() {
        let fx = fixture(scenario_config());
        for _ in 0..201 {
            fx.suppressor.on_activation(CHUNK);
        }
        fx.clock.advance_millis(15_000);
        fx.suppressor.cleanup();
        let state = fx.suppressor.state.lock().unwrap();
        assert!(state.suppressed.is_empty());
        assert!(state.notified.is_empty());
        assert!(state.counters.is_empty());
    }

    #[test]
    fn disabled_module_allows_everything() {
        let fx = fixture(RedstoneConfig {
            enabled: false,
            ..scenario_config()
        });
        for _ in 0..500 {
            assert_eq!(fx.suppressor.on_activation(CHUNK), ActivationDecision::Allow);
        }
    }
}
