//! The TPS threshold state machine with hysteretic recovery.
//!
//! Levels compile once from configuration into a severity-ordered list
//! (TPS descending, then priority descending; severity = index). Per
//! check the engine matches live TPS against the list, requires
//! `trigger-count` consecutive matches before activating, executes the
//! activated level's actions exactly once, and — after settings were
//! modified — restores host defaults only once TPS has held above the
//! recovery threshold for the required consecutive checks.

use std::sync::{Arc, Mutex};

use ballast_core::config::{
    ActionKind, AutoAnalyzeConfig, GuardianConfig, NotifyConfig, RecoveryConfig,
};
use ballast_core::host::{HostAdapter, SoundSpec};
use ballast_core::time::Clock;
use ballast_telemetry::TpsSource;
use tracing::{debug, info, warn};

use crate::actions::{ActionExecutor, SettingsModified};
use crate::distributor::WorkloadDistributor;

/// Minimum gap between threshold notifications, across all levels.
const NOTIFY_GAP_MS: u64 = 10_000;

/// One compiled threshold level. Position in the compiled list is the
/// severity index.
#[derive(Clone, Debug)]
pub struct ThresholdLevel {
    /// Configured level name.
    pub name: String,
    /// The level matches while observed TPS ≤ this cutoff.
    pub tps: f64,
    /// Tie-break between equal cutoffs; higher is more severe.
    pub priority: i32,
    /// Actions executed on activation.
    pub actions: Vec<ActionKind>,
    /// Console commands dispatched on activation.
    pub commands: Vec<String>,
    /// Admin message; `{tps}` expands to the observed TPS.
    pub message: Option<String>,
    /// Whether to broadcast to non-admins.
    pub broadcast: bool,
    /// Broadcast text; falls back to `message`.
    pub broadcast_message: Option<String>,
    /// Notification channels.
    pub notify: NotifyConfig,
}

impl ThresholdLevel {
    /// Compile the enabled levels into severity order: TPS descending,
    /// then priority descending.
    pub fn compile(config: &GuardianConfig) -> Vec<ThresholdLevel> {
        let mut levels: Vec<ThresholdLevel> = config
            .thresholds
            .iter()
            .filter(|(_, level)| level.enabled)
            .map(|(name, level)| ThresholdLevel {
                name: name.clone(),
                tps: level.tps,
                priority: level.priority,
                actions: level.actions.as_slice().to_vec(),
                commands: level.commands.clone(),
                message: level.message.clone(),
                broadcast: level.broadcast,
                broadcast_message: level.broadcast_message.clone(),
                notify: level.notify.clone(),
            })
            .collect();
        levels.sort_by(|a, b| {
            b.tps
                .total_cmp(&a.tps)
                .then_with(|| b.priority.cmp(&a.priority))
        });
        levels
    }
}

struct EngineState {
    active: Option<usize>,
    consecutive_low: u32,
    consecutive_good: u32,
    last_notify_ms: Option<u64>,
}

/// The threshold check loop. Arm with a main timer at
/// `system.tps-monitor.check-interval` ticks.
pub struct ThresholdEngine {
    levels: Mutex<Vec<ThresholdLevel>>,
    trigger_count: u32,
    check_interval_ticks: u64,
    recovery: RecoveryConfig,
    auto_analyze: AutoAnalyzeConfig,
    host: Arc<dyn HostAdapter>,
    distributor: Arc<WorkloadDistributor>,
    executor: Arc<ActionExecutor>,
    telemetry: Arc<dyn TpsSource>,
    clock: Arc<dyn Clock>,
    modified: Arc<SettingsModified>,
    analyze_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    state: Mutex<EngineState>,
}

impl ThresholdEngine {
    /// Build the engine from configuration plus its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &GuardianConfig,
        host: Arc<dyn HostAdapter>,
        distributor: Arc<WorkloadDistributor>,
        executor: Arc<ActionExecutor>,
        telemetry: Arc<dyn TpsSource>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let modified = executor.modified();
        Arc::new(Self {
            levels: Mutex::new(ThresholdLevel::compile(config)),
            trigger_count: config.automation.trigger_count,
            check_interval_ticks: config.system.tps_monitor.check_interval,
            recovery: config.recovery.clone(),
            auto_analyze: config.automation.auto_analyze.clone(),
            host,
            distributor,
            executor,
            telemetry,
            clock,
            modified,
            analyze_hook: Mutex::new(None),
            state: Mutex::new(EngineState {
                active: None,
                consecutive_low: 0,
                consecutive_good: 0,
                last_notify_ms: None,
            }),
        })
    }

    /// Wire the lag-analysis request hook.
    pub fn wire_analyze_hook(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        *self.analyze_hook.lock().expect("analyze hook poisoned") = Some(hook);
    }

    /// The compiled levels, in severity order.
    pub fn levels(&self) -> Vec<ThresholdLevel> {
        self.levels.lock().expect("levels poisoned").clone()
    }

    /// Name of the active level, if any.
    pub fn active_level(&self) -> Option<String> {
        let active = self.state.lock().expect("engine state poisoned").active;
        let levels = self.levels.lock().expect("levels poisoned");
        active.and_then(|i| levels.get(i).map(|l| l.name.clone()))
    }

    /// Replace the level list from a reloaded configuration. The
    /// active level and counters reset; recovery still runs if
    /// settings were modified.
    pub fn reload(&self, config: &GuardianConfig) {
        *self.levels.lock().expect("levels poisoned") = ThresholdLevel::compile(config);
        let mut state = self.state.lock().expect("engine state poisoned");
        state.active = None;
        state.consecutive_low = 0;
        state.consecutive_good = 0;
    }

    /// One check pass. Main thread.
    pub fn check(self: &Arc<Self>) {
        let tps = self.telemetry.current_tps();
        let levels = self.levels.lock().expect("levels poisoned").clone();

        // The list is sorted by TPS descending; the last level whose
        // cutoff still covers the observed TPS is the most severe one
        // that matches.
        let matched = levels
            .iter()
            .enumerate()
            .filter(|(_, level)| level.tps >= tps)
            .map(|(i, _)| i)
            .next_back();

        match matched {
            Some(index) => self.on_match(tps, index, &levels),
            None => self.on_clear(tps),
        }

        // Independent of level matching: a bad enough TPS always
        // warrants knowing why, even with no levels configured.
        if self.auto_analyze.enabled && tps < self.auto_analyze.tps_threshold {
            let hook = self.analyze_hook.lock().expect("analyze hook poisoned").clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    fn on_match(self: &Arc<Self>, tps: f64, index: usize, levels: &[ThresholdLevel]) {
        let mut state = self.state.lock().expect("engine state poisoned");
        state.consecutive_low += 1;
        state.consecutive_good = 0;
        debug!(tps, level = %levels[index].name, count = state.consecutive_low, "threshold match");

        if state.consecutive_low >= self.trigger_count {
            let stricter = state.active.is_none_or(|active| index > active);
            if stricter {
                state.active = Some(index);
                let level = &levels[index];
                info!(level = %level.name, tps, "threshold level activated");
                self.activate(level, tps, &mut state);
            }
        }
    }

    fn activate(self: &Arc<Self>, level: &ThresholdLevel, tps: f64, state: &mut EngineState) {
        let reason = format!("TPS {tps:.1}: level '{}' engaged", level.name);
        self.executor.execute(&level.actions, &reason);

        for command in &level.commands {
            let host = Arc::clone(&self.host);
            let cmd = command.clone();
            let enqueued = self.distributor.enqueue(move || {
                if let Err(err) = host.dispatch_command(&cmd) {
                    warn!(command = %cmd, %err, "threshold command failed");
                }
            });
            if enqueued.is_err() {
                warn!(command = %command, "distributor full; threshold command dropped");
            }
        }

        let now_ms = self.clock.now_millis();
        let due = state
            .last_notify_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= NOTIFY_GAP_MS);
        if !due {
            return;
        }
        state.last_notify_ms = Some(now_ms);

        let message = level
            .message
            .clone()
            .unwrap_or_else(|| format!("&c[Ballast] TPS at {{tps}}: level '{}' engaged", level.name))
            .replace("{tps}", &format!("{tps:.1}"));
        if level.notify.chat {
            self.host.notify_admins(&message);
        }
        if level.notify.actionbar {
            self.host.send_action_bar(&message);
        }
        if level.notify.sound {
            self.host.play_sound(&SoundSpec {
                name: level.notify.sound_type.clone(),
                volume: level.notify.sound_volume,
                pitch: level.notify.sound_pitch,
            });
        }
        if level.broadcast {
            let text = level
                .broadcast_message
                .clone()
                .unwrap_or_else(|| message.clone())
                .replace("{tps}", &format!("{tps:.1}"));
            self.host.broadcast(&text);
        }
    }

    fn on_clear(self: &Arc<Self>, tps: f64) {
        let mut state = self.state.lock().expect("engine state poisoned");
        state.consecutive_low = 0;

        if !self.recovery.enabled || !self.modified.is_set() {
            state.consecutive_good = 0;
            return;
        }
        if tps < self.recovery.tps_threshold {
            state.consecutive_good = 0;
            return;
        }
        state.consecutive_good += 1;

        let required = self.required_good_checks();
        if state.consecutive_good < required {
            debug!(tps, progress = state.consecutive_good, required, "recovery pending");
            return;
        }

        let host = Arc::clone(&self.host);
        let modified = Arc::clone(&self.modified);
        let enqueued = self.distributor.enqueue(move || match host.restore_defaults() {
            Ok(()) => {
                modified.clear();
                info!("host defaults restored");
                host.notify_admins("&a[Ballast] Performance recovered; defaults restored");
            }
            Err(err) => warn!(%err, "restore defaults failed"),
        });
        if enqueued.is_ok() {
            state.active = None;
            state.consecutive_good = 0;
        }
    }

    /// Consecutive good checks required before restoring defaults:
    /// `ceil(delay-seconds * 20 / check-interval-ticks)`, at least 1.
    pub fn required_good_checks(&self) -> u32 {
        let checks = (self.recovery.delay_seconds * 20.0 / self.check_interval_ticks as f64).ceil();
        (checks as u32).max(1)
    }

    /// Trigger cadence, in ticks.
    pub fn check_interval_ticks(&self) -> u64 {
        self.check_interval_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::config::{DistanceReductionConfig, ThresholdLevelConfig};
    use ballast_test_utils::{FixedTps, ManualClock, MockHost};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config_with_levels(levels: &[(&str, f64, i32)]) -> GuardianConfig {
        let mut config = GuardianConfig::default();
        for &(name, tps, priority) in levels {
            config.thresholds.insert(
                name.to_string(),
                ThresholdLevelConfig {
                    tps,
                    priority,
                    ..ThresholdLevelConfig::default()
                },
            );
        }
        config
    }

    struct EngineFixture {
        engine: Arc<ThresholdEngine>,
        host: Arc<MockHost>,
        clock: Arc<ManualClock>,
        distributor: Arc<WorkloadDistributor>,
        telemetry: Arc<FixedTps>,
    }

    fn fixture(config: GuardianConfig) -> EngineFixture {
        let clock = Arc::new(ManualClock::new());
        let host = Arc::new(MockHost::new());
        let distributor = WorkloadDistributor::new(1_000_000_000, clock.clone(), host.clone());
        let executor = ActionExecutor::new(
            host.clone(),
            distributor.clone(),
            DistanceReductionConfig::default(),
            DistanceReductionConfig::default(),
            SettingsModified::new(),
        );
        let telemetry = FixedTps::new(20.0);
        let engine = ThresholdEngine::new(
            &config,
            host.clone(),
            distributor.clone(),
            executor,
            telemetry.clone(),
            clock.clone(),
        );
        EngineFixture {
            engine,
            host,
            clock,
            distributor,
            telemetry,
        }
    }

    /// `check()` once at the given TPS, advancing the manual clock so
    /// notification gaps behave like real check cadences.
    fn check_at(fx: &EngineFixture, tps: f64) {
        fx.telemetry.set(tps);
        fx.clock.advance_millis(5_000);
        fx.engine.check();
        fx.distributor.drain_once();
    }

    #[test]
    fn compile_orders_by_tps_then_priority() {
        let config = config_with_levels(&[
            ("mild", 18.0, 0),
            ("critical", 10.0, 5),
            ("moderate", 15.0, 0),
            ("moderate-strict", 15.0, 3),
        ]);
        let levels = ThresholdLevel::compile(&config);
        let names: Vec<&str> = levels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["mild", "moderate-strict", "moderate", "critical"]);
        for pair in levels.windows(2) {
            assert!(
                pair[0].tps > pair[1].tps
                    || (pair[0].tps == pair[1].tps && pair[0].priority >= pair[1].priority)
            );
        }
    }

    #[test]
    fn disabled_levels_are_dropped() {
        let mut config = config_with_levels(&[("on", 15.0, 0)]);
        config.thresholds.insert(
            "off".to_string(),
            ThresholdLevelConfig {
                tps: 12.0,
                enabled: false,
                ..ThresholdLevelConfig::default()
            },
        );
        let levels = ThresholdLevel::compile(&config);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].name, "on");
    }

    #[test]
    fn activation_requires_consecutive_matches() {
        let config = config_with_levels(&[("mild", 18.0, 0), ("moderate", 15.0, 0), ("critical", 10.0, 0)]);
        let fx = fixture(config);

        check_at(&fx, 14.5);
        check_at(&fx, 14.5);
        assert_eq!(fx.engine.active_level(), None);
        check_at(&fx, 14.5);
        assert_eq!(fx.engine.active_level().as_deref(), Some("moderate"));
    }

    #[test]
    fn most_severe_matching_level_wins() {
        let config = config_with_levels(&[("mild", 18.0, 0), ("moderate", 15.0, 0), ("critical", 10.0, 0)]);
        let fx = fixture(config);
        for _ in 0..3 {
            check_at(&fx, 9.0);
        }
        assert_eq!(fx.engine.active_level().as_deref(), Some("critical"));
    }

    #[test]
    fn interleaved_good_check_resets_the_count() {
        let config = config_with_levels(&[("moderate", 15.0, 0)]);
        let fx = fixture(config);
        check_at(&fx, 14.0);
        check_at(&fx, 14.0);
        check_at(&fx, 19.5);
        check_at(&fx, 14.0);
        check_at(&fx, 14.0);
        assert_eq!(fx.engine.active_level(), None);
    }

    #[test]
    fn activation_executes_actions_and_commands_once() {
        let mut config = config_with_levels(&[]);
        config.thresholds.insert(
            "moderate".to_string(),
            ThresholdLevelConfig {
                tps: 15.0,
                commands: vec!["lagfix run".to_string()],
                ..ThresholdLevelConfig::default()
            },
        );
        let fx = fixture(config);
        for _ in 0..6 {
            check_at(&fx, 14.5);
        }
        // Continued low TPS at the same severity re-executes nothing.
        assert_eq!(fx.host.commands(), vec!["lagfix run".to_string()]);
        assert_eq!(fx.host.admin_notices().len(), 1);
    }

    #[test]
    fn escalation_promotes_to_stricter_level_only() {
        let config = config_with_levels(&[("moderate", 15.0, 0), ("critical", 10.0, 0)]);
        let fx = fixture(config);
        for _ in 0..3 {
            check_at(&fx, 14.0);
        }
        assert_eq!(fx.engine.active_level().as_deref(), Some("moderate"));
        // Deeper drop escalates.
        for _ in 0..3 {
            check_at(&fx, 9.0);
        }
        assert_eq!(fx.engine.active_level().as_deref(), Some("critical"));
        // Partial recovery back into the moderate band does not demote.
        for _ in 0..3 {
            check_at(&fx, 14.0);
        }
        assert_eq!(fx.engine.active_level().as_deref(), Some("critical"));
    }

    #[test]
    fn recovery_restores_defaults_exactly_once() {
        let mut config = config_with_levels(&[("moderate", 15.0, 0)]);
        config.recovery.tps_threshold = 18.0;
        config.recovery.delay_seconds = 30.0;
        config.system.tps_monitor.check_interval = 100;
        let fx = fixture(config);

        for _ in 0..3 {
            check_at(&fx, 14.5);
        }
        assert_eq!(fx.engine.active_level().as_deref(), Some("moderate"));
        // The activation itself didn't change settings; simulate an
        // action having done so.
        fx.engine.modified.set();

        // ceil(30 * 20 / 100) = 6 consecutive good checks required.
        assert_eq!(fx.engine.required_good_checks(), 6);
        for _ in 0..5 {
            check_at(&fx, 18.1);
        }
        assert_eq!(fx.host.restore_defaults_calls(), 0);
        check_at(&fx, 18.1);
        assert_eq!(fx.host.restore_defaults_calls(), 1);
        assert_eq!(fx.engine.active_level(), None);
        assert!(!fx.engine.modified.is_set());

        // Further good checks don't restore again.
        for _ in 0..10 {
            check_at(&fx, 19.0);
        }
        assert_eq!(fx.host.restore_defaults_calls(), 1);
    }

    #[test]
    fn dip_below_recovery_threshold_resets_progress() {
        let mut config = config_with_levels(&[("moderate", 15.0, 0)]);
        config.recovery.delay_seconds = 15.0;
        config.system.tps_monitor.check_interval = 100;
        let fx = fixture(config);
        fx.engine.modified.set();

        // required = ceil(15*20/100) = 3.
        check_at(&fx, 18.5);
        check_at(&fx, 18.5);
        check_at(&fx, 17.0); // above 15 (no match) but below recovery threshold
        check_at(&fx, 18.5);
        check_at(&fx, 18.5);
        assert_eq!(fx.host.restore_defaults_calls(), 0);
        check_at(&fx, 18.5);
        assert_eq!(fx.host.restore_defaults_calls(), 1);
    }

    #[test]
    fn auto_analyze_requested_below_cutoff() {
        let mut config = config_with_levels(&[("moderate", 15.0, 0)]);
        config.automation.auto_analyze.tps_threshold = 16.0;
        let fx = fixture(config);
        let requests = Arc::new(AtomicU32::new(0));
        let requests2 = requests.clone();
        fx.engine.wire_analyze_hook(Arc::new(move || {
            requests2.fetch_add(1, Ordering::AcqRel);
        }));

        check_at(&fx, 14.0);
        assert_eq!(requests.load(Ordering::Acquire), 1);
        check_at(&fx, 16.5);
        assert_eq!(requests.load(Ordering::Acquire), 1);
    }

    #[test]
    fn auto_analyze_fires_with_no_configured_levels() {
        // The out-of-the-box config carries zero threshold levels, so
        // every check takes the no-match path; the analysis request
        // must not depend on a level matching.
        let config = config_with_levels(&[]);
        let fx = fixture(config);
        let requests = Arc::new(AtomicU32::new(0));
        let requests2 = requests.clone();
        fx.engine.wire_analyze_hook(Arc::new(move || {
            requests2.fetch_add(1, Ordering::AcqRel);
        }));

        check_at(&fx, 12.0);
        assert_eq!(requests.load(Ordering::Acquire), 1);
        check_at(&fx, 19.0);
        assert_eq!(requests.load(Ordering::Acquire), 1);
    }

    #[test]
    fn auto_analyze_fires_when_no_level_matches() {
        // TPS in the gap: below the 16.0 cutoff but above the only
        // configured level's 10.0, so recovery runs and analysis is
        // still requested.
        let config = config_with_levels(&[("critical", 10.0, 0)]);
        let fx = fixture(config);
        let requests = Arc::new(AtomicU32::new(0));
        let requests2 = requests.clone();
        fx.engine.wire_analyze_hook(Arc::new(move || {
            requests2.fetch_add(1, Ordering::AcqRel);
        }));

        check_at(&fx, 14.0);
        assert_eq!(fx.engine.active_level(), None);
        assert_eq!(requests.load(Ordering::Acquire), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn compiled_order_is_total(
                cutoffs in prop::collection::vec((1u32..=200, 0i32..10), 0..16)
            ) {
                let mut config = GuardianConfig::default();
                for (i, &(tps_tenths, priority)) in cutoffs.iter().enumerate() {
                    config.thresholds.insert(
                        format!("level-{i}"),
                        ThresholdLevelConfig {
                            tps: tps_tenths as f64 / 10.0,
                            priority,
                            ..ThresholdLevelConfig::default()
                        },
                    );
                }
                let levels = ThresholdLevel::compile(&config);
                for pair in levels.windows(2) {
                    prop_assert!(pair[0].tps >= pair[1].tps);
                    prop_assert!(
                        pair[0].tps > pair[1].tps || pair[0].priority >= pair[1].priority
                    );
                }
            }
        }
    }
}
