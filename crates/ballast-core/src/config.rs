//! Configuration model and startup validation.
//!
//! [`GuardianConfig`] mirrors the host-side config tree with kebab-case
//! keys and a default for every field, so a partial document (or none
//! at all) always deserializes. [`validate()`](GuardianConfig::validate)
//! checks structural invariants once at startup; modules trust the
//! values afterwards. Only the distributor budget and the threshold
//! list are re-read on reload.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;

// ── Actions ────────────────────────────────────────────────────────

/// The closed set of counter-measures the action executor applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Remove all dropped item stacks.
    ClearGroundItems,
    /// Remove all experience orbs.
    ClearXpOrbs,
    /// Remove all unprotected non-player mobs.
    ClearMobs,
    /// Remove hostile mobs only.
    KillHostileMobs,
    /// Step every world's view distance down toward the floor.
    ReduceViewDistance,
    /// Step every world's simulation distance down toward the floor.
    ReduceSimulationDistance,
    /// Disable AI on unprotected mobs.
    DisableMobAi,
    /// Refused by policy: logs a warning and does nothing. Never calls
    /// a runtime collection.
    ForceGc,
    /// Run the per-chunk population clean pass.
    ChunkClean,
    /// Run the per-world entity limit enforcement pass.
    EnforceEntityLimits,
    /// Unload excess chunks in overloaded worlds.
    UnloadWorldChunks,
    /// Send an admin notification.
    NotifyAdmin,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClearGroundItems => "clear-ground-items",
            Self::ClearXpOrbs => "clear-xp-orbs",
            Self::ClearMobs => "clear-mobs",
            Self::KillHostileMobs => "kill-hostile-mobs",
            Self::ReduceViewDistance => "reduce-view-distance",
            Self::ReduceSimulationDistance => "reduce-simulation-distance",
            Self::DisableMobAi => "disable-mob-ai",
            Self::ForceGc => "force-gc",
            Self::ChunkClean => "chunk-clean",
            Self::EnforceEntityLimits => "enforce-entity-limits",
            Self::UnloadWorldChunks => "unload-world-chunks",
            Self::NotifyAdmin => "notify-admin",
        };
        write!(f, "{name}")
    }
}

/// An action list that accepts both the single-action and list forms:
/// `action: clear-mobs` and `actions: [clear-mobs, disable-mob-ai]`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ActionList {
    /// One action.
    Single(ActionKind),
    /// Zero or more actions, in order.
    List(Vec<ActionKind>),
}

impl ActionList {
    /// The actions in configured order.
    pub fn as_slice(&self) -> &[ActionKind] {
        match self {
            Self::Single(a) => std::slice::from_ref(a),
            Self::List(v) => v.as_slice(),
        }
    }
}

impl Default for ActionList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

// ── Automation ─────────────────────────────────────────────────────

/// Predictive optimization (MSPT trend and spike engine).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PredictiveConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Trend trigger threshold, in milliseconds of MSPT growth per
    /// second. Default: 1.5.
    pub slope_threshold: f64,
    /// Neither detector fires while MSPT sits below this baseline.
    /// Default: 30.0.
    pub mspt_baseline: f64,
    /// Sample buffer length, in seconds. Default: 30.
    pub window_seconds: usize,
    /// Minimum seconds between triggers. Default: 60.
    pub cooldown: u64,
    /// Whether triggers notify admins. Default: true.
    pub notify: bool,
    /// Actions executed on trigger; accepts `action:` or `actions:`.
    #[serde(alias = "action")]
    pub actions: ActionList,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            slope_threshold: 1.5,
            mspt_baseline: 30.0,
            window_seconds: 30,
            cooldown: 60,
            notify: true,
            actions: ActionList::default(),
        }
    }
}

/// Automatic lag-source analysis cutoff.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AutoAnalyzeConfig {
    /// Master switch. Default: true.
    pub enabled: bool,
    /// TPS below which a threshold check also requests an async
    /// lag-source analysis. Default: 16.0.
    pub tps_threshold: f64,
}

impl Default for AutoAnalyzeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tps_threshold: 16.0,
        }
    }
}

/// Automation-wide settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AutomationConfig {
    /// Consecutive matching checks before a threshold level activates.
    /// Default: 3.
    pub trigger_count: u32,
    /// Predictive optimization settings.
    pub predictive_optimization: PredictiveConfig,
    /// Auto-analyze settings.
    pub auto_analyze: AutoAnalyzeConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            trigger_count: 3,
            predictive_optimization: PredictiveConfig::default(),
            auto_analyze: AutoAnalyzeConfig::default(),
        }
    }
}

// ── Modules ────────────────────────────────────────────────────────

/// Redstone suppressor settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RedstoneConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Activations per chunk per window before suppression. Default: 200.
    pub max_activations_per_chunk: u32,
    /// Counting window length, in seconds. Default: 2.
    pub window_seconds: u64,
    /// Suppression duration once triggered, in seconds. Default: 10.
    pub cooldown_seconds: u64,
    /// Whether suppressions notify admins. Default: true.
    pub notify: bool,
    /// When true, activations only count while TPS < `min-tps`.
    /// Default: false.
    pub adaptive_monitoring: bool,
    /// TPS gate for adaptive monitoring. Default: 18.0.
    pub min_tps: f64,
}

impl Default for RedstoneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_activations_per_chunk: 200,
            window_seconds: 2,
            cooldown_seconds: 10,
            notify: true,
            adaptive_monitoring: false,
            min_tps: 18.0,
        }
    }
}

/// World chunk-overload guard settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorldGuardConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Scan cadence, in ticks. Default: 600.
    pub check_interval: u64,
    /// Overload iff `loaded > expected_max * overload-multiplier`.
    /// Default: 1.5.
    pub overload_multiplier: f64,
    /// Expected chunks per player; when absent, derived from view
    /// distance as `(2*vd + 1)^2`.
    pub max_chunks_per_player: Option<u32>,
    /// Unload rounds before escalating to evacuation. Default: 3.
    pub max_retries: u32,
    /// Evacuation target world name; fallback is the first other
    /// loaded world.
    pub evacuate_world: Option<String>,
    /// Whether transitions notify admins. Default: true.
    pub notify: bool,
    /// Extra actions executed when a world first goes overloaded.
    #[serde(alias = "action")]
    pub actions: ActionList,
}

impl Default for WorldGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: 600,
            overload_multiplier: 1.5,
            max_chunks_per_player: None,
            max_retries: 3,
            evacuate_world: None,
            notify: true,
            actions: ActionList::default(),
        }
    }
}

/// Floor and step for one distance-reduction axis.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DistanceReductionConfig {
    /// Never reduce below this distance. Default: 4.
    pub min: u8,
    /// Chunks removed per reduction step. Default: 2.
    pub reduce_by: u8,
}

impl Default for DistanceReductionConfig {
    fn default() -> Self {
        Self { min: 4, reduce_by: 2 }
    }
}

/// Chunk-related module settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChunksConfig {
    /// World overload guard.
    pub world_guard: WorldGuardConfig,
    /// View-distance reduction bounds.
    pub view_distance: DistanceReductionConfig,
    /// Simulation-distance reduction bounds.
    pub simulation_distance: DistanceReductionConfig,
}

/// Frustum culler settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MobAiConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Mobs beyond this distance from every player are out of scope.
    /// Default: 48.0 blocks.
    pub active_radius: f64,
    /// Full view-cone angle. Default: 120.0 degrees.
    pub fov_degrees: f64,
    /// Mobs closer than this to any player always keep AI.
    /// Default: 8.0 blocks.
    pub behind_safe_radius: f64,
    /// Scan cadence, in ticks. Default: 40.
    pub update_interval: u64,
    /// Type keys never scanned.
    pub protected: Vec<String>,
}

impl Default for MobAiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            active_radius: 48.0,
            fov_degrees: 120.0,
            behind_safe_radius: 8.0,
            update_interval: 40,
            protected: Vec::new(),
        }
    }
}

/// Per-world entity limits: specific type keys plus a global default.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PerWorldLimits {
    /// Limit applied when no specific type or category matches.
    /// Negative means unlimited. Default: -1.
    pub default: i64,
    /// Specific type-key or category limits, in configured order.
    #[serde(flatten)]
    pub types: IndexMap<String, i64>,
}

impl Default for PerWorldLimits {
    fn default() -> Self {
        Self {
            default: -1,
            types: IndexMap::new(),
        }
    }
}

/// Entity limit enforcement settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EntityLimitsConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Scan cadence, in ticks. Default: 1200.
    pub check_interval: u64,
    /// Per-chunk per-type caps consumed by the density optimizer.
    pub per_chunk_limit: IndexMap<String, i64>,
    /// Per-world per-type limits consumed by the entity limiter.
    pub per_world_limit: PerWorldLimits,
    /// Metadata flags that bypass density gating
    /// (`tamed`, `named`, `leashed`).
    pub protected_metadata: Vec<String>,
    /// Display names that bypass density gating.
    pub protected_names: Vec<String>,
}

impl Default for EntityLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: 1200,
            per_chunk_limit: IndexMap::new(),
            per_world_limit: PerWorldLimits::default(),
            protected_metadata: Vec::new(),
            protected_names: Vec::new(),
        }
    }
}

/// Per-chunk total-population limiter settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChunkLimiterConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Maximum entities per chunk before eviction. Default: 100.
    pub max_entities_per_chunk: u32,
    /// Scan cadence, in ticks. Default: 600.
    pub scan_interval: u64,
    /// Type keys never evicted.
    pub whitelist: Vec<String>,
}

impl Default for ChunkLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entities_per_chunk: 100,
            scan_interval: 600,
            whitelist: Vec::new(),
        }
    }
}

/// Entity module settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EntitiesConfig {
    /// Per-world and per-chunk-per-type limits.
    pub limits: EntityLimitsConfig,
    /// Per-chunk total-population limiter.
    pub chunk_limiter: ChunkLimiterConfig,
}

/// All load-shedding modules.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModulesConfig {
    /// Redstone suppressor.
    pub redstone: RedstoneConfig,
    /// Chunk guard and distance reductions.
    pub chunks: ChunksConfig,
    /// Frustum culler.
    pub mob_ai: MobAiConfig,
    /// Entity limiters.
    pub entities: EntitiesConfig,
}

// ── System monitors ────────────────────────────────────────────────

/// Threshold engine cadence.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TpsMonitorConfig {
    /// Ticks between threshold checks. Default: 100 (5 s at 20 TPS).
    pub check_interval: u64,
}

impl Default for TpsMonitorConfig {
    fn default() -> Self {
        Self { check_interval: 100 }
    }
}

/// Slow-tick monitor.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TickMonitorConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// A tick longer than this is reported. Default: 100.0 ms.
    pub threshold_ms: f64,
    /// Whether slow ticks notify admins. Default: true.
    pub notify: bool,
}

impl Default for TickMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_ms: 100.0,
            notify: true,
        }
    }
}

/// System monitor settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SystemConfig {
    /// Threshold engine cadence.
    pub tps_monitor: TpsMonitorConfig,
    /// Slow-tick monitor.
    pub tick_monitor: TickMonitorConfig,
}

/// GC observer settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GcMonitorConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Average pauses at or above this are reported. Default: 200 ms.
    pub min_duration_ms: u64,
    /// Whether long pauses notify admins. Default: true.
    pub notify: bool,
}

impl Default for GcMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_duration_ms: 200,
            notify: true,
        }
    }
}

/// Memory-leak trend detector settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LeakDetectorConfig {
    /// Master switch. Default: false.
    pub enabled: bool,
    /// Sampling period, in seconds. Default: 30.
    pub check_interval: u64,
    /// Baseline ring capacity, in samples. Default: 20.
    pub window_size: usize,
    /// Regression slope (MB growth per minute) that counts as a
    /// signal. Default: 10.0.
    pub slope_threshold_mb_per_min: f64,
    /// Minimum baseline samples before fitting. Default: 6.
    pub min_samples: usize,
    /// Minimum seconds between alerts. Default: 300.
    pub alert_cooldown: u64,
    /// Whether confirmed leaks notify admins. Default: true.
    pub notify: bool,
}

impl Default for LeakDetectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: 30,
            window_size: 20,
            slope_threshold_mb_per_min: 10.0,
            min_samples: 6,
            alert_cooldown: 300,
            notify: true,
        }
    }
}

// ── Thresholds & recovery ──────────────────────────────────────────

/// Notification channels for one threshold level.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NotifyConfig {
    /// Chat message to admins. Default: true.
    pub chat: bool,
    /// Action-bar message to admins. Default: false.
    pub actionbar: bool,
    /// Sound cue to admins. Default: false.
    pub sound: bool,
    /// Host sound key.
    pub sound_type: String,
    /// Sound volume. Default: 1.0.
    pub sound_volume: f32,
    /// Sound pitch. Default: 1.0.
    pub sound_pitch: f32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            chat: true,
            actionbar: false,
            sound: false,
            sound_type: "block.note_block.pling".to_string(),
            sound_volume: 1.0,
            sound_pitch: 1.0,
        }
    }
}

/// One configured threshold level.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ThresholdLevelConfig {
    /// The level matches while observed TPS ≤ this value.
    pub tps: f64,
    /// Whether the level participates at all. Default: true.
    pub enabled: bool,
    /// Tie-break between levels at the same TPS; higher is more
    /// severe. Default: 0.
    pub priority: i32,
    /// Admin message on activation.
    pub message: Option<String>,
    /// Whether to also broadcast to non-admins. Default: false.
    pub broadcast: bool,
    /// Broadcast text; falls back to `message`.
    pub broadcast_message: Option<String>,
    /// Actions executed on activation.
    #[serde(alias = "action")]
    pub actions: ActionList,
    /// Console commands dispatched on activation.
    pub commands: Vec<String>,
    /// Notification channels.
    pub notify: NotifyConfig,
}

impl Default for ThresholdLevelConfig {
    fn default() -> Self {
        Self {
            tps: 15.0,
            enabled: true,
            priority: 0,
            message: None,
            broadcast: false,
            broadcast_message: None,
            actions: ActionList::default(),
            commands: Vec::new(),
            notify: NotifyConfig::default(),
        }
    }
}

/// Hysteretic recovery settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecoveryConfig {
    /// Master switch. Default: true.
    pub enabled: bool,
    /// TPS that must hold for recovery to progress. Default: 18.0.
    pub tps_threshold: f64,
    /// Seconds TPS must hold before defaults are restored.
    /// Default: 30.0.
    pub delay_seconds: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tps_threshold: 18.0,
            delay_seconds: 30.0,
        }
    }
}

// ── Root ───────────────────────────────────────────────────────────

/// Complete guardian configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GuardianConfig {
    /// Workload distributor budget per tick, in milliseconds.
    /// Default: 10.0.
    pub workload_limit_ms: f64,
    /// Automation settings.
    pub automation: AutomationConfig,
    /// Load-shedding modules.
    pub modules: ModulesConfig,
    /// System monitors.
    pub system: SystemConfig,
    /// GC observer.
    pub gc_monitor: GcMonitorConfig,
    /// Memory-leak trend detector.
    pub memory_leak_detector: LeakDetectorConfig,
    /// Threshold levels by name, in configured order.
    pub thresholds: IndexMap<String, ThresholdLevelConfig>,
    /// Hysteretic recovery.
    pub recovery: RecoveryConfig,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            workload_limit_ms: 10.0,
            automation: AutomationConfig::default(),
            modules: ModulesConfig::default(),
            system: SystemConfig::default(),
            gc_monitor: GcMonitorConfig::default(),
            memory_leak_detector: LeakDetectorConfig::default(),
            thresholds: IndexMap::new(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl GuardianConfig {
    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Distributor budget must be positive and finite.
        if !self.workload_limit_ms.is_finite() || self.workload_limit_ms <= 0.0 {
            return Err(ConfigError::InvalidBudget {
                value: self.workload_limit_ms,
            });
        }

        // 2. Trigger count and check cadences must be at least 1.
        if self.automation.trigger_count == 0 {
            return Err(ConfigError::ZeroInterval {
                key: "automation.trigger-count",
            });
        }
        for (key, value) in [
            (
                "system.tps-monitor.check-interval",
                self.system.tps_monitor.check_interval,
            ),
            (
                "modules.chunks.world-guard.check-interval",
                self.modules.chunks.world_guard.check_interval,
            ),
            (
                "modules.mob-ai.update-interval",
                self.modules.mob_ai.update_interval,
            ),
            (
                "modules.entities.limits.check-interval",
                self.modules.entities.limits.check_interval,
            ),
            (
                "modules.entities.chunk-limiter.scan-interval",
                self.modules.entities.chunk_limiter.scan_interval,
            ),
            (
                "memory-leak-detector.check-interval",
                self.memory_leak_detector.check_interval,
            ),
            (
                "modules.redstone.window-seconds",
                self.modules.redstone.window_seconds,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { key });
            }
        }

        // 3. Frustum geometry.
        let mob_ai = &self.modules.mob_ai;
        if !(mob_ai.fov_degrees > 0.0 && mob_ai.fov_degrees <= 360.0) {
            return Err(ConfigError::InvalidFov {
                value: mob_ai.fov_degrees,
            });
        }
        if !(mob_ai.active_radius > 0.0) || mob_ai.behind_safe_radius < 0.0 {
            return Err(ConfigError::InvalidRadius {
                active: mob_ai.active_radius,
                behind_safe: mob_ai.behind_safe_radius,
            });
        }

        // 4. Redstone counter.
        if self.modules.redstone.max_activations_per_chunk == 0 {
            return Err(ConfigError::ZeroInterval {
                key: "modules.redstone.max-activations-per-chunk",
            });
        }

        // 5. World guard.
        let wg = &self.modules.chunks.world_guard;
        if !wg.overload_multiplier.is_finite() || wg.overload_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier {
                value: wg.overload_multiplier,
            });
        }
        if wg.max_retries == 0 {
            return Err(ConfigError::ZeroInterval {
                key: "modules.chunks.world-guard.max-retries",
            });
        }

        // 6. Distance reductions must be able to make progress.
        for (key, dr) in [
            ("modules.chunks.view-distance", &self.modules.chunks.view_distance),
            (
                "modules.chunks.simulation-distance",
                &self.modules.chunks.simulation_distance,
            ),
        ] {
            if dr.min < 2 || dr.reduce_by == 0 {
                return Err(ConfigError::InvalidReduction {
                    key,
                    min: dr.min,
                    reduce_by: dr.reduce_by,
                });
            }
        }

        // 7. Leak detector needs enough samples to fit a line.
        let leak = &self.memory_leak_detector;
        if leak.window_size < 2 || leak.min_samples < 2 || leak.min_samples > leak.window_size {
            return Err(ConfigError::InvalidLeakWindow {
                window_size: leak.window_size,
                min_samples: leak.min_samples,
            });
        }

        // 8. Predictive window must admit the spike lookback.
        let pred = &self.automation.predictive_optimization;
        if pred.window_seconds < 4 {
            return Err(ConfigError::PredictiveWindowTooSmall {
                configured: pred.window_seconds,
            });
        }
        if !pred.mspt_baseline.is_finite()
            || pred.mspt_baseline <= 0.0
            || !pred.slope_threshold.is_finite()
        {
            return Err(ConfigError::InvalidPredictive {
                baseline: pred.mspt_baseline,
                slope: pred.slope_threshold,
            });
        }

        // 9. Threshold levels must carry a usable TPS cutoff.
        for (name, level) in &self.thresholds {
            if !(level.tps > 0.0 && level.tps <= 20.0) {
                return Err(ConfigError::InvalidThreshold {
                    name: name.clone(),
                    tps: level.tps,
                });
            }
        }

        // 10. Recovery bounds.
        let rec = &self.recovery;
        if !(rec.tps_threshold > 0.0 && rec.tps_threshold <= 20.0)
            || !rec.delay_seconds.is_finite()
            || rec.delay_seconds < 0.0
        {
            return Err(ConfigError::InvalidRecovery {
                tps_threshold: rec.tps_threshold,
                delay_seconds: rec.delay_seconds,
            });
        }

        Ok(())
    }

    /// Distributor budget in nanoseconds.
    pub fn workload_budget_nanos(&self) -> u64 {
        (self.workload_limit_ms * 1_000_000.0) as u64
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`GuardianConfig::validate()`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// Workload budget is non-positive or not finite.
    InvalidBudget {
        /// The configured value.
        value: f64,
    },
    /// An interval, cadence, or counter that must be ≥ 1 is zero.
    ZeroInterval {
        /// The offending config key.
        key: &'static str,
    },
    /// FOV outside (0, 360].
    InvalidFov {
        /// The configured value.
        value: f64,
    },
    /// Culler radii are unusable.
    InvalidRadius {
        /// Configured active radius.
        active: f64,
        /// Configured behind-safe radius.
        behind_safe: f64,
    },
    /// Overload multiplier below 1.0 or not finite.
    InvalidMultiplier {
        /// The configured value.
        value: f64,
    },
    /// A distance reduction cannot make progress.
    InvalidReduction {
        /// The offending config key.
        key: &'static str,
        /// Configured floor.
        min: u8,
        /// Configured step.
        reduce_by: u8,
    },
    /// Leak detector window cannot support a regression.
    InvalidLeakWindow {
        /// Configured ring capacity.
        window_size: usize,
        /// Configured minimum samples.
        min_samples: usize,
    },
    /// Predictive window below the spike detector's minimum of 4.
    PredictiveWindowTooSmall {
        /// The configured size.
        configured: usize,
    },
    /// Predictive baseline or slope threshold unusable.
    InvalidPredictive {
        /// Configured MSPT baseline.
        baseline: f64,
        /// Configured slope threshold.
        slope: f64,
    },
    /// A threshold level's TPS cutoff is outside (0, 20].
    InvalidThreshold {
        /// The level name.
        name: String,
        /// The configured cutoff.
        tps: f64,
    },
    /// Recovery threshold or delay unusable.
    InvalidRecovery {
        /// Configured TPS threshold.
        tps_threshold: f64,
        /// Configured delay.
        delay_seconds: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBudget { value } => {
                write!(f, "workload-limit-ms must be finite and positive, got {value}")
            }
            Self::ZeroInterval { key } => write!(f, "{key} must be at least 1"),
            Self::InvalidFov { value } => {
                write!(f, "fov-degrees must be in (0, 360], got {value}")
            }
            Self::InvalidRadius { active, behind_safe } => write!(
                f,
                "active-radius must be positive and behind-safe-radius non-negative, \
                 got {active} / {behind_safe}"
            ),
            Self::InvalidMultiplier { value } => {
                write!(f, "overload-multiplier must be finite and >= 1.0, got {value}")
            }
            Self::InvalidReduction { key, min, reduce_by } => write!(
                f,
                "{key}: min must be >= 2 and reduce-by >= 1, got min={min} reduce-by={reduce_by}"
            ),
            Self::InvalidLeakWindow {
                window_size,
                min_samples,
            } => write!(
                f,
                "memory-leak-detector window unusable: window-size={window_size} \
                 min-samples={min_samples}"
            ),
            Self::PredictiveWindowTooSmall { configured } => write!(
                f,
                "predictive-optimization window-seconds must be >= 4, got {configured}"
            ),
            Self::InvalidPredictive { baseline, slope } => write!(
                f,
                "predictive-optimization baseline/slope unusable: baseline={baseline} \
                 slope-threshold={slope}"
            ),
            Self::InvalidThreshold { name, tps } => {
                write!(f, "threshold '{name}': tps must be in (0, 20], got {tps}")
            }
            Self::InvalidRecovery {
                tps_threshold,
                delay_seconds,
            } => write!(
                f,
                "recovery unusable: tps-threshold={tps_threshold} delay-seconds={delay_seconds}"
            ),
        }
    }
}

impl Error for ConfigError {}
