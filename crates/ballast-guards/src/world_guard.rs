//! World chunk-overload guard with escalation.
//!
//! Per cycle each world's loaded chunk count is measured against
//! `max(players * chunks_per_player, 100)` scaled by the overload
//! multiplier. An overloaded world gets a round of ranked chunk
//! unloads (farthest from any player first, never within two chunks of
//! one), a re-measure two seconds later, and — after `max-retries`
//! failed rounds — evacuation: players teleport to the configured
//! refuge world and the world itself is unloaded, falling back to
//! force-unloading its chunks when the host refuses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ballast_core::config::{GuardianConfig, WorldGuardConfig};
use ballast_core::host::{HostAdapter, MutationError, WorldInfo};
use ballast_core::id::{ChunkKey, ChunkPos, WorldId};
use ballast_core::scheduler::Scheduler;
use ballast_core::time::Clock;
use ballast_engine::{ActionExecutor, Scanner, WorkloadDistributor};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

/// Chunks within this Chebyshev radius of a player are never unload
/// candidates.
const PLAYER_EXCLUSION_RADIUS: u32 = 2;

/// Ticks between a dispatch round and its re-measure (2 s).
const REMEASURE_DELAY_TICKS: u64 = 40;

/// Chunk unloads per distributor task during forced evacuation.
const FORCE_UNLOAD_BATCH: usize = 50;

#[derive(Clone, Copy, Debug, Default)]
struct GuardState {
    retries: u32,
    evacuating: bool,
}

/// One world captured at snapshot time.
struct GuardSample {
    info: WorldInfo,
    chunks: Vec<ChunkPos>,
    player_chunks: SmallVec<[ChunkPos; 8]>,
}

/// Partial snapshot: worlds left to visit plus captured samples.
pub struct GuardScan {
    pending: VecDeque<WorldId>,
    worlds: Vec<GuardSample>,
}

/// One guard decision, applied on the main thread.
#[derive(Debug)]
pub enum GuardOp {
    /// Unload one chunk.
    Unload {
        /// The chunk.
        key: ChunkKey,
        /// Save variant (retry rounds save; the first round doesn't).
        save: bool,
    },
    /// Execute the guard's configured action list.
    RunActions {
        /// World name, for the action reason string.
        world_name: String,
    },
    /// Schedule the 2 s re-measure for a world.
    Remeasure {
        /// The world.
        world: WorldId,
    },
    /// Evacuate and unload a world.
    Evacuate {
        /// The world.
        world: WorldId,
    },
}

/// The world overload guard scanner and state machine.
pub struct WorldChunkGuard {
    config: WorldGuardConfig,
    host: Arc<dyn HostAdapter>,
    distributor: Arc<WorkloadDistributor>,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<ActionExecutor>,
    states: Mutex<HashMap<WorldId, GuardState>>,
    weak: Weak<WorldChunkGuard>,
}

impl WorldChunkGuard {
    /// Create the guard.
    pub fn new(
        config: &GuardianConfig,
        host: Arc<dyn HostAdapter>,
        distributor: Arc<WorkloadDistributor>,
        scheduler: Arc<dyn Scheduler>,
        executor: Arc<ActionExecutor>,
    ) -> Arc<Self> {
        let guard_config = config.modules.chunks.world_guard.clone();
        Arc::new_cyclic(|weak| Self {
            config: guard_config,
            host,
            distributor,
            scheduler,
            executor,
            states: Mutex::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// `max(players * chunks_per_player, 100)`, with
    /// `chunks_per_player` configured or derived from view distance.
    pub fn expected_max(&self, info: &WorldInfo) -> f64 {
        let per_player = match self.config.max_chunks_per_player {
            Some(configured) => f64::from(configured),
            None => {
                let vd = f64::from(info.view_distance);
                (2.0 * vd + 1.0).powi(2)
            }
        };
        (f64::from(info.player_count) * per_player).max(100.0)
    }

    /// Current retry count for a world (0 when not overloaded).
    pub fn retries(&self, world: WorldId) -> u32 {
        self.states
            .lock()
            .expect("guard states poisoned")
            .get(&world)
            .map_or(0, |s| s.retries)
    }

    fn overload_threshold(&self, info: &WorldInfo) -> f64 {
        self.expected_max(info) * self.config.overload_multiplier
    }

    /// Rank unload candidates: outside every player's exclusion
    /// radius, farthest from the nearest player first.
    fn rank_candidates(chunks: &[ChunkPos], player_chunks: &[ChunkPos]) -> Vec<ChunkPos> {
        let mut ranked: Vec<(u64, ChunkPos)> = chunks
            .iter()
            .filter(|chunk| {
                player_chunks
                    .iter()
                    .all(|p| chunk.chebyshev(*p) > PLAYER_EXCLUSION_RADIUS)
            })
            .map(|&chunk| {
                let nearest = player_chunks
                    .iter()
                    .map(|p| {
                        let dx = (chunk.x as i64 - p.x as i64).unsigned_abs();
                        let dz = (chunk.z as i64 - p.z as i64).unsigned_abs();
                        dx * dx + dz * dz
                    })
                    .min()
                    .unwrap_or(u64::MAX);
                (nearest, chunk)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, chunk)| chunk).collect()
    }

    /// The 2 s follow-up after a dispatch round. Main thread.
    fn remeasure(&self, world: WorldId) {
        let mut states = self.states.lock().expect("guard states poisoned");
        let Some(info) = self.host.world(world) else {
            states.remove(&world);
            return;
        };
        let loaded = f64::from(info.loaded_chunk_count);
        if loaded > self.overload_threshold(&info) {
            if let Some(state) = states.get_mut(&world) {
                state.retries += 1;
                warn!(
                    world = %info.name,
                    loaded = info.loaded_chunk_count,
                    retries = state.retries,
                    "chunk unload round did not relieve overload"
                );
                if self.config.notify {
                    self.host.notify_admins(&format!(
                        "&c[Ballast] World '{}' still overloaded ({} chunks), retry {}",
                        info.name, info.loaded_chunk_count, state.retries
                    ));
                }
            }
        } else if states.remove(&world).is_some() {
            info!(world = %info.name, loaded = info.loaded_chunk_count, "chunk overload relieved");
            if self.config.notify {
                self.host.notify_admins(&format!(
                    "&a[Ballast] World '{}' back under its chunk limit ({} loaded)",
                    info.name, info.loaded_chunk_count
                ));
            }
        }
    }

    /// Evacuate a world and unload it. Main thread, inside a
    /// distributor task.
    fn evacuate(&self, world: WorldId) {
        let Some(info) = self.host.world(world) else {
            self.states.lock().expect("guard states poisoned").remove(&world);
            return;
        };
        let Some(target) = self.evacuation_target(world) else {
            warn!(world = %info.name, "no evacuation target available");
            return;
        };

        let players = self.host.players(world);
        for player in &players {
            if let Err(err) = self.host.teleport_player(player.id, target.id, target.spawn) {
                warn!(player = %player.id, %err, "evacuation teleport failed");
            }
        }
        warn!(
            world = %info.name,
            target = %target.name,
            players = players.len(),
            "world evacuated"
        );
        if self.config.notify {
            self.host.notify_admins(&format!(
                "&c[Ballast] Evacuated {} player(s) from '{}' to '{}'",
                players.len(),
                info.name,
                target.name
            ));
        }

        match self.host.unload_world(world, true) {
            Ok(()) => {
                self.states.lock().expect("guard states poisoned").remove(&world);
                info!(world = %info.name, "world unloaded");
            }
            Err(MutationError::Refused { reason }) => {
                // The host won't drop the world (typically the
                // default); shed its chunks instead.
                warn!(world = %info.name, reason, "world unload refused; force-unloading chunks");
                self.force_unload_chunks(world);
            }
            Err(err) => warn!(world = %info.name, %err, "world unload failed"),
        }
    }

    fn force_unload_chunks(&self, world: WorldId) {
        let host = Arc::clone(&self.host);
        let chunks = self.host.loaded_chunks(world);
        for batch in chunks.chunks(FORCE_UNLOAD_BATCH) {
            let host = Arc::clone(&host);
            let batch: Vec<ChunkPos> = batch.to_vec();
            let enqueued = self.distributor.enqueue(move || {
                for pos in &batch {
                    let _ = host.unload_chunk(ChunkKey { world, pos: *pos }, false);
                }
            });
            if enqueued.is_err() {
                warn!("distributor full during forced chunk unload");
                break;
            }
        }
    }

    fn evacuation_target(&self, from: WorldId) -> Option<WorldInfo> {
        let worlds = self.host.worlds();
        if let Some(name) = &self.config.evacuate_world {
            if let Some(world) = worlds.iter().find(|w| &w.name == name && w.id != from) {
                return Some(world.clone());
            }
        }
        worlds.into_iter().find(|w| w.id != from)
    }
}

impl Scanner for WorldChunkGuard {
    type State = GuardScan;
    type Mutation = GuardOp;

    fn name(&self) -> &'static str {
        "world-chunk-guard"
    }

    fn interval_ticks(&self) -> u64 {
        self.config.check_interval
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(1000)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> GuardScan {
        GuardScan {
            pending: host.worlds().into_iter().map(|w| w.id).collect(),
            worlds: Vec::new(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut GuardScan,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        while let Some(world) = state.pending.pop_front() {
            let Some(info) = host.world(world) else { continue };
            let chunks = host.loaded_chunks(world);
            let player_chunks = host
                .players(world)
                .into_iter()
                .map(|p| p.chunk().pos)
                .collect();
            state.worlds.push(GuardSample {
                info,
                chunks,
                player_chunks,
            });
            if clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: GuardScan) -> Vec<GuardOp> {
        let mut ops = Vec::new();
        let mut states = self.states.lock().expect("guard states poisoned");

        for sample in state.worlds {
            let info = &sample.info;
            let expected = self.expected_max(info);
            let threshold = expected * self.config.overload_multiplier;
            let loaded = f64::from(info.loaded_chunk_count);

            if loaded <= threshold {
                states.remove(&info.id);
                continue;
            }

            let entry = states.entry(info.id).or_default();
            if entry.evacuating {
                continue;
            }
            if entry.retries >= self.config.max_retries {
                entry.evacuating = true;
                ops.push(GuardOp::Evacuate { world: info.id });
                continue;
            }

            let excess = (loaded - expected) as usize;
            let save = entry.retries > 0;
            debug!(
                world = %info.name,
                loaded = info.loaded_chunk_count,
                expected,
                excess,
                retries = entry.retries,
                "world over chunk limit"
            );

            if entry.retries == 0 {
                if self.config.notify {
                    self.host.notify_admins(&format!(
                        "&c[Ballast] World '{}' overloaded: {} chunks loaded (expected ≤ {:.0})",
                        info.name, info.loaded_chunk_count, expected
                    ));
                }
                if !self.config.actions.as_slice().is_empty() {
                    ops.push(GuardOp::RunActions {
                        world_name: info.name.clone(),
                    });
                }
            }

            let candidates = Self::rank_candidates(&sample.chunks, &sample.player_chunks);
            for chunk in candidates.into_iter().take(excess) {
                ops.push(GuardOp::Unload {
                    key: ChunkKey {
                        world: info.id,
                        pos: chunk,
                    },
                    save,
                });
            }
            ops.push(GuardOp::Remeasure { world: info.id });
        }
        ops
    }

    fn apply(&self, host: &dyn HostAdapter, op: GuardOp) {
        match op {
            GuardOp::Unload { key, save } => {
                if host.chunk_is_loaded(key) {
                    let _ = host.unload_chunk(key, save);
                }
            }
            GuardOp::RunActions { world_name } => {
                self.executor.execute(
                    self.config.actions.as_slice(),
                    &format!("world '{world_name}' chunk overload"),
                );
            }
            GuardOp::Remeasure { world } => {
                let weak = self.weak.clone();
                self.scheduler.later_main(
                    REMEASURE_DELAY_TICKS,
                    Box::new(move || {
                        if let Some(guard) = weak.upgrade() {
                            guard.remeasure(world);
                        }
                    }),
                );
            }
            GuardOp::Evacuate { world } => self.evacuate(world),
        }
    }
}
