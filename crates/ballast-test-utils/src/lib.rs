//! Test utilities and mock types for Ballast development.
//!
//! Provides mock implementations of the core boundary traits
//! ([`HostAdapter`], [`RuntimeProbe`], [`Clock`], [`Scheduler`]) plus
//! snapshot-value fixtures. The mocks record every mutation and
//! notification so tests assert on observable effects rather than
//! internals.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod fixtures;

pub use fixtures::{chunk_square, entity, player, typed_entity};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_core::entity::{EntityView, PlayerView, Vec3};
use ballast_core::host::{HostAdapter, HostCapabilities, MutationError, SoundSpec, WorldInfo};
use ballast_core::id::{ChunkKey, ChunkPos, EntityId, WorldId};
use ballast_core::runtime::{CollectorSample, PoolSample, RuntimeProbe};
use ballast_core::scheduler::{RepeatingTask, ScheduleError, Scheduler, Task, TimerHandle};
use ballast_core::time::Clock;
use indexmap::IndexMap;

// ── ManualClock ──────────────────────────────────────────────────

/// A clock tests advance by hand.
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    pub fn advance_nanos(&self, delta: u64) {
        self.nanos.fetch_add(delta, Ordering::Release);
    }

    pub fn advance_millis(&self, delta: u64) {
        self.advance_nanos(delta * 1_000_000);
    }

    pub fn set_millis(&self, millis: u64) {
        self.nanos.store(millis * 1_000_000, Ordering::Release);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

// ── FixedTps ─────────────────────────────────────────────────────

/// A [`TpsSource`](ballast_telemetry::TpsSource) pinned by the test.
pub struct FixedTps {
    bits: AtomicU64,
}

impl FixedTps {
    pub fn new(tps: f64) -> Arc<Self> {
        Arc::new(Self {
            bits: AtomicU64::new(tps.to_bits()),
        })
    }

    pub fn set(&self, tps: f64) {
        self.bits.store(tps.to_bits(), Ordering::Release);
    }
}

impl ballast_telemetry::TpsSource for FixedTps {
    fn current_tps(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

// ── MockProbe ────────────────────────────────────────────────────

struct ProbeState {
    collectors: IndexMap<String, (u64, u64)>,
    tenured: Option<PoolSample>,
    heap_used_mb: f64,
}

/// Scripted [`RuntimeProbe`]: tests set collector counters and pool
/// samples between polls.
pub struct MockProbe {
    state: Mutex<ProbeState>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProbeState {
                collectors: IndexMap::new(),
                tenured: None,
                heap_used_mb: 0.0,
            }),
        }
    }

    /// Set a collector's cumulative counters.
    pub fn set_collector(&self, name: &str, count: u64, total_time_ms: u64) {
        self.state
            .lock()
            .unwrap()
            .collectors
            .insert(name.to_string(), (count, total_time_ms));
    }

    /// Set the tenured pool's post-collection sample.
    pub fn set_tenured_post_gc(&self, used_mb: f64, collection_count: u64) {
        self.state.lock().unwrap().tenured = Some(PoolSample {
            used_mb,
            collection_count,
        });
    }

    pub fn set_heap_used_mb(&self, used_mb: f64) {
        self.state.lock().unwrap().heap_used_mb = used_mb;
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProbe for MockProbe {
    fn collectors(&self) -> Vec<CollectorSample> {
        self.state
            .lock()
            .unwrap()
            .collectors
            .iter()
            .map(|(name, &(count, total_time_ms))| CollectorSample {
                name: name.clone(),
                count,
                total_time_ms,
            })
            .collect()
    }

    fn tenured_post_gc(&self) -> Option<PoolSample> {
        self.state.lock().unwrap().tenured
    }

    fn heap_used_mb(&self) -> f64 {
        self.state.lock().unwrap().heap_used_mb
    }
}

// ── MockHost ─────────────────────────────────────────────────────

/// One world inside the mock host. Fields are adjusted through
/// [`MockHost::configure_world`].
pub struct MockWorld {
    pub name: String,
    pub is_default: bool,
    pub view_distance: u8,
    pub simulation_distance: Option<u8>,
    pub spawn: Vec3,
    pub chunks: Vec<ChunkPos>,
    pub players: Vec<PlayerView>,
    pub entities: Vec<EntityView>,
}

#[derive(Default)]
struct MutationLog {
    removed: Vec<EntityId>,
    aware_changes: Vec<(EntityId, bool)>,
    collidable_changes: Vec<(EntityId, bool)>,
    view_distance_sets: Vec<(WorldId, u8)>,
    simulation_distance_sets: Vec<(WorldId, u8)>,
    unloaded_chunks: Vec<(ChunkKey, bool)>,
    unloaded_worlds: Vec<(WorldId, bool)>,
    teleports: Vec<(EntityId, WorldId, Vec3)>,
    commands: Vec<String>,
    restore_defaults_calls: u32,
}

#[derive(Default)]
struct NoticeLog {
    admin: Vec<String>,
    broadcast: Vec<String>,
    action_bar: Vec<String>,
    sounds: Vec<SoundSpec>,
}

struct HostState {
    worlds: IndexMap<WorldId, MockWorld>,
    capabilities: HostCapabilities,
    plugin_tasks: Vec<(String, u32)>,
    mutations: MutationLog,
    notices: NoticeLog,
}

/// Recording [`HostAdapter`] backed by in-memory worlds.
///
/// Mutations apply to the in-memory state (so re-measurement sees
/// their effect) and are also appended to inspection logs.
pub struct MockHost {
    state: Mutex<HostState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                worlds: IndexMap::new(),
                capabilities: HostCapabilities {
                    simulation_distance: true,
                },
                plugin_tasks: Vec::new(),
                mutations: MutationLog::default(),
                notices: NoticeLog::default(),
            }),
        }
    }

    // ── Setup ────────────────────────────────────────────────

    pub fn add_world(&self, id: WorldId, name: &str) {
        self.state.lock().unwrap().worlds.insert(
            id,
            MockWorld {
                name: name.to_string(),
                is_default: false,
                view_distance: 10,
                simulation_distance: Some(10),
                spawn: Vec3::new(0.0, 64.0, 0.0),
                chunks: Vec::new(),
                players: Vec::new(),
                entities: Vec::new(),
            },
        );
    }

    /// Adjust one world in place.
    ///
    /// # Panics
    ///
    /// Panics if the world was never added.
    pub fn configure_world(&self, id: WorldId, f: impl FnOnce(&mut MockWorld)) {
        let mut state = self.state.lock().unwrap();
        f(state.worlds.get_mut(&id).expect("world not added"))
    }

    pub fn add_chunks(&self, world: WorldId, chunks: impl IntoIterator<Item = (i32, i32)>) {
        self.configure_world(world, |w| {
            w.chunks
                .extend(chunks.into_iter().map(|(x, z)| ChunkPos::new(x, z)));
        });
    }

    pub fn add_player(&self, view: PlayerView) {
        self.configure_world(view.world, |w| w.players.push(view));
    }

    pub fn add_entity(&self, view: EntityView) {
        self.configure_world(view.world, |w| w.entities.push(view));
    }

    pub fn set_capabilities(&self, capabilities: HostCapabilities) {
        self.state.lock().unwrap().capabilities = capabilities;
    }

    pub fn set_plugin_tasks(&self, tasks: Vec<(String, u32)>) {
        self.state.lock().unwrap().plugin_tasks = tasks;
    }

    // ── Inspection ───────────────────────────────────────────

    pub fn admin_notices(&self) -> Vec<String> {
        self.state.lock().unwrap().notices.admin.clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().notices.broadcast.clone()
    }

    pub fn action_bars(&self) -> Vec<String> {
        self.state.lock().unwrap().notices.action_bar.clone()
    }

    pub fn sounds_played(&self) -> usize {
        self.state.lock().unwrap().notices.sounds.len()
    }

    pub fn removed_entities(&self) -> Vec<EntityId> {
        self.state.lock().unwrap().mutations.removed.clone()
    }

    pub fn aware_changes(&self) -> Vec<(EntityId, bool)> {
        self.state.lock().unwrap().mutations.aware_changes.clone()
    }

    pub fn collidable_changes(&self) -> Vec<(EntityId, bool)> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .collidable_changes
            .clone()
    }

    pub fn view_distance_sets(&self) -> Vec<(WorldId, u8)> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .view_distance_sets
            .clone()
    }

    pub fn simulation_distance_sets(&self) -> Vec<(WorldId, u8)> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .simulation_distance_sets
            .clone()
    }

    pub fn unloaded_chunks(&self) -> Vec<(ChunkKey, bool)> {
        self.state.lock().unwrap().mutations.unloaded_chunks.clone()
    }

    pub fn unloaded_worlds(&self) -> Vec<(WorldId, bool)> {
        self.state.lock().unwrap().mutations.unloaded_worlds.clone()
    }

    pub fn teleports(&self) -> Vec<(EntityId, WorldId, Vec3)> {
        self.state.lock().unwrap().mutations.teleports.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.commands.clone()
    }

    pub fn restore_defaults_calls(&self) -> u32 {
        self.state.lock().unwrap().mutations.restore_defaults_calls
    }

    pub fn entity_count(&self, world: WorldId) -> usize {
        self.state
            .lock()
            .unwrap()
            .worlds
            .get(&world)
            .map_or(0, |w| w.entities.len())
    }

    pub fn chunk_count(&self, world: WorldId) -> usize {
        self.state
            .lock()
            .unwrap()
            .worlds
            .get(&world)
            .map_or(0, |w| w.chunks.len())
    }

    fn info_of(id: WorldId, world: &MockWorld) -> WorldInfo {
        WorldInfo {
            id,
            name: world.name.clone(),
            is_default: world.is_default,
            player_count: world.players.len() as u32,
            loaded_chunk_count: world.chunks.len() as u32,
            view_distance: world.view_distance,
            simulation_distance: world.simulation_distance,
            spawn: world.spawn,
        }
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAdapter for MockHost {
    fn worlds(&self) -> Vec<WorldInfo> {
        let state = self.state.lock().unwrap();
        state
            .worlds
            .iter()
            .map(|(&id, w)| Self::info_of(id, w))
            .collect()
    }

    fn world(&self, id: WorldId) -> Option<WorldInfo> {
        let state = self.state.lock().unwrap();
        state.worlds.get(&id).map(|w| Self::info_of(id, w))
    }

    fn loaded_chunks(&self, world: WorldId) -> Vec<ChunkPos> {
        let state = self.state.lock().unwrap();
        state.worlds.get(&world).map_or(Vec::new(), |w| w.chunks.clone())
    }

    fn players(&self, world: WorldId) -> Vec<PlayerView> {
        let state = self.state.lock().unwrap();
        state
            .worlds
            .get(&world)
            .map_or(Vec::new(), |w| w.players.clone())
    }

    fn entities(&self, world: WorldId) -> Vec<EntityView> {
        let state = self.state.lock().unwrap();
        state
            .worlds
            .get(&world)
            .map_or(Vec::new(), |w| w.entities.clone())
    }

    fn entities_in_chunk(&self, key: ChunkKey) -> Vec<EntityView> {
        let state = self.state.lock().unwrap();
        state.worlds.get(&key.world).map_or(Vec::new(), |w| {
            w.entities
                .iter()
                .filter(|e| e.chunk() == key)
                .cloned()
                .collect()
        })
    }

    fn entities_near(&self, world: WorldId, center: Vec3, radius: f64) -> Vec<EntityView> {
        let state = self.state.lock().unwrap();
        state.worlds.get(&world).map_or(Vec::new(), |w| {
            w.entities
                .iter()
                .filter(|e| e.pos.distance_sq(center) <= radius * radius)
                .cloned()
                .collect()
        })
    }

    fn entity(&self, id: EntityId) -> Option<EntityView> {
        let state = self.state.lock().unwrap();
        state
            .worlds
            .values()
            .flat_map(|w| w.entities.iter())
            .find(|e| e.id == id)
            .cloned()
    }

    fn chunk_is_loaded(&self, key: ChunkKey) -> bool {
        let state = self.state.lock().unwrap();
        state
            .worlds
            .get(&key.world)
            .is_some_and(|w| w.chunks.contains(&key.pos))
    }

    fn capabilities(&self) -> HostCapabilities {
        self.state.lock().unwrap().capabilities
    }

    fn plugin_task_counts(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().plugin_tasks.clone()
    }

    fn remove_entity(&self, id: EntityId) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        for world in state.worlds.values_mut() {
            if let Some(pos) = world.entities.iter().position(|e| e.id == id) {
                world.entities.remove(pos);
                state.mutations.removed.push(id);
                return Ok(());
            }
        }
        Err(MutationError::Missing)
    }

    fn set_entity_aware(&self, id: EntityId, aware: bool) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        for world in state.worlds.values_mut() {
            if let Some(entity) = world.entities.iter_mut().find(|e| e.id == id) {
                entity.aware = aware;
                state.mutations.aware_changes.push((id, aware));
                return Ok(());
            }
        }
        Err(MutationError::Missing)
    }

    fn set_entity_collidable(&self, id: EntityId, collidable: bool) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        for world in state.worlds.values_mut() {
            if let Some(entity) = world.entities.iter_mut().find(|e| e.id == id) {
                entity.collidable = collidable;
                state.mutations.collidable_changes.push((id, collidable));
                return Ok(());
            }
        }
        Err(MutationError::Missing)
    }

    fn set_view_distance(&self, world: WorldId, distance: u8) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match state.worlds.get_mut(&world) {
            Some(w) => {
                w.view_distance = distance;
                state.mutations.view_distance_sets.push((world, distance));
                Ok(())
            }
            None => Err(MutationError::Missing),
        }
    }

    fn set_simulation_distance(&self, world: WorldId, distance: u8) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        if !state.capabilities.simulation_distance {
            return Err(MutationError::Unsupported);
        }
        match state.worlds.get_mut(&world) {
            Some(w) => {
                w.simulation_distance = Some(distance);
                state
                    .mutations
                    .simulation_distance_sets
                    .push((world, distance));
                Ok(())
            }
            None => Err(MutationError::Missing),
        }
    }

    fn unload_chunk(&self, key: ChunkKey, save: bool) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match state.worlds.get_mut(&key.world) {
            Some(w) => match w.chunks.iter().position(|&c| c == key.pos) {
                Some(pos) => {
                    w.chunks.remove(pos);
                    state.mutations.unloaded_chunks.push((key, save));
                    Ok(())
                }
                None => Err(MutationError::Missing),
            },
            None => Err(MutationError::Missing),
        }
    }

    fn unload_world(&self, world: WorldId, save: bool) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        let is_default = match state.worlds.get(&world) {
            Some(w) => w.is_default,
            None => return Err(MutationError::Missing),
        };
        if is_default {
            return Err(MutationError::Refused {
                reason: "cannot unload the default world".to_string(),
            });
        }
        state.worlds.shift_remove(&world);
        state.mutations.unloaded_worlds.push((world, save));
        Ok(())
    }

    fn teleport_player(
        &self,
        player: EntityId,
        world: WorldId,
        pos: Vec3,
    ) -> Result<(), MutationError> {
        let mut state = self.state.lock().unwrap();
        if !state.worlds.contains_key(&world) {
            return Err(MutationError::Missing);
        }
        let mut moved = None;
        for source in state.worlds.values_mut() {
            if let Some(idx) = source.players.iter().position(|p| p.id == player) {
                moved = Some(source.players.remove(idx));
                break;
            }
        }
        let Some(mut view) = moved else {
            return Err(MutationError::Missing);
        };
        view.world = world;
        view.pos = pos;
        view.eye_pos = Vec3::new(pos.x, pos.y + 1.6, pos.z);
        state
            .worlds
            .get_mut(&world)
            .expect("checked above")
            .players
            .push(view);
        state.mutations.teleports.push((player, world, pos));
        Ok(())
    }

    fn dispatch_command(&self, command: &str) -> Result<(), MutationError> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .commands
            .push(command.to_string());
        Ok(())
    }

    fn restore_defaults(&self) -> Result<(), MutationError> {
        self.state.lock().unwrap().mutations.restore_defaults_calls += 1;
        Ok(())
    }

    fn notify_admins(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .notices
            .admin
            .push(message.to_string());
    }

    fn broadcast(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .notices
            .broadcast
            .push(message.to_string());
    }

    fn send_action_bar(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .notices
            .action_bar
            .push(message.to_string());
    }

    fn play_sound(&self, sound: &SoundSpec) {
        self.state.lock().unwrap().notices.sounds.push(sound.clone());
    }
}

// ── VirtualScheduler ─────────────────────────────────────────────

struct VirtualTimer {
    every: u64,
    next: u64,
    task: RepeatingTask,
    handle: TimerHandle,
}

struct VirtualDaemon {
    period: Duration,
    task: RepeatingTask,
    handle: TimerHandle,
}

struct SchedulerState {
    tick: u64,
    main: VecDeque<Task>,
    delayed: Vec<(u64, Task)>,
    timers: Vec<VirtualTimer>,
    daemons: Vec<VirtualDaemon>,
    queued_workers: VecDeque<Task>,
    inline_workers: bool,
    workers_shut_down: bool,
}

/// Deterministic [`Scheduler`] for tests.
///
/// Nothing runs until the test calls [`advance_tick`]
/// (main-thread work) or [`fire_daemons`] (daemon timers). Worker
/// tasks run inline at submission by default; construct with
/// [`with_queued_workers`](VirtualScheduler::with_queued_workers) to
/// buffer them for an explicit [`drain_workers`] instead.
///
/// [`advance_tick`]: VirtualScheduler::advance_tick
/// [`fire_daemons`]: VirtualScheduler::fire_daemons
/// [`drain_workers`]: VirtualScheduler::drain_workers
pub struct VirtualScheduler {
    state: Mutex<SchedulerState>,
}

impl VirtualScheduler {
    pub fn new() -> Arc<Self> {
        Self::build(true)
    }

    pub fn with_queued_workers() -> Arc<Self> {
        Self::build(false)
    }

    fn build(inline_workers: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                tick: 0,
                main: VecDeque::new(),
                delayed: Vec::new(),
                timers: Vec::new(),
                daemons: Vec::new(),
                queued_workers: VecDeque::new(),
                inline_workers,
                workers_shut_down: false,
            }),
        })
    }

    /// Advance one tick: runs queued main tasks, due one-shots, and
    /// due repeating timers, in that order. Work scheduled by the
    /// executing tasks lands on later ticks.
    pub fn advance_tick(&self) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.tick += 1;
            let tick = state.tick;

            let mut batch: Vec<Task> = state.main.drain(..).collect();

            let mut remaining = Vec::new();
            for (due, task) in state.delayed.drain(..) {
                if due <= tick {
                    batch.push(task);
                } else {
                    remaining.push((due, task));
                }
            }
            state.delayed = remaining;

            state.timers.retain(|t| !t.handle.is_cancelled());
            for timer in &mut state.timers {
                if tick >= timer.next {
                    timer.next = tick + timer.every;
                    let task = Arc::clone(&timer.task);
                    batch.push(Box::new(move || task()));
                }
            }
            batch
        };
        for task in batch {
            task();
        }
    }

    /// Advance `n` ticks.
    pub fn run_ticks(&self, n: u64) {
        for _ in 0..n {
            self.advance_tick();
        }
    }

    /// Run queued worker tasks until none remain (queued-workers mode).
    pub fn drain_workers(&self) {
        loop {
            let task = self.state.lock().unwrap().queued_workers.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Fire every live daemon timer once.
    pub fn fire_daemons(&self) {
        let tasks: Vec<RepeatingTask> = {
            let mut state = self.state.lock().unwrap();
            state.daemons.retain(|d| !d.handle.is_cancelled());
            state.daemons.iter().map(|d| Arc::clone(&d.task)).collect()
        };
        for task in tasks {
            task();
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.state.lock().unwrap().tick
    }

    pub fn pending_main(&self) -> usize {
        self.state.lock().unwrap().main.len()
    }

    pub fn daemon_periods(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap()
            .daemons
            .iter()
            .map(|d| d.period)
            .collect()
    }

    /// Simulate worker pool shutdown: later `on_worker` calls fail.
    pub fn shut_down_workers(&self) {
        self.state.lock().unwrap().workers_shut_down = true;
    }
}

impl Scheduler for VirtualScheduler {
    fn on_main(&self, task: Task) {
        self.state.lock().unwrap().main.push_back(task);
    }

    fn later_main(&self, delay_ticks: u64, task: Task) {
        let mut state = self.state.lock().unwrap();
        let due = state.tick + delay_ticks.max(1);
        state.delayed.push((due, task));
    }

    fn timer_main(&self, every_ticks: u64, task: RepeatingTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock().unwrap();
        let every = every_ticks.max(1);
        let next = state.tick + every;
        state.timers.push(VirtualTimer {
            every,
            next,
            task,
            handle: handle.clone(),
        });
        handle
    }

    fn on_worker(&self, task: Task) -> Result<(), ScheduleError> {
        let inline = {
            let mut state = self.state.lock().unwrap();
            if state.workers_shut_down {
                return Err(ScheduleError::ExecutorShutdown);
            }
            if !state.inline_workers {
                state.queued_workers.push_back(task);
                return Ok(());
            }
            true
        };
        if inline {
            task();
        }
        Ok(())
    }

    fn daemon_timer(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let handle = TimerHandle::new();
        self.state.lock().unwrap().daemons.push(VirtualDaemon {
            period,
            task,
            handle: handle.clone(),
        });
        handle
    }
}
