//! The action executor: applies the closed counter-measure set.
//!
//! Subsystem-owned actions (`chunk-clean`, `enforce-entity-limits`,
//! `unload-world-chunks`) are injected as capability closures after
//! the guards are constructed; the executor never holds a pointer back
//! into a subsystem. Every mutating action runs as one distributor
//! task, so the per-tick budget bounds the damage any action list can
//! do to a tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ballast_core::config::{ActionKind, DistanceReductionConfig};
use ballast_core::entity::EntityTag;
use ballast_core::host::{HostAdapter, HostCapabilities};
use indexmap::IndexSet;
use tracing::{debug, info, warn};

use crate::distributor::WorkloadDistributor;

/// Shared flag: set whenever an action alters host settings that
/// recovery must later restore (distances, mob AI).
#[derive(Debug, Default)]
pub struct SettingsModified {
    flag: AtomicBool,
}

impl SettingsModified {
    /// Create an unset flag.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark settings as altered.
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Clear after a successful restore.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Whether any alteration is outstanding.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

type Capability = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Capabilities {
    chunk_clean: Option<Capability>,
    enforce_entity_limits: Option<Capability>,
    unload_world_chunks: Option<Capability>,
}

/// Applies [`ActionKind`] lists through the distributor.
pub struct ActionExecutor {
    host: Arc<dyn HostAdapter>,
    distributor: Arc<WorkloadDistributor>,
    view: DistanceReductionConfig,
    simulation: DistanceReductionConfig,
    host_caps: HostCapabilities,
    modified: Arc<SettingsModified>,
    capabilities: Mutex<Capabilities>,
}

impl ActionExecutor {
    /// Create an executor. Capability closures are wired afterwards
    /// via the `wire_*` methods.
    pub fn new(
        host: Arc<dyn HostAdapter>,
        distributor: Arc<WorkloadDistributor>,
        view: DistanceReductionConfig,
        simulation: DistanceReductionConfig,
        modified: Arc<SettingsModified>,
    ) -> Arc<Self> {
        let host_caps = host.capabilities();
        Arc::new(Self {
            host,
            distributor,
            view,
            simulation,
            host_caps,
            modified,
            capabilities: Mutex::new(Capabilities::default()),
        })
    }

    /// Wire the `chunk-clean` capability.
    pub fn wire_chunk_clean(&self, f: Capability) {
        self.capabilities.lock().expect("capabilities poisoned").chunk_clean = Some(f);
    }

    /// Wire the `enforce-entity-limits` capability.
    pub fn wire_enforce_entity_limits(&self, f: Capability) {
        self.capabilities
            .lock()
            .expect("capabilities poisoned")
            .enforce_entity_limits = Some(f);
    }

    /// Wire the `unload-world-chunks` capability.
    pub fn wire_unload_world_chunks(&self, f: Capability) {
        self.capabilities
            .lock()
            .expect("capabilities poisoned")
            .unload_world_chunks = Some(f);
    }

    /// The shared settings-modified flag.
    pub fn modified(&self) -> Arc<SettingsModified> {
        Arc::clone(&self.modified)
    }

    /// Execute an action list. Duplicate actions within one invocation
    /// run once; order is otherwise preserved.
    pub fn execute(self: &Arc<Self>, actions: &[ActionKind], reason: &str) {
        let unique: IndexSet<ActionKind> = actions.iter().copied().collect();
        for action in unique {
            self.execute_one(action, reason);
        }
    }

    fn execute_one(self: &Arc<Self>, action: ActionKind, reason: &str) {
        debug!(%action, reason, "executing action");
        match action {
            ActionKind::ClearGroundItems => self.sweep(action, |e| e.tag == EntityTag::Item),
            ActionKind::ClearXpOrbs => {
                self.sweep(action, |e| e.tag == EntityTag::ExperienceOrb)
            }
            ActionKind::ClearMobs => self.sweep(action, |e| e.tag.is_living()),
            ActionKind::KillHostileMobs => self.sweep(action, |e| e.tag == EntityTag::Monster),
            ActionKind::DisableMobAi => self.disable_mob_ai(),
            ActionKind::ReduceViewDistance => self.reduce_view_distance(),
            ActionKind::ReduceSimulationDistance => self.reduce_simulation_distance(),
            ActionKind::ForceGc => {
                // Deliberate refusal: an explicit collection trades a
                // tick-sized pause for nothing the collector wouldn't
                // do on its own.
                warn!("force-gc requested; refusing by policy");
            }
            ActionKind::ChunkClean => self.run_capability(action, |c| c.chunk_clean.clone()),
            ActionKind::EnforceEntityLimits => {
                self.run_capability(action, |c| c.enforce_entity_limits.clone())
            }
            ActionKind::UnloadWorldChunks => {
                self.run_capability(action, |c| c.unload_world_chunks.clone())
            }
            ActionKind::NotifyAdmin => {
                self.host
                    .notify_admins(&format!("&e[Ballast] {reason}"));
            }
        }
    }

    /// Remove matching entities across all worlds. Entities with a
    /// custom name, tamed, or leashed are left alone: sweeps are broad
    /// countermeasures, not precision tools.
    fn sweep(
        self: &Arc<Self>,
        action: ActionKind,
        matches: impl Fn(&ballast_core::entity::EntityView) -> bool + Send + 'static,
    ) {
        let host = Arc::clone(&self.host);
        self.enqueue(action, move || {
            let mut removed = 0u32;
            for world in host.worlds() {
                for entity in host.entities(world.id) {
                    if !matches(&entity) {
                        continue;
                    }
                    if entity.has_custom_name() || entity.tamed || entity.leashed {
                        continue;
                    }
                    if host.remove_entity(entity.id).is_ok() {
                        removed += 1;
                    }
                }
            }
            info!(%action, removed, "entity sweep complete");
        });
    }

    fn disable_mob_ai(self: &Arc<Self>) {
        let host = Arc::clone(&self.host);
        let modified = Arc::clone(&self.modified);
        self.enqueue(ActionKind::DisableMobAi, move || {
            let mut disabled = 0u32;
            for world in host.worlds() {
                for entity in host.entities(world.id) {
                    if !entity.tag.is_living() || !entity.aware {
                        continue;
                    }
                    if entity.has_custom_name() || entity.tamed {
                        continue;
                    }
                    if host.set_entity_aware(entity.id, false).is_ok() {
                        disabled += 1;
                    }
                }
            }
            if disabled > 0 {
                modified.set();
            }
            info!(disabled, "mob AI disabled");
        });
    }

    fn reduce_view_distance(self: &Arc<Self>) {
        let host = Arc::clone(&self.host);
        let modified = Arc::clone(&self.modified);
        let floor = self.view.min;
        let step = self.view.reduce_by;
        self.enqueue(ActionKind::ReduceViewDistance, move || {
            for world in host.worlds() {
                let current = world.view_distance;
                let target = current.saturating_sub(step).max(floor);
                if target < current {
                    match host.set_view_distance(world.id, target) {
                        Ok(()) => {
                            modified.set();
                            info!(world = %world.name, current, target, "view distance reduced");
                        }
                        Err(err) => warn!(world = %world.name, %err, "view distance set failed"),
                    }
                }
            }
        });
    }

    fn reduce_simulation_distance(self: &Arc<Self>) {
        if !self.host_caps.simulation_distance {
            warn!("simulation distance capability missing; action skipped");
            return;
        }
        let host = Arc::clone(&self.host);
        let modified = Arc::clone(&self.modified);
        let floor = self.simulation.min;
        let step = self.simulation.reduce_by;
        self.enqueue(ActionKind::ReduceSimulationDistance, move || {
            for world in host.worlds() {
                let Some(current) = world.simulation_distance else {
                    continue;
                };
                let target = current.saturating_sub(step).max(floor);
                if target < current {
                    match host.set_simulation_distance(world.id, target) {
                        Ok(()) => {
                            modified.set();
                            info!(
                                world = %world.name,
                                current, target, "simulation distance reduced"
                            );
                        }
                        Err(err) => {
                            warn!(world = %world.name, %err, "simulation distance set failed")
                        }
                    }
                }
            }
        });
    }

    fn run_capability(
        self: &Arc<Self>,
        action: ActionKind,
        select: impl FnOnce(&Capabilities) -> Option<Capability>,
    ) {
        let capability = {
            let caps = self.capabilities.lock().expect("capabilities poisoned");
            select(&caps)
        };
        match capability {
            Some(f) => f(),
            None => warn!(%action, "capability not wired; action skipped"),
        }
    }

    fn enqueue(self: &Arc<Self>, action: ActionKind, task: impl FnOnce() + Send + 'static) {
        if self.distributor.enqueue(task).is_err() {
            warn!(%action, "distributor full; action dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::entity::Vec3;
    use ballast_core::id::WorldId;
    use ballast_test_utils::{entity, ManualClock, MockHost};
    use std::sync::atomic::AtomicU32;

    const W: WorldId = WorldId(1);

    struct ExecFixture {
        executor: Arc<ActionExecutor>,
        host: Arc<MockHost>,
        distributor: Arc<WorkloadDistributor>,
    }

    fn fixture() -> ExecFixture {
        let clock = Arc::new(ManualClock::new());
        let host = Arc::new(MockHost::new());
        host.add_world(W, "world");
        let distributor = WorkloadDistributor::new(1_000_000_000, clock, host.clone());
        let executor = ActionExecutor::new(
            host.clone(),
            distributor.clone(),
            DistanceReductionConfig { min: 4, reduce_by: 2 },
            DistanceReductionConfig { min: 4, reduce_by: 2 },
            SettingsModified::new(),
        );
        ExecFixture {
            executor,
            host,
            distributor,
        }
    }

    fn origin() -> Vec3 {
        Vec3::new(0.0, 64.0, 0.0)
    }

    #[test]
    fn clear_ground_items_spares_named_and_non_items() {
        let fx = fixture();
        fx.host.add_entity(entity(1, W, origin(), EntityTag::Item));
        let mut named = entity(2, W, origin(), EntityTag::Item);
        named.custom_name = Some("keepsake".to_string());
        fx.host.add_entity(named);
        fx.host.add_entity(entity(3, W, origin(), EntityTag::Monster));

        fx.executor.execute(&[ActionKind::ClearGroundItems], "test");
        fx.distributor.drain_once();

        let removed = fx.host.removed_entities();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, 1);
    }

    #[test]
    fn kill_hostile_mobs_targets_monsters_only() {
        let fx = fixture();
        fx.host.add_entity(entity(1, W, origin(), EntityTag::Monster));
        fx.host.add_entity(entity(2, W, origin(), EntityTag::Passive));
        fx.host.add_entity(entity(3, W, origin(), EntityTag::Item));

        fx.executor.execute(&[ActionKind::KillHostileMobs], "test");
        fx.distributor.drain_once();

        assert_eq!(fx.host.removed_entities(), vec![ballast_core::id::EntityId(1)]);
    }

    #[test]
    fn reduce_view_distance_clamps_at_floor_and_sets_flag() {
        let fx = fixture();
        fx.executor.execute(&[ActionKind::ReduceViewDistance], "test");
        fx.distributor.drain_once();
        assert_eq!(fx.host.view_distance_sets(), vec![(W, 8)]);
        assert!(fx.executor.modified().is_set());

        // Repeated reductions stop at the floor of 4.
        for _ in 0..5 {
            fx.executor.execute(&[ActionKind::ReduceViewDistance], "test");
            fx.distributor.drain_once();
        }
        let sets = fx.host.view_distance_sets();
        assert_eq!(sets.last(), Some(&(W, 4)));
        assert!(sets.iter().all(|&(_, d)| d >= 4));
    }

    #[test]
    fn disable_mob_ai_skips_tamed_and_named() {
        let fx = fixture();
        fx.host.add_entity(entity(1, W, origin(), EntityTag::Monster));
        let mut tamed = entity(2, W, origin(), EntityTag::Tameable);
        tamed.tamed = true;
        fx.host.add_entity(tamed);

        fx.executor.execute(&[ActionKind::DisableMobAi], "test");
        fx.distributor.drain_once();

        assert_eq!(
            fx.host.aware_changes(),
            vec![(ballast_core::id::EntityId(1), false)]
        );
        assert!(fx.executor.modified().is_set());
    }

    #[test]
    fn force_gc_is_a_refusal() {
        let fx = fixture();
        fx.executor.execute(&[ActionKind::ForceGc], "test");
        fx.distributor.drain_once();
        // Nothing mutated, nothing notified: only the log line.
        assert!(fx.host.removed_entities().is_empty());
        assert!(fx.host.admin_notices().is_empty());
    }

    #[test]
    fn duplicate_actions_run_once_per_invocation() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        fx.executor
            .wire_chunk_clean(Arc::new(move || {
                calls2.fetch_add(1, Ordering::AcqRel);
            }));
        fx.executor.execute(
            &[ActionKind::ChunkClean, ActionKind::ChunkClean],
            "test",
        );
        assert_eq!(calls.load(Ordering::Acquire), 1);
    }

    #[test]
    fn unwired_capability_is_skipped() {
        let fx = fixture();
        fx.executor.execute(&[ActionKind::EnforceEntityLimits], "test");
        fx.distributor.drain_once();
        assert!(fx.host.removed_entities().is_empty());
    }

    #[test]
    fn notify_admin_carries_the_reason() {
        let fx = fixture();
        fx.executor.execute(&[ActionKind::NotifyAdmin], "TPS dropped to 12.0");
        assert_eq!(fx.host.admin_notices().len(), 1);
        assert!(fx.host.admin_notices()[0].contains("TPS dropped to 12.0"));
    }
}
