//! Per-chunk per-type density gating.
//!
//! Where a chunk holds more of one type than its configured cap, the
//! first `limit` entities stay active and the remainder lose AI and
//! collision; once the chunk is back under the cap, gated entities are
//! restored. The collidable flag doubles as the gate marker — nothing
//! else in the guardian turns collision off — so recovery never
//! re-awakens mobs the frustum culler put to sleep.

use std::collections::VecDeque;
use std::time::Duration;

use ballast_core::config::EntityLimitsConfig;
use ballast_core::entity::EntityView;
use ballast_core::host::HostAdapter;
use ballast_core::id::{ChunkKey, EntityId};
use ballast_core::time::Clock;
use ballast_engine::Scanner;
use tracing::debug;

use crate::limits;

/// One chunk's typed groups captured at snapshot time.
struct ChunkSample {
    key: ChunkKey,
    entities: Vec<EntityView>,
}

/// Partial snapshot: chunks left to visit plus captured samples.
pub struct DensityScan {
    pending: VecDeque<ChunkKey>,
    chunks: Vec<ChunkSample>,
}

/// A gate or restore, keyed by entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DensityChange {
    /// Disable AI and collision.
    Gate(EntityId),
    /// Restore AI and collision.
    Restore(EntityId),
}

/// The density optimizer scanner.
pub struct DensityOptimizer {
    config: EntityLimitsConfig,
}

impl DensityOptimizer {
    /// Create an optimizer from the entity limits config (it consumes
    /// the `per-chunk-limit` table and protection lists).
    pub fn new(config: EntityLimitsConfig) -> Self {
        Self { config }
    }

    fn bypasses(&self, entity: &EntityView) -> bool {
        let meta = &self.config.protected_metadata;
        if entity.tamed && meta.iter().any(|m| m == "tamed") {
            return true;
        }
        if entity.leashed && meta.iter().any(|m| m == "leashed") {
            return true;
        }
        if entity.has_custom_name() && meta.iter().any(|m| m == "named") {
            return true;
        }
        entity
            .custom_name
            .as_deref()
            .is_some_and(|name| self.config.protected_names.iter().any(|n| n == name))
    }

    fn limit_for(&self, entity: &EntityView) -> Option<i64> {
        limits::lookup(&self.config.per_chunk_limit, &entity.type_key, entity.tag)
    }
}

impl Scanner for DensityOptimizer {
    type State = DensityScan;
    type Mutation = DensityChange;

    fn name(&self) -> &'static str {
        "density-optimizer"
    }

    fn interval_ticks(&self) -> u64 {
        self.config.check_interval
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(1000)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> DensityScan {
        let mut pending = VecDeque::new();
        for world in host.worlds() {
            for pos in host.loaded_chunks(world.id) {
                pending.push_back(ChunkKey {
                    world: world.id,
                    pos,
                });
            }
        }
        DensityScan {
            pending,
            chunks: Vec::new(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut DensityScan,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        while let Some(key) = state.pending.pop_front() {
            let entities = host.entities_in_chunk(key);
            if !entities.is_empty() {
                state.chunks.push(ChunkSample { key, entities });
            }
            if clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: DensityScan) -> Vec<DensityChange> {
        let mut changes = Vec::new();
        for chunk in state.chunks {
            let mut groups: indexmap::IndexMap<&str, Vec<&EntityView>> =
                indexmap::IndexMap::new();
            for entity in &chunk.entities {
                if entity.tag.is_living() {
                    groups.entry(&entity.type_key).or_default().push(entity);
                }
            }

            for (type_key, group) in groups {
                let Some(limit) = group.first().and_then(|e| self.limit_for(e)) else {
                    continue;
                };
                if limit < 0 {
                    continue;
                }
                let limit = limit as usize;

                if group.len() > limit {
                    debug!(chunk = %chunk.key, type_key, count = group.len(), limit, "gating dense type");
                    for entity in &group[limit..] {
                        if self.bypasses(entity) {
                            continue;
                        }
                        if entity.collidable {
                            changes.push(DensityChange::Gate(entity.id));
                        }
                    }
                } else {
                    // Back under the cap: lift previous gates.
                    for entity in &group {
                        if !entity.collidable {
                            changes.push(DensityChange::Restore(entity.id));
                        }
                    }
                }
            }
        }
        changes
    }

    fn apply(&self, host: &dyn HostAdapter, change: DensityChange) {
        let (id, enable) = match change {
            DensityChange::Gate(id) => (id, false),
            DensityChange::Restore(id) => (id, true),
        };
        if host.entity(id).is_none() {
            return;
        }
        let _ = host.set_entity_aware(id, enable);
        let _ = host.set_entity_collidable(id, enable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::config::PerWorldLimits;
    use ballast_core::entity::{EntityTag, Vec3};
    use ballast_core::id::WorldId;
    use ballast_test_utils::{typed_entity, ManualClock, MockHost};
    use indexmap::IndexMap;
    use std::sync::Arc;

    const W: WorldId = WorldId(1);

    fn optimizer(per_chunk: &[(&str, i64)], meta: &[&str]) -> DensityOptimizer {
        DensityOptimizer::new(EntityLimitsConfig {
            enabled: true,
            check_interval: 1200,
            per_chunk_limit: per_chunk.iter().map(|&(k, v)| (k.to_string(), v)).collect(),
            per_world_limit: PerWorldLimits {
                default: -1,
                types: IndexMap::new(),
            },
            protected_metadata: meta.iter().map(|m| m.to_string()).collect(),
            protected_names: Vec::new(),
        })
    }

    fn run_analysis(optimizer: &DensityOptimizer, host: &MockHost) -> Vec<DensityChange> {
        let clock = ManualClock::new();
        let mut state = optimizer.start_snapshot(host);
        while !optimizer.snapshot_step(host, &mut state, u64::MAX, &clock) {}
        optimizer.analyze(state)
    }

    fn host_with_chunk() -> Arc<MockHost> {
        let host = Arc::new(MockHost::new());
        host.add_world(W, "world");
        host.add_chunks(W, [(0, 0)]);
        host
    }

    fn add_cows(host: &MockHost, ids: std::ops::Range<u64>) {
        for id in ids {
            host.add_entity(typed_entity(
                id,
                W,
                Vec3::new((id % 16) as f64, 64.0, 0.0),
                EntityTag::Passive,
                "cow",
            ));
        }
    }

    #[test]
    fn excess_entities_are_gated_keeping_the_first_limit() {
        let host = host_with_chunk();
        add_cows(&host, 0..5);
        let changes = run_analysis(&optimizer(&[("cow", 3)], &[]), &host);
        assert_eq!(
            changes,
            vec![
                DensityChange::Gate(EntityId(3)),
                DensityChange::Gate(EntityId(4)),
            ]
        );
    }

    #[test]
    fn under_limit_restores_gated_entities() {
        let host = host_with_chunk();
        add_cows(&host, 0..2);
        // Entity 1 was gated earlier.
        host.set_entity_aware(EntityId(1), false).unwrap();
        host.set_entity_collidable(EntityId(1), false).unwrap();

        let changes = run_analysis(&optimizer(&[("cow", 3)], &[]), &host);
        assert_eq!(changes, vec![DensityChange::Restore(EntityId(1))]);
    }

    #[test]
    fn recovery_leaves_culled_but_collidable_mobs_alone() {
        let host = host_with_chunk();
        add_cows(&host, 0..2);
        // Frustum-culled: unaware but still collidable.
        host.set_entity_aware(EntityId(1), false).unwrap();

        let changes = run_analysis(&optimizer(&[("cow", 3)], &[]), &host);
        assert!(changes.is_empty());
    }

    #[test]
    fn metadata_bypass_skips_tamed() {
        let host = host_with_chunk();
        add_cows(&host, 0..3);
        let mut tamed = typed_entity(3, W, Vec3::new(3.0, 64.0, 0.0), EntityTag::Passive, "cow");
        tamed.tamed = true;
        host.add_entity(tamed);

        let changes = run_analysis(&optimizer(&[("cow", 3)], &["tamed"]), &host);
        assert!(changes.is_empty());
    }

    #[test]
    fn unlisted_types_are_ignored() {
        let host = host_with_chunk();
        add_cows(&host, 0..20);
        assert!(run_analysis(&optimizer(&[("sheep", 3)], &[]), &host).is_empty());
    }

    #[test]
    fn gate_then_recover_roundtrip() {
        let host = host_with_chunk();
        add_cows(&host, 0..5);
        let opt = optimizer(&[("cow", 3)], &[]);
        for change in run_analysis(&opt, &host) {
            opt.apply(&*host, change);
        }
        assert_eq!(host.collidable_changes().len(), 2);

        // Two cows wander off (despawn); the chunk recovers.
        host.remove_entity(EntityId(0)).unwrap();
        host.remove_entity(EntityId(1)).unwrap();
        for change in run_analysis(&opt, &host) {
            opt.apply(&*host, change);
        }
        let last = host.aware_changes();
        assert_eq!(last.last(), Some(&(EntityId(4), true)));
    }
}
