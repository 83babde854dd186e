//! Per-chunk total-population cap with ranked eviction.
//!
//! A chunk over `max-entities-per-chunk` sheds its excess in
//! capability-rank order: dropped items first, then experience orbs,
//! then hostiles, then other living entities. Whitelisted types,
//! named, tamed, leashed, mounted entities and armor stands are never
//! removable.

use std::collections::VecDeque;
use std::time::Duration;

use ballast_core::config::ChunkLimiterConfig;
use ballast_core::entity::{EntityTag, EntityView};
use ballast_core::host::HostAdapter;
use ballast_core::id::{ChunkKey, EntityId};
use ballast_core::time::Clock;
use ballast_engine::Scanner;
use tracing::debug;

/// One overfull chunk captured at snapshot time.
struct OverfullChunk {
    key: ChunkKey,
    total: usize,
    entities: Vec<EntityView>,
}

/// Partial snapshot: chunks left to visit plus overfull ones found.
pub struct ChunkScan {
    pending: VecDeque<ChunkKey>,
    overfull: Vec<OverfullChunk>,
}

/// The per-chunk limiter scanner.
pub struct ChunkLimiter {
    config: ChunkLimiterConfig,
}

impl ChunkLimiter {
    /// Create a limiter from its module config.
    pub fn new(config: ChunkLimiterConfig) -> Self {
        Self { config }
    }

    fn is_removable(&self, entity: &EntityView) -> bool {
        if entity.tag == EntityTag::ArmorStand {
            return false;
        }
        if entity.has_custom_name() || entity.tamed || entity.leashed || entity.mounted {
            return false;
        }
        !self.config.whitelist.iter().any(|key| key == &entity.type_key)
    }
}

impl Scanner for ChunkLimiter {
    type State = ChunkScan;
    type Mutation = EntityId;

    fn name(&self) -> &'static str {
        "chunk-limiter"
    }

    fn interval_ticks(&self) -> u64 {
        self.config.scan_interval
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(1000)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> ChunkScan {
        let mut pending = VecDeque::new();
        for world in host.worlds() {
            for pos in host.loaded_chunks(world.id) {
                pending.push_back(ChunkKey {
                    world: world.id,
                    pos,
                });
            }
        }
        ChunkScan {
            pending,
            overfull: Vec::new(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut ChunkScan,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        while let Some(key) = state.pending.pop_front() {
            let entities = host.entities_in_chunk(key);
            if entities.len() > self.config.max_entities_per_chunk as usize {
                state.overfull.push(OverfullChunk {
                    key,
                    total: entities.len(),
                    entities,
                });
            }
            if clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: ChunkScan) -> Vec<EntityId> {
        let max = self.config.max_entities_per_chunk as usize;
        let mut removals = Vec::new();
        for chunk in state.overfull {
            let excess = chunk.total - max;
            let mut removable: Vec<&EntityView> = chunk
                .entities
                .iter()
                .filter(|e| self.is_removable(e))
                .collect();
            removable.sort_by_key(|e| (e.tag.removal_rank(), e.id));
            let taken = removable.len().min(excess);
            debug!(
                chunk = %chunk.key,
                total = chunk.total,
                excess,
                taken,
                "chunk over entity limit"
            );
            removals.extend(removable[..taken].iter().map(|e| e.id));
        }
        removals
    }

    fn apply(&self, host: &dyn HostAdapter, id: EntityId) {
        // The entity may have moved or despawned since the snapshot.
        if host.entity(id).is_some() {
            let _ = host.remove_entity(id);
        }
    }
}
