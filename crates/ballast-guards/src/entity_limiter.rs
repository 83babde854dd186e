//! Per-world per-type population limits with farthest-first eviction.
//!
//! Groups every non-player entity by type, resolves the limit as
//! specific type → first matching category → global default, and
//! removes the entities farthest from any player until the group fits.
//! Enforcement overrides protection: a named or tamed entity still
//! counts and can still be culled (the limits exist to stop grief
//! farms, which name their stock precisely to dodge cleanup).

use std::collections::VecDeque;
use std::time::Duration;

use ballast_core::config::EntityLimitsConfig;
use ballast_core::entity::{EntityView, Vec3};
use ballast_core::host::HostAdapter;
use ballast_core::id::{EntityId, WorldId};
use ballast_core::time::Clock;
use ballast_engine::Scanner;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::limits;

/// One world captured at snapshot time.
struct WorldSample {
    id: WorldId,
    players: Vec<Vec3>,
    entities: Vec<EntityView>,
}

/// Partial snapshot: worlds left to visit plus captured samples.
pub struct LimitScan {
    pending: VecDeque<WorldId>,
    worlds: Vec<WorldSample>,
}

/// The per-world entity limiter scanner.
pub struct EntityLimiter {
    config: EntityLimitsConfig,
}

impl EntityLimiter {
    /// Create a limiter from its module config.
    pub fn new(config: EntityLimitsConfig) -> Self {
        Self { config }
    }

    fn limit_for(&self, entity: &EntityView) -> i64 {
        limits::lookup(
            &self.config.per_world_limit.types,
            &entity.type_key,
            entity.tag,
        )
        .unwrap_or(self.config.per_world_limit.default)
    }
}

impl Scanner for EntityLimiter {
    type State = LimitScan;
    type Mutation = EntityId;

    fn name(&self) -> &'static str {
        "entity-limiter"
    }

    fn interval_ticks(&self) -> u64 {
        self.config.check_interval
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(1000)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> LimitScan {
        LimitScan {
            pending: host.worlds().into_iter().map(|w| w.id).collect(),
            worlds: Vec::new(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut LimitScan,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        while let Some(world) = state.pending.pop_front() {
            state.worlds.push(WorldSample {
                id: world,
                players: host.players(world).into_iter().map(|p| p.pos).collect(),
                entities: host.entities(world),
            });
            if clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: LimitScan) -> Vec<EntityId> {
        let mut removals = Vec::new();
        for world in state.worlds {
            let mut groups: IndexMap<&str, Vec<&EntityView>> = IndexMap::new();
            for entity in &world.entities {
                groups.entry(&entity.type_key).or_default().push(entity);
            }

            for (type_key, group) in groups {
                let limit = match group.first() {
                    Some(first) => self.limit_for(first),
                    None => continue,
                };
                if limit < 0 || group.len() <= limit as usize {
                    continue;
                }
                let over = group.len() - limit as usize;

                // Farthest from any player goes first; with no players
                // online every entity is equally far and arrival order
                // decides.
                let mut ranked: Vec<(f64, EntityId)> = group
                    .iter()
                    .map(|e| {
                        let nearest = world
                            .players
                            .iter()
                            .map(|p| e.pos.distance_sq(*p))
                            .fold(f64::INFINITY, f64::min);
                        (nearest, e.id)
                    })
                    .collect();
                ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

                debug!(world = %world.id, type_key, count = group.len(), limit, over, "type over limit");
                removals.extend(ranked[..over].iter().map(|&(_, id)| id));
            }
        }
        if !removals.is_empty() {
            info!(count = removals.len(), "entity limit enforcement planned");
        }
        removals
    }

    fn apply(&self, host: &dyn HostAdapter, id: EntityId) {
        if host.entity(id).is_some() {
            let _ = host.remove_entity(id);
        }
    }
}
