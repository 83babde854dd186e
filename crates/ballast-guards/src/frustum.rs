//! View-cone mob AI culling.
//!
//! Mobs nobody can see don't need to think. The snapshot collects each
//! player's eye position and look vector plus the unprotected mobs
//! within the active radius; analysis keeps AI on any mob inside a
//! player's cone or behind-safe bubble and disables the rest. Only
//! transitions dispatch, and each one revalidates the entity on the
//! main thread before flipping it.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use ballast_core::config::MobAiConfig;
use ballast_core::entity::{EntityView, PlayerView, Vec3};
use ballast_core::host::HostAdapter;
use ballast_core::id::{EntityId, WorldId};
use ballast_core::time::Clock;
use ballast_engine::Scanner;
use tracing::debug;

/// Players processed per snapshot slice, independent of the time
/// budget.
const PLAYERS_PER_SLICE: usize = 5;

/// A mob candidate captured at snapshot time.
#[derive(Clone, Debug)]
struct MobSample {
    id: EntityId,
    world: WorldId,
    pos: Vec3,
    aware: bool,
}

/// Partial snapshot: players still to visit, plus everything captured
/// so far.
pub struct CullSnapshot {
    pending: VecDeque<PlayerView>,
    players: Vec<PlayerView>,
    mobs: Vec<MobSample>,
    seen: HashSet<EntityId>,
}

/// An AI transition keyed by entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AiTransition {
    /// Target entity.
    pub id: EntityId,
    /// Desired awareness.
    pub aware: bool,
}

/// The frustum culler scanner.
pub struct FrustumCuller {
    config: MobAiConfig,
    cos_half_fov: f64,
}

impl FrustumCuller {
    /// Create a culler from its module config.
    pub fn new(config: MobAiConfig) -> Self {
        let cos_half_fov = (config.fov_degrees.to_radians() / 2.0).cos();
        Self {
            config,
            cos_half_fov,
        }
    }

    fn is_protected(&self, entity: &EntityView) -> bool {
        entity.has_custom_name()
            || entity.tamed
            || self
                .config
                .protected
                .iter()
                .any(|key| key == &entity.type_key)
    }

    /// Whether any player keeps this mob visible.
    fn keeps_awareness(&self, mob: &MobSample, players: &[PlayerView]) -> bool {
        for player in players {
            if player.world != mob.world {
                continue;
            }
            let offset = mob.pos.sub(player.eye_pos);
            let dist_sq = offset.length_sq();
            if dist_sq > self.config.active_radius * self.config.active_radius {
                continue;
            }
            if dist_sq < self.config.behind_safe_radius * self.config.behind_safe_radius {
                return true;
            }
            match offset.normalized() {
                // A mob exactly at the eye point has no direction;
                // treat it as visible.
                None => return true,
                Some(direction) => {
                    if direction.dot(player.look_dir) >= self.cos_half_fov {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl Scanner for FrustumCuller {
    type State = CullSnapshot;
    type Mutation = AiTransition;

    fn name(&self) -> &'static str {
        "frustum-culler"
    }

    fn interval_ticks(&self) -> u64 {
        self.config.update_interval
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(500)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> CullSnapshot {
        let mut pending = VecDeque::new();
        for world in host.worlds() {
            pending.extend(host.players(world.id));
        }
        CullSnapshot {
            pending,
            players: Vec::new(),
            mobs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut CullSnapshot,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        let mut processed = 0;
        while let Some(player) = state.pending.pop_front() {
            for entity in host.entities_near(player.world, player.pos, self.config.active_radius) {
                if !entity.tag.is_living() || self.is_protected(&entity) {
                    continue;
                }
                if state.seen.insert(entity.id) {
                    state.mobs.push(MobSample {
                        id: entity.id,
                        world: entity.world,
                        pos: entity.pos,
                        aware: entity.aware,
                    });
                }
            }
            state.players.push(player);

            processed += 1;
            if processed == PLAYERS_PER_SLICE || clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: CullSnapshot) -> Vec<AiTransition> {
        let mut transitions = Vec::new();
        for mob in &state.mobs {
            let keep = self.keeps_awareness(mob, &state.players);
            if mob.aware && !keep {
                transitions.push(AiTransition {
                    id: mob.id,
                    aware: false,
                });
            } else if !mob.aware && keep {
                transitions.push(AiTransition {
                    id: mob.id,
                    aware: true,
                });
            }
        }
        debug!(
            mobs = state.mobs.len(),
            transitions = transitions.len(),
            "frustum analysis complete"
        );
        transitions
    }

    fn apply(&self, host: &dyn HostAdapter, mutation: AiTransition) {
        // Revalidate: the mob may have despawned or changed hands
        // since the snapshot.
        let Some(current) = host.entity(mutation.id) else {
            return;
        };
        if self.is_protected(&current) {
            return;
        }
        let _ = host.set_entity_aware(mutation.id, mutation.aware);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::entity::EntityTag;
    use ballast_test_utils::{entity, player, MockHost};
    use std::sync::Arc;

    const W: WorldId = WorldId(1);

    fn culler() -> FrustumCuller {
        FrustumCuller::new(MobAiConfig {
            enabled: true,
            active_radius: 48.0,
            fov_degrees: 120.0,
            behind_safe_radius: 8.0,
            update_interval: 40,
            protected: vec!["villager".to_string()],
        })
    }

    fn host_with_player_at_origin() -> Arc<MockHost> {
        let host = Arc::new(MockHost::new());
        host.add_world(W, "world");
        // Player at origin looking along +X.
        host.add_player(player(100, W, Vec3::new(0.0, 64.0, 0.0), Vec3::new(1.0, 0.0, 0.0)));
        host
    }

    fn run_cycle(culler: &FrustumCuller, host: &MockHost) -> Vec<AiTransition> {
        let mut state = culler.start_snapshot(host);
        let clock = ballast_test_utils::ManualClock::new();
        while !culler.snapshot_step(host, &mut state, u64::MAX, &clock) {}
        culler.analyze(state)
    }

    #[test]
    fn mob_in_cone_keeps_ai() {
        let host = host_with_player_at_origin();
        // Dead ahead at eye height.
        let mut mob = entity(1, W, Vec3::new(20.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = true;
        host.add_entity(mob);
        assert!(run_cycle(&culler(), &host).is_empty());
    }

    #[test]
    fn mob_behind_player_is_disabled() {
        let host = host_with_player_at_origin();
        let mut mob = entity(1, W, Vec3::new(-20.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = true;
        host.add_entity(mob);
        assert_eq!(
            run_cycle(&culler(), &host),
            vec![AiTransition {
                id: EntityId(1),
                aware: false
            }]
        );
    }

    #[test]
    fn mob_inside_behind_safe_radius_stays_aware() {
        let host = host_with_player_at_origin();
        // Behind the player but within 8 blocks.
        let mut mob = entity(1, W, Vec3::new(-4.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = true;
        host.add_entity(mob);
        assert!(run_cycle(&culler(), &host).is_empty());
    }

    #[test]
    fn unaware_mob_entering_cone_is_reenabled() {
        let host = host_with_player_at_origin();
        let mut mob = entity(1, W, Vec3::new(20.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = false;
        host.add_entity(mob);
        assert_eq!(
            run_cycle(&culler(), &host),
            vec![AiTransition {
                id: EntityId(1),
                aware: true
            }]
        );
    }

    #[test]
    fn protected_named_and_tamed_mobs_are_not_scanned() {
        let host = host_with_player_at_origin();
        let behind = Vec3::new(-20.0, 65.6, 0.0);
        let mut named = entity(1, W, behind, EntityTag::Monster);
        named.custom_name = Some("Boss".to_string());
        host.add_entity(named);
        let mut tamed = entity(2, W, behind, EntityTag::Tameable);
        tamed.tamed = true;
        host.add_entity(tamed);
        host.add_entity(entity(3, W, behind, EntityTag::Villager));
        assert!(run_cycle(&culler(), &host).is_empty());
    }

    #[test]
    fn items_are_ignored() {
        let host = host_with_player_at_origin();
        host.add_entity(entity(1, W, Vec3::new(-20.0, 65.6, 0.0), EntityTag::Item));
        assert!(run_cycle(&culler(), &host).is_empty());
    }

    #[test]
    fn mob_at_eye_point_counts_as_visible() {
        let host = host_with_player_at_origin();
        let c = FrustumCuller::new(MobAiConfig {
            enabled: true,
            active_radius: 48.0,
            fov_degrees: 120.0,
            behind_safe_radius: 0.0,
            update_interval: 40,
            protected: Vec::new(),
        });
        let mut mob = entity(1, W, Vec3::new(0.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = true;
        host.add_entity(mob);
        assert!(run_cycle(&c, &host).is_empty());
    }

    #[test]
    fn any_of_several_players_can_keep_a_mob_aware() {
        let host = host_with_player_at_origin();
        // Second player behind the mob, looking at it.
        host.add_player(player(
            101,
            W,
            Vec3::new(-40.0, 64.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ));
        let mut mob = entity(1, W, Vec3::new(-20.0, 65.6, 0.0), EntityTag::Monster);
        mob.aware = true;
        host.add_entity(mob);
        // Out of player 100's cone but inside player 101's.
        assert!(run_cycle(&culler(), &host).is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// A mob within the behind-safe radius of any player is
            /// never transitioned to unaware, wherever it sits and
            /// wherever the player looks.
            #[test]
            fn behind_safe_radius_mobs_never_lose_ai(
                offset in (-7.0f64..7.0, -1.0f64..1.0, -7.0f64..7.0),
                look in (-1.0f64..1.0, -1.0f64..1.0, -1.0f64..1.0),
            ) {
                let mob_offset = Vec3::new(offset.0, offset.1, offset.2);
                prop_assume!(mob_offset.length() < 8.0);

                let host = MockHost::new();
                host.add_world(W, "world");
                host.add_player(player(
                    100,
                    W,
                    Vec3::new(0.0, 64.0, 0.0),
                    Vec3::new(look.0, look.1, look.2),
                ));
                let eye = Vec3::new(0.0, 65.6, 0.0);
                let mut mob = entity(
                    1,
                    W,
                    Vec3::new(eye.x + mob_offset.x, eye.y + mob_offset.y, eye.z + mob_offset.z),
                    EntityTag::Monster,
                );
                mob.aware = true;
                host.add_entity(mob);

                let transitions = run_cycle(&culler(), &host);
                prop_assert!(
                    !transitions.iter().any(|t| !t.aware),
                    "mob inside the safe bubble was disabled: {transitions:?}"
                );
            }
        }
    }

    #[test]
    fn snapshot_slices_by_player_quota() {
        let host = Arc::new(MockHost::new());
        host.add_world(W, "world");
        for i in 0..12 {
            host.add_player(player(
                100 + i,
                W,
                Vec3::new(i as f64 * 100.0, 64.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
            ));
        }
        let c = culler();
        let clock = ballast_test_utils::ManualClock::new();
        let mut state = c.start_snapshot(&*host);
        assert!(!c.snapshot_step(&*host, &mut state, u64::MAX, &clock));
        assert_eq!(state.players.len(), 5);
        assert!(!c.snapshot_step(&*host, &mut state, u64::MAX, &clock));
        assert_eq!(state.players.len(), 10);
        assert!(c.snapshot_step(&*host, &mut state, u64::MAX, &clock));
        assert_eq!(state.players.len(), 12);
    }
}
