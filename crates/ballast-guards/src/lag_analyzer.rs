//! On-demand lag-source attribution.
//!
//! Requested by the threshold engine when TPS falls below the
//! auto-analyze cutoff. The snapshot counts entities, types, chunk
//! densities, and loaded chunks per world plus scheduled-task counts
//! per external plugin; analysis turns those into ranked sources and
//! the dispatch phase hands admins a compact report. Loaded-chunk
//! counts from the previous run feed the chunk-rate source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_core::host::HostAdapter;
use ballast_core::id::{ChunkPos, WorldId};
use ballast_core::time::Clock;
use ballast_engine::Scanner;
use indexmap::IndexMap;
use tracing::debug;

/// A world's total entity count at or above this is a source.
const WORLD_ENTITY_WARN: u64 = 2_000;

/// A single type's count at or above this is a source.
const TYPE_MINOR_WARN: u64 = 250;

/// Types reported per world, at most.
const TYPE_TOP_N: usize = 3;

/// A chunk holding at least this many entities is a density source.
const CHUNK_DENSITY_WARN: u64 = 50;

/// A world's loaded chunk count at or above this is a source.
const CHUNK_COUNT_WARN: u64 = 3_000;

/// Loaded-chunk growth (chunks per second) at or above this is a
/// source.
const CHUNK_RATE_WARN: f64 = 25.0;

/// A plugin's scheduled-task count at or above this is a source.
const PLUGIN_TASK_WARN: u64 = 500;

/// Sources listed in one report, at most.
const REPORT_TOP_N: usize = 5;

/// One attributed lag source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LagSource {
    /// Source category (entity-overload, entity-type, entity-density,
    /// chunk-overload, chunk-rate, plugin-tasks).
    pub kind: &'static str,
    /// Human-readable subject: world, type, chunk, or plugin.
    pub label: String,
    /// The count that ranked it.
    pub count: u64,
}

/// The assembled report, dispatched to admins as one mutation.
#[derive(Clone, Debug)]
pub struct LagReport {
    /// Sources, most significant first.
    pub sources: Vec<LagSource>,
}

struct WorldCounts {
    id: WorldId,
    name: String,
    total_entities: u64,
    loaded_chunks: u64,
    per_type: IndexMap<String, u64>,
    per_chunk: HashMap<u64, u64>,
}

/// Partial snapshot: worlds left to count plus captured counts.
pub struct AnalyzerScan {
    pending: VecDeque<WorldId>,
    worlds: Vec<WorldCounts>,
    plugin_tasks: Vec<(String, u32)>,
    now_ms: u64,
}

/// The lag-source analyzer scanner.
pub struct LagAnalyzer {
    previous_chunks: Mutex<HashMap<WorldId, (u64, u64)>>,
    clock: Arc<dyn Clock>,
}

impl LagAnalyzer {
    /// Create an analyzer.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            previous_chunks: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Scanner for LagAnalyzer {
    type State = AnalyzerScan;
    type Mutation = LagReport;

    fn name(&self) -> &'static str {
        "lag-analyzer"
    }

    fn interval_ticks(&self) -> u64 {
        // On-demand only: the threshold engine triggers it. The
        // cadence matters only if a host chooses to arm it anyway.
        1_200
    }

    fn slice_budget(&self) -> Duration {
        Duration::from_micros(1000)
    }

    fn start_snapshot(&self, host: &dyn HostAdapter) -> AnalyzerScan {
        AnalyzerScan {
            pending: host.worlds().into_iter().map(|w| w.id).collect(),
            worlds: Vec::new(),
            plugin_tasks: host.plugin_task_counts(),
            now_ms: self.clock.now_millis(),
        }
    }

    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut AnalyzerScan,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool {
        while let Some(world) = state.pending.pop_front() {
            let Some(info) = host.world(world) else { continue };
            let mut counts = WorldCounts {
                id: world,
                name: info.name,
                total_entities: 0,
                loaded_chunks: host.loaded_chunks(world).len() as u64,
                per_type: IndexMap::new(),
                per_chunk: HashMap::new(),
            };
            for entity in host.entities(world) {
                counts.total_entities += 1;
                *counts.per_type.entry(entity.type_key.clone()).or_insert(0) += 1;
                let packed = ChunkPos::new(entity.pos.chunk_x(), entity.pos.chunk_z()).packed();
                *counts.per_chunk.entry(packed).or_insert(0) += 1;
            }
            state.worlds.push(counts);
            if clock.now_nanos() >= deadline_nanos {
                break;
            }
        }
        state.pending.is_empty()
    }

    fn analyze(&self, state: AnalyzerScan) -> Vec<LagReport> {
        let mut sources = Vec::new();

        for world in &state.worlds {
            if world.total_entities >= WORLD_ENTITY_WARN {
                sources.push(LagSource {
                    kind: "entity-overload",
                    label: format!("world '{}'", world.name),
                    count: world.total_entities,
                });
            }

            let mut types: Vec<(&String, &u64)> = world
                .per_type
                .iter()
                .filter(|(_, &count)| count >= TYPE_MINOR_WARN)
                .collect();
            types.sort_by(|a, b| b.1.cmp(a.1));
            for (type_key, &count) in types.into_iter().take(TYPE_TOP_N) {
                sources.push(LagSource {
                    kind: "entity-type",
                    label: format!("{type_key} in '{}'", world.name),
                    count,
                });
            }

            for (&packed, &count) in &world.per_chunk {
                if count >= CHUNK_DENSITY_WARN {
                    sources.push(LagSource {
                        kind: "entity-density",
                        label: format!("chunk {} in '{}'", ChunkPos::from_packed(packed), world.name),
                        count,
                    });
                }
            }

            if world.loaded_chunks >= CHUNK_COUNT_WARN {
                sources.push(LagSource {
                    kind: "chunk-overload",
                    label: format!("world '{}'", world.name),
                    count: world.loaded_chunks,
                });
            }
        }

        // Chunk growth rate against the previous run.
        {
            let mut previous = self.previous_chunks.lock().expect("rate store poisoned");
            for world in &state.worlds {
                if let Some(&(then_ms, then_chunks)) = previous.get(&world.id) {
                    let elapsed_s = state.now_ms.saturating_sub(then_ms) as f64 / 1000.0;
                    if elapsed_s > 0.0 {
                        let rate = world.loaded_chunks.saturating_sub(then_chunks) as f64 / elapsed_s;
                        if rate >= CHUNK_RATE_WARN {
                            sources.push(LagSource {
                                kind: "chunk-rate",
                                label: format!("world '{}' (+{rate:.0}/s)", world.name),
                                count: rate as u64,
                            });
                        }
                    }
                }
                previous.insert(world.id, (state.now_ms, world.loaded_chunks));
            }
        }

        for (plugin, count) in &state.plugin_tasks {
            if u64::from(*count) >= PLUGIN_TASK_WARN {
                sources.push(LagSource {
                    kind: "plugin-tasks",
                    label: format!("plugin '{plugin}'"),
                    count: u64::from(*count),
                });
            }
        }

        sources.sort_by(|a, b| b.count.cmp(&a.count));
        debug!(sources = sources.len(), "lag analysis complete");
        vec![LagReport { sources }]
    }

    fn apply(&self, host: &dyn HostAdapter, report: LagReport) {
        if report.sources.is_empty() {
            host.notify_admins("&7[Ballast] Lag analysis: no dominant source found");
            return;
        }
        let mut message = String::from("&6[Ballast] Lag sources:");
        for (rank, source) in report.sources.iter().take(REPORT_TOP_N).enumerate() {
            message.push_str(&format!(
                " {}) {} {} ({})",
                rank + 1,
                source.kind,
                source.label,
                source.count
            ));
        }
        host.notify_admins(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::entity::{EntityTag, Vec3};
    use ballast_test_utils::{typed_entity, ManualClock, MockHost};

    const W: WorldId = WorldId(1);

    fn run_analysis(analyzer: &LagAnalyzer, host: &MockHost) -> LagReport {
        let clock = ManualClock::new();
        let mut state = analyzer.start_snapshot(host);
        while !analyzer.snapshot_step(host, &mut state, u64::MAX, &clock) {}
        analyzer.analyze(state).remove(0)
    }

    fn analyzer_with_clock() -> (LagAnalyzer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (LagAnalyzer::new(clock.clone()), clock)
    }

    #[test]
    fn quiet_world_yields_no_sources() {
        let (analyzer, _) = analyzer_with_clock();
        let host = MockHost::new();
        host.add_world(W, "world");
        host.add_chunks(W, [(0, 0)]);
        assert!(run_analysis(&analyzer, &host).sources.is_empty());
    }

    #[test]
    fn dense_chunk_and_dominant_type_are_reported() {
        let (analyzer, _) = analyzer_with_clock();
        let host = MockHost::new();
        host.add_world(W, "world");
        host.add_chunks(W, [(0, 0)]);
        // 300 zombies piled into chunk (0,0).
        for i in 0..300 {
            host.add_entity(typed_entity(
                i,
                W,
                Vec3::new(4.0, 64.0, 4.0),
                EntityTag::Monster,
                "zombie",
            ));
        }
        let report = run_analysis(&analyzer, &host);
        assert!(report
            .sources
            .iter()
            .any(|s| s.kind == "entity-type" && s.label.contains("zombie")));
        assert!(report.sources.iter().any(|s| s.kind == "entity-density"));
        // Sorted descending by count.
        for pair in report.sources.windows(2) {
            assert!(pair[0].count >= pair[1].count);
        }
    }

    #[test]
    fn chunk_rate_uses_previous_run() {
        let (analyzer, clock) = analyzer_with_clock();
        let host = MockHost::new();
        host.add_world(W, "world");
        host.add_chunks(W, (0..100).map(|i| (i, 0)));
        let first = run_analysis(&analyzer, &host);
        assert!(first.sources.iter().all(|s| s.kind != "chunk-rate"));

        // 400 new chunks in 10 s: 40/s, over the rate threshold.
        clock.advance_millis(10_000);
        host.add_chunks(W, (0..400).map(|i| (i, 1)));
        let second = run_analysis(&analyzer, &host);
        let rate = second
            .sources
            .iter()
            .find(|s| s.kind == "chunk-rate")
            .expect("rate source");
        assert_eq!(rate.count, 40);
    }

    #[test]
    fn plugin_task_floods_are_reported() {
        let (analyzer, _) = analyzer_with_clock();
        let host = MockHost::new();
        host.add_world(W, "world");
        host.set_plugin_tasks(vec![
            ("QuietPlugin".to_string(), 3),
            ("TaskStorm".to_string(), 900),
        ]);
        let report = run_analysis(&analyzer, &host);
        assert_eq!(report.sources.len(), 1);
        assert!(report.sources[0].label.contains("TaskStorm"));
    }

    #[test]
    fn report_dispatch_caps_the_line_length() {
        let (analyzer, _) = analyzer_with_clock();
        let host = MockHost::new();
        host.add_world(W, "world");
        let sources = (0..10)
            .map(|i| LagSource {
                kind: "entity-type",
                label: format!("type-{i}"),
                count: 1000 - i,
            })
            .collect();
        analyzer.apply(&host, LagReport { sources });
        let notices = host.admin_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("1)"));
        assert!(notices[0].contains("5)"));
        assert!(!notices[0].contains("6)"));
    }
}
