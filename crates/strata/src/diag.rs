//! Diagnostics snapshot.
//!
//! Enabled by the `diagnostics` feature flag. [`Runtime::diagnostics`]
//! gathers a [`DiagSnapshot`] of the most recent tick: entity pool usage,
//! every live query cache, every event channel and per-system timings. It
//! serializes to JSON for logging or shipping to an external viewer.
//!
//! [`Runtime::diagnostics`]: crate::runtime::Runtime::diagnostics

use serde::Serialize;

use crate::ecs::World;
use crate::error::Result;
use crate::event::EventBus;
use crate::runtime::RuntimeStatus;
use crate::schedule::SystemTiming;

#[derive(Debug, Clone, Serialize)]
pub struct DiagSnapshot {
    pub status: RuntimeStatus,
    pub cycle: u64,
    pub entity_pool: EntityPoolSnapshot,
    pub component_types: usize,
    pub component_capacity: usize,
    pub queries: Vec<QuerySnapshot>,
    pub channels: Vec<ChannelSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_timings: Vec<SystemTiming>,
    /// Sum of all system timings, in microseconds.
    pub systems_us: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityPoolSnapshot {
    pub total_slots: usize,
    pub alive_count: usize,
    pub free_count: usize,
    /// Number of disjoint free ranges. 1 means no fragmentation.
    pub free_ranges: usize,
    pub spawned_this_tick: u32,
    pub despawned_this_tick: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySnapshot {
    pub id: usize,
    pub items: Vec<String>,
    pub filter_count: usize,
    pub match_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub committed: usize,
    pub pending: usize,
}

impl DiagSnapshot {
    pub(crate) fn capture(
        status: RuntimeStatus,
        cycle: u64,
        world: &World,
        events: &EventBus,
        timings: &[SystemTiming],
        (spawned, despawned): (u32, u32),
    ) -> Self {
        let allocator = world.entities().allocator();
        let entity_pool = EntityPoolSnapshot {
            total_slots: allocator.capacity(),
            alive_count: world.entity_count(),
            free_count: allocator.free_count(),
            free_ranges: allocator.block_count(),
            spawned_this_tick: spawned,
            despawned_this_tick: despawned,
        };

        let cache = world.query_cache();
        let queries = cache
            .ids()
            .map(|id| {
                let descriptor = cache.descriptor(id);
                QuerySnapshot {
                    id: id.index(),
                    items: descriptor.items.iter().map(|i| format!("{i:?}")).collect(),
                    filter_count: descriptor.filters.len(),
                    match_count: cache.matches(id).len(),
                }
            })
            .collect();

        let channels = events
            .stats()
            .into_iter()
            .map(|c| ChannelSnapshot {
                name: c.name.to_string(),
                committed: c.committed,
                pending: c.pending,
            })
            .collect();

        Self {
            status,
            cycle,
            entity_pool,
            component_types: world.components().type_count(),
            component_capacity: world.components().capacity(),
            queries,
            channels,
            system_timings: timings.to_vec(),
            systems_us: timings.iter().map(|t| t.duration_us).sum(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::app::App;
    use crate::context::Context;
    use crate::ecs::{Component, with};
    use crate::error::Result;

    struct Pos;
    impl Component for Pos {}

    struct Bump;

    fn spawn_one(ctx: &mut Context<'_>) -> Result<()> {
        ctx.spawn((Pos,))?;
        ctx.dispatch(Bump)?;
        ctx.query::<&Pos>([with::<Pos>()])?;
        Ok(())
    }

    #[test]
    fn snapshot_reflects_last_tick() {
        let mut runtime = App::new()
            .component::<Pos>()
            .event::<Bump>()
            .update(spawn_one)
            .build()
            .unwrap();
        runtime.start_blocking().unwrap();
        runtime.tick(Duration::ZERO).unwrap();
        runtime.tick(Duration::ZERO).unwrap();

        let snapshot = runtime.diagnostics();
        assert_eq!(snapshot.cycle, 2);
        assert_eq!(snapshot.entity_pool.alive_count, 2);
        assert_eq!(snapshot.entity_pool.spawned_this_tick, 1);
        assert_eq!(snapshot.queries.len(), 1);
        assert_eq!(snapshot.queries[0].match_count, 2);
        assert_eq!(snapshot.channels[0].committed, 1);
        assert_eq!(snapshot.channels[0].pending, 1);
        assert_eq!(snapshot.system_timings.len(), 1);
        assert_eq!(snapshot.system_timings[0].name, "spawn_one");

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"alive_count\":2"));
        assert!(json.contains("\"status\":\"Running\""));
    }

    fn spawn_at_startup(ctx: &mut Context<'_>) -> Result<()> {
        ctx.spawn((Pos,))?;
        ctx.spawn((Pos,))?;
        Ok(())
    }

    #[test]
    fn counters_cover_only_the_tick_itself() {
        let mut runtime = App::new()
            .component::<Pos>()
            .event::<Bump>()
            .startup(spawn_at_startup)
            .update(spawn_one)
            .build()
            .unwrap();
        runtime.start_blocking().unwrap();
        let stray = runtime.world_mut().spawn((Pos,)).unwrap();
        runtime.world_mut().destroy(stray).unwrap();

        runtime.tick(Duration::ZERO).unwrap();

        let snapshot = runtime.diagnostics();
        assert_eq!(snapshot.entity_pool.alive_count, 3);
        assert_eq!(snapshot.entity_pool.spawned_this_tick, 1);
        assert_eq!(snapshot.entity_pool.despawned_this_tick, 0);

        let pretty = snapshot.to_json_pretty().unwrap();
        assert!(pretty.contains("\n"));
        assert!(pretty.contains("\"spawned_this_tick\": 1"));
    }
}
