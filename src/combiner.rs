use crate::shard::{LocalTable, ShardedTable, StatsMap};
use crate::stats::Stats;
use std::collections::hash_map::Entry;
use tracing::debug;

/// Merged per-key statistics for a whole run. Read-only once built.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FinalMapping {
    stats: StatsMap,
}

impl FinalMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a partial summary for `key` into the mapping.
    pub fn absorb(&mut self, key: String, stats: Stats) {
        match self.stats.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(&stats),
            Entry::Vacant(slot) => {
                slot.insert(stats);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Stats> {
        self.stats.get(key)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Stats)> {
        self.stats.iter().map(|(key, stats)| (key.as_str(), stats))
    }

    /// Entries in ascending byte-wise key order.
    pub fn sorted(&self) -> Vec<(&str, &Stats)> {
        let mut entries: Vec<(&str, &Stats)> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        entries
    }
}

impl FromIterator<(String, Stats)> for FinalMapping {
    fn from_iter<I: IntoIterator<Item = (String, Stats)>>(iter: I) -> Self {
        let mut mapping = FinalMapping::new();
        for (key, stats) in iter {
            mapping.absorb(key, stats);
        }
        mapping
    }
}

/// Union of all shards. Taking the table by value means no worker can still be writing to it.
pub fn combine_shards(table: ShardedTable) -> FinalMapping {
    let shard_count = table.shard_count();
    let mut stats = StatsMap::default();
    for shard in table.into_shards() {
        for (key, entry) in shard {
            let previous = stats.insert(key, entry);
            debug_assert!(previous.is_none(), "key routed to more than one shard");
        }
    }
    debug!(shards = shard_count, keys = stats.len(), "combined shards");
    FinalMapping { stats }
}

/// Per-key merge of worker-local tables. The same key may appear in any number of them.
pub fn combine_partials<I>(tables: I) -> FinalMapping
where
    I: IntoIterator<Item = LocalTable>,
{
    let mut mapping = FinalMapping::new();
    let mut partials = 0usize;
    for table in tables {
        partials += 1;
        for (key, stats) in table.into_inner() {
            mapping.absorb(key, stats);
        }
    }
    debug!(partials, keys = mapping.len(), "combined worker-local tables");
    mapping
}
