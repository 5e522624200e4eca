use crate::partition::Partitioner;
use crate::stats::Stats;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

pub type StatsMap = FxHashMap<String, Stats>;

/// Apply one observation to a map, creating the entry on first sight of the key.
#[inline]
pub(crate) fn observe_into(map: &mut StatsMap, key: &str, value: f64) {
    match map.get_mut(key) {
        Some(stats) => stats.observe(value),
        None => {
            map.insert(key.to_owned(), Stats::new(value));
        }
    }
}

#[derive(Debug, Default)]
struct Shard {
    stats: Mutex<StatsMap>,
}

/// Fixed array of independently locked shards shared by every worker.
///
/// A key lives in exactly one shard, chosen by the partitioner, for the lifetime of the table.
/// Each update holds a single shard's lock and never takes a second one.
#[derive(Debug)]
pub struct ShardedTable {
    shards: Vec<Shard>,
    partitioner: Partitioner,
}

impl ShardedTable {
    pub fn new(shard_count: usize) -> Self {
        let partitioner = Partitioner::new(shard_count);
        let shards = (0..partitioner.shard_count())
            .map(|_| Shard::default())
            .collect();
        Self {
            shards,
            partitioner,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    #[inline]
    pub fn observe(&self, key: &str, value: f64) {
        let shard = &self.shards[self.partitioner.shard_for(key)];
        let mut stats = shard.stats.lock();
        observe_into(&mut stats, key, value);
    }

    /// Number of distinct keys held by one shard.
    pub fn shard_len(&self, shard_id: usize) -> usize {
        self.shards
            .get(shard_id)
            .map_or(0, |shard| shard.stats.lock().len())
    }

    /// Number of distinct keys across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.stats.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the table, yielding each shard's map in shard order.
    pub fn into_shards(self) -> impl Iterator<Item = StatsMap> {
        self.shards.into_iter().map(|shard| shard.stats.into_inner())
    }
}

/// Unsynchronized table owned by a single worker.
#[derive(Debug, Default)]
pub struct LocalTable {
    stats: StatsMap,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn observe(&mut self, key: &str, value: f64) {
        observe_into(&mut self.stats, key, value);
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

    pub fn into_inner(self) -> StatsMap {
        self.stats
    }
}
