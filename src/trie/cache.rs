//! Bounded LRU memo of match results keyed by the raw channel string.
//!
//! マッチ結果のLRUメモ（生チャネル文字列キー）

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap as Map;

use crate::trie::RouteMatch;

/// A cached outcome: `None` is an explicit negative ("no match") entry.
type CachedMatch = Option<Arc<RouteMatch>>;

struct Slot {
    value: CachedMatch,
    stamp: u64,
}

/// Strict-capacity LRU cache.
///
/// Recency is tracked with a stamp queue instead of a linked list: every
/// touch pushes `(key, stamp)` and bumps the slot's stamp, so stale queue
/// entries become ghosts that eviction skips. Get/put stay O(1) amortized
/// with no scan of the live map.
pub struct MatchCache {
    capacity: usize,
    map: Map<Box<str>, Slot>,
    order: VecDeque<(Box<str>, u64)>,
    stamp: u64,
}

impl MatchCache {
    pub fn new(capacity: usize) -> MatchCache {
        MatchCache {
            capacity: capacity.max(1),
            map: Map::default(),
            order: VecDeque::new(),
            stamp: 0,
        }
    }

    /// Look up a channel, refreshing its recency on hit.
    pub fn get(&mut self, channel: &str) -> Option<CachedMatch> {
        self.stamp += 1;
        let stamp = self.stamp;
        let slot = self.map.get_mut(channel)?;
        slot.stamp = stamp;
        let value = slot.value.clone();
        self.order.push_back((channel.into(), stamp));
        self.compact_ghosts();
        Some(value)
    }

    /// Memoize a match outcome (positive or negative), evicting the
    /// least-recently-touched entry when over capacity.
    pub fn put(&mut self, channel: &str, value: CachedMatch) {
        self.stamp += 1;
        let stamp = self.stamp;
        self.map.insert(channel.into(), Slot { value, stamp });
        self.order.push_back((channel.into(), stamp));

        while self.map.len() > self.capacity {
            let (key, stamp) = match self.order.pop_front() {
                Some(front) => front,
                None => break,
            };
            // ghost entry unless the stamp still names the live slot
            if self.map.get(&key).is_some_and(|slot| slot.stamp == stamp) {
                self.map.remove(&key);
            }
        }
        self.compact_ghosts();
    }

    /// Repeated touches leave ghost stamps behind; rebuild the queue once
    /// it outgrows the live map by a wide margin.
    fn compact_ghosts(&mut self) {
        if self.order.len() <= self.capacity.saturating_mul(8) {
            return;
        }
        let map = &self.map;
        self.order
            .retain(|(key, stamp)| map.get(key).is_some_and(|slot| slot.stamp == *stamp));
    }

    /// Drop everything. Called on every structural trie mutation.
    ///
    /// 全クリア（トライ構造の変更時に呼ぶ）
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
