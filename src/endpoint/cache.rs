/*!
 * Local Result Cache
 * Results of executed inbound calls, kept for reference substitution
 */

use crate::core::types::CallId;
use crate::protocol::Value;
use ahash::AHashMap;
use std::collections::VecDeque;

/// Bounded map from call id to the last result computed for it
///
/// Oldest entries are pruned first. Re-inserting an id after call-id
/// wraparound replaces the value and makes the entry the newest.
#[derive(Debug)]
pub(crate) struct ResultCache {
    capacity: usize,
    entries: AHashMap<CallId, (u64, Value)>,
    order: VecDeque<(CallId, u64)>,
    seq: u64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: AHashMap::new(),
            order: VecDeque::new(),
            seq: 0,
        }
    }

    pub fn insert(&mut self, call_id: CallId, value: Value) {
        if self.capacity == 0 {
            return;
        }

        self.seq += 1;
        self.entries.insert(call_id, (self.seq, value));
        self.order.push_back((call_id, self.seq));

        while self.entries.len() > self.capacity {
            let Some((id, seq)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&id).is_some_and(|(s, _)| *s == seq) {
                self.entries.remove(&id);
            }
        }

        // Overwrites leave stale order entries behind
        if self.order.len() > self.capacity.saturating_mul(2) {
            let entries = &self.entries;
            self.order
                .retain(|(id, seq)| entries.get(id).is_some_and(|(s, _)| s == seq));
        }
    }

    /// Forget the result for `call_id`; its order entry is skipped once stale
    pub fn remove(&mut self, call_id: CallId) -> Option<Value> {
        self.entries.remove(&call_id).map(|(_, value)| value)
    }

    pub fn get(&self, call_id: CallId) -> Option<&Value> {
        self.entries.get(&call_id).map(|(_, value)| value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
