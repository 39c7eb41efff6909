// Copyright 2026 The Webserv Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Callback fired when a timer expires. Each callback is fired at most once.
pub type ExpireCallback = Box<dyn FnMut() + Send>;

/// One timer node per live connection with a positive idle timeout.
struct TimerNode {
	id: i32,
	expires: Instant,
	callback: ExpireCallback,
}

/// An array backed binary min-heap of timers, plus a mapping from timer id to
/// heap slot so that refresh and removal are O(log n). The mapping is kept
/// consistent with every swap. Parent index of x is (x - 1) / 2, children are
/// 2x + 1 and 2x + 2.
pub struct TimerManager {
	heap: Vec<TimerNode>,
	slots: HashMap<i32, usize>,
}

impl TimerManager {
	pub fn new() -> Self {
		let mut heap = Vec::new();
		heap.reserve(128);
		TimerManager {
			heap,
			slots: HashMap::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}

	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}

	/// Insert a timer for `id`, or refresh its expiry and callback if one is
	/// already scheduled. The refreshed node is sifted in both directions
	/// since the new expiry may be later or earlier than the old one.
	pub fn schedule(&mut self, id: i32, timeout_millis: u64, callback: ExpireCallback) {
		let expires = Instant::now() + Duration::from_millis(timeout_millis);
		match self.slots.get(&id) {
			Some(&i) => {
				self.heap[i].expires = expires;
				self.heap[i].callback = callback;
				self.sift_up(i);
				let i = self.slots[&id];
				self.sift_down(i);
			}
			None => {
				let i = self.heap.len();
				self.slots.insert(id, i);
				self.heap.push(TimerNode {
					id,
					expires,
					callback,
				});
				self.sift_up(i);
			}
		}
	}

	/// Refresh the expiry for an existing timer. Activity always extends the
	/// deadline so the node only needs to sift downward. Unknown ids are
	/// ignored; a readiness event can be harvested in the same poll batch
	/// that removed the timer.
	pub fn touch(&mut self, id: i32, timeout_millis: u64) {
		if let Some(&i) = self.slots.get(&id) {
			self.heap[i].expires = Instant::now() + Duration::from_millis(timeout_millis);
			self.sift_down(i);
		}
	}

	/// Remove the timer for `id` without firing its callback.
	pub fn cancel(&mut self, id: i32) {
		if let Some(&i) = self.slots.get(&id) {
			let _ = self.remove_at(i);
		}
	}

	/// Remove the root node without firing its callback.
	pub fn pop(&mut self) {
		let _ = self.remove_at(0);
	}

	/// Remove every node whose expiry is at or before `now` and return their
	/// callbacks in expiry order. The nodes leave the heap before any
	/// callback runs, so each fires at most once and a `cancel` issued from
	/// inside a callback is a no-op for the node being fired.
	pub fn take_expired(&mut self, now: Instant) -> Vec<ExpireCallback> {
		let mut expired = vec![];
		while let Some(root) = self.heap.first() {
			if root.expires > now {
				// heap order guarantees all remaining nodes are later
				break;
			}
			match self.remove_at(0) {
				Some(node) => expired.push(node.callback),
				None => break,
			}
		}
		expired
	}

	/// Milliseconds until the soonest expiry, clamped non-negative, or `None`
	/// when no timer is scheduled. Callers reap expired timers first via
	/// [`TimerManager::take_expired`].
	pub fn next_deadline_ms(&self, now: Instant) -> Option<u64> {
		self.heap
			.first()
			.map(|node| node.expires.saturating_duration_since(now).as_millis() as u64)
	}

	pub fn clear(&mut self) {
		self.heap.clear();
		self.slots.clear();
	}

	fn swap_nodes(&mut self, i: usize, j: usize) {
		self.heap.swap(i, j);
		self.slots.insert(self.heap[i].id, i);
		self.slots.insert(self.heap[j].id, j);
	}

	fn sift_up(&mut self, mut i: usize) {
		while i > 0 {
			let parent = (i - 1) / 2;
			if self.heap[parent].expires <= self.heap[i].expires {
				break;
			}
			self.swap_nodes(i, parent);
			i = parent;
		}
	}

	fn sift_down(&mut self, mut i: usize) {
		let n = self.heap.len();
		let mut j = 2 * i + 1;
		while j < n {
			if j + 1 < n && self.heap[j + 1].expires < self.heap[j].expires {
				j += 1;
			}
			if self.heap[i].expires <= self.heap[j].expires {
				break;
			}
			self.swap_nodes(i, j);
			i = j;
			j = 2 * i + 1;
		}
	}

	/// Swap with the last node, shrink, then re-sift in both directions.
	fn remove_at(&mut self, i: usize) -> Option<TimerNode> {
		if i >= self.heap.len() {
			return None;
		}
		let last = self.heap.len() - 1;
		self.swap_nodes(i, last);
		let node = self.heap.pop()?;
		self.slots.remove(&node.id);
		if i < self.heap.len() {
			self.sift_up(i);
			let i = self.slots[&self.heap[i].id];
			self.sift_down(i);
		}
		Some(node)
	}
}
