// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! File-space state tracker (§4.4): tracks, per open unit, the set of
//! pristine in-memory file-space states (e.g. an FL gap-chain head, a VL
//! end-of-data pointer) so that a rollback can restore them and a commit
//! can persist them.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

/// Identity of a tracked file-space item (e.g. `(table, "fl_gap_head")`).
pub type FileSpaceId = (String, &'static str);

/// A pristine snapshot plus the means to persist or restore it. The
/// snapshot is a pair rather than a single `u64` so that a file-space with
/// two purely in-memory fields (e.g. an FL gap-chain's head + count) can be
/// captured and restored atomically.
pub trait FileSpace: Send + Sync {
	fn id(&self) -> FileSpaceId;
	/// Snapshot the current in-memory value(s).
	fn snapshot(&self) -> (u64, u64);
	/// Persist the current in-memory value to its layout entry.
	fn persist(&self);
	/// Restore the in-memory value(s) from `snapshot`.
	fn restore(&self, snapshot: (u64, u64));
}

struct Tracked {
	space: Arc<dyn FileSpace>,
	pristine: (u64, u64),
}

/// Tracks pristine file-space states across a nested unit stack.
pub struct FileSpaceTracker {
	inner: Mutex<Inner>,
}

struct Inner {
	current: HashMap<FileSpaceId, Tracked>,
	nest_stack: Vec<HashMap<FileSpaceId, Tracked>>,
	stash: HashMap<FileSpaceId, Tracked>,
}

impl FileSpaceTracker {
	pub fn new() -> FileSpaceTracker {
		FileSpaceTracker {
			inner: Mutex::new(Inner { current: HashMap::new(), nest_stack: Vec::new(), stash: HashMap::new() }),
		}
	}

	/// Idempotent by file-space identity: only the first report per unit
	/// (i.e. per nesting level since the last `nest()`) is retained.
	pub fn report_old_state(&self, space: Arc<dyn FileSpace>) {
		let mut inner = self.inner.lock();
		let id = space.id();
		if !inner.current.contains_key(&id) {
			let pristine = space.snapshot();
			inner.current.insert(id, Tracked { space, pristine });
		}
	}

	/// Calls `persist()` on every currently tracked space (used on commit).
	pub fn write_states(&self) {
		let inner = self.inner.lock();
		for tracked in inner.current.values() {
			tracked.space.persist();
		}
	}

	/// Restores every currently tracked space from its pristine snapshot
	/// (used on rollback).
	pub fn adopt_pristine(&self) {
		let inner = self.inner.lock();
		for tracked in inner.current.values() {
			tracked.space.restore(tracked.pristine);
		}
	}

	pub fn clear_pristine(&self) {
		self.inner.lock().current.clear();
	}

	pub fn reset(&self) {
		let mut inner = self.inner.lock();
		inner.current.clear();
		inner.nest_stack.clear();
		inner.stash.clear();
	}

	/// Pushes a snapshot of the current tracked set on `nest()`.
	pub fn nest(&self) {
		let mut inner = self.inner.lock();
		let snapshot = inner.current.clone_map();
		inner.nest_stack.push(snapshot);
	}

	/// On a nested unit's commit: pristine states move into the stash
	/// (merged into the parent's set only when the enclosing unit commits).
	pub fn commit_nested(&self) {
		let mut inner = self.inner.lock();
		if let Some(parent) = inner.nest_stack.pop() {
			let moved: Vec<_> = inner.current.drain().collect();
			for (id, tracked) in moved {
				inner.stash.entry(id).or_insert(tracked);
			}
			inner.current = parent;
		}
	}

	/// On a nested unit's rollback: the stash accumulated at this level is
	/// discarded; the enclosing level's state is restored unchanged.
	pub fn rollback_nested(&self) {
		let mut inner = self.inner.lock();
		if let Some(parent) = inner.nest_stack.pop() {
			inner.current = parent;
		}
	}

	/// Merges the stash into the current set (called when the top-level
	/// unit commits, after all nested commits have contributed to the stash).
	pub fn merge_stash(&self) {
		let mut inner = self.inner.lock();
		let stash: Vec<_> = inner.stash.drain().collect();
		for (id, tracked) in stash {
			inner.current.entry(id).or_insert(tracked);
		}
	}
}

// HashMap doesn't implement Clone when values aren't Clone; Tracked holds an
// Arc<dyn FileSpace> (cloneable) and a plain u64, so provide an explicit
// shallow-clone helper instead of deriving Clone on Inner's map type.
trait CloneMap {
	fn clone_map(&self) -> Self;
}

impl CloneMap for HashMap<FileSpaceId, Tracked> {
	fn clone_map(&self) -> Self {
		self.iter().map(|(k, v)| (k.clone(), Tracked { space: v.space.clone(), pristine: v.pristine })).collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::{AtomicU64, Ordering};

	struct Counter {
		name: &'static str,
		live: AtomicU64,
		persisted: AtomicU64,
	}
	impl FileSpace for Counter {
		fn id(&self) -> FileSpaceId {
			("t".into(), self.name)
		}
		fn snapshot(&self) -> (u64, u64) {
			(self.live.load(Ordering::Relaxed), 0)
		}
		fn persist(&self) {
			self.persisted.store(self.live.load(Ordering::Relaxed), Ordering::Relaxed);
		}
		fn restore(&self, snapshot: (u64, u64)) {
			self.live.store(snapshot.0, Ordering::Relaxed);
		}
	}

	#[test]
	fn report_is_idempotent_and_rollback_restores() {
		let tracker = FileSpaceTracker::new();
		let c = Arc::new(Counter { name: "gap_head", live: AtomicU64::new(5), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c.clone());
		c.live.store(9, Ordering::Relaxed);
		tracker.report_old_state(c.clone()); // no-op, pristine stays 5
		tracker.adopt_pristine();
		assert_eq!(c.live.load(Ordering::Relaxed), 5);
	}

	#[test]
	fn commit_persists() {
		let tracker = FileSpaceTracker::new();
		let c = Arc::new(Counter { name: "eod", live: AtomicU64::new(1), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c.clone());
		c.live.store(42, Ordering::Relaxed);
		tracker.write_states();
		assert_eq!(c.persisted.load(Ordering::Relaxed), 42);
	}

	#[test]
	fn nested_commit_then_outer_commit_persists_stashed_state() {
		let tracker = FileSpaceTracker::new();
		let c = Arc::new(Counter { name: "gap_head", live: AtomicU64::new(1), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c.clone());
		tracker.nest();
		let c2 = Arc::new(Counter { name: "gap_head2", live: AtomicU64::new(10), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c2.clone());
		c2.live.store(20, Ordering::Relaxed);
		tracker.commit_nested(); // c2 moves into the stash, not yet persisted
		assert_eq!(c2.persisted.load(Ordering::Relaxed), 0);
		tracker.merge_stash();
		tracker.write_states();
		assert_eq!(c2.persisted.load(Ordering::Relaxed), 20);
	}

	#[test]
	fn nested_rollback_discards_only_nested_range() {
		let tracker = FileSpaceTracker::new();
		let c = Arc::new(Counter { name: "gap_head", live: AtomicU64::new(1), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c.clone());
		c.live.store(2, Ordering::Relaxed);
		tracker.nest();
		let c2 = Arc::new(Counter { name: "gap_head2", live: AtomicU64::new(10), persisted: AtomicU64::new(0) });
		tracker.report_old_state(c2.clone());
		c2.live.store(20, Ordering::Relaxed);
		tracker.rollback_nested();
		// c2's pristine snapshot from inside the nested unit is gone; the
		// outer unit's tracked state (c) is unaffected.
		tracker.adopt_pristine();
		assert_eq!(c.live.load(Ordering::Relaxed), 1);
	}
}
