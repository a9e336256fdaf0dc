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

//! Database facade (§9): ties the layout file, recorder, file-space tracker,
//! synchronization manager and table registry together behind one open
//! handle, in either the WR (writable) or RO (read-only) flavor.
//!
//! A WR database is a directory holding a `layout` text file alongside the
//! recorder's rec file and each table's FL/VL files (§6). An RO database is
//! a single packed file (§4.9); `Database::open` tells the two apart by
//! whether `path` names a directory or a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::Mutex;
use log::{debug, trace};
use crate::crypto::{self, CipherFactory, CryptoProvider};
use crate::convert;
use crate::error::{Error, Result};
use crate::file::{ChannelProvider, FileHandle};
use crate::layout::{self, Layout, WrStoreSnapshot};
use crate::options::{OperatingMode, Options};
use crate::recorder::{self, Recorder, Unit};
use crate::ro::RoDatabase;
use crate::store::{Store, TableRegistry};
use crate::tracker::FileSpaceTracker;
use crate::types::{Ref, Value};

const LAYOUT_FILE_NAME: &str = "layout";

/// Which physical format a open `Database` is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
	Wr,
	Ro,
}

struct WrState {
	layout: Layout,
	layout_path: PathBuf,
	layout_lock: FileHandle,
	recorder: Arc<Recorder>,
	tracker: Arc<FileSpaceTracker>,
	sync: sync_mod::SyncManager,
	registry: TableRegistry,
	channels: ChannelProvider,
	cipher_factory: Option<Arc<dyn CipherFactory>>,
	/// The unit currently open for whichever thread holds the sync manager's
	/// unit zone, or `None` between top-level acquisitions. A fresh `Unit` is
	/// minted for every top-level acquisition (its owner thread is fixed at
	/// construction) and reused via `nest()` for same-thread reentrant calls.
	active_unit: Mutex<Option<Arc<Unit>>>,
}

use crate::sync as sync_mod;

/// An open ACDP database, either writable or read-only (§9).
pub struct Database {
	flavor: Flavor,
	wr: Option<WrState>,
	ro: Option<RoDatabase>,
}

impl Database {
	/// Initializes a brand-new WR database at `options.path` and opens it.
	/// Fails with `CreationFailure` if a layout file already exists there.
	pub fn create(options: &Options, cipher_factory: Option<Arc<dyn CipherFactory>>) -> Result<Database> {
		std::fs::create_dir_all(&options.path).map_err(Error::from).map_err(|e| e.with_path(&options.path))?;
		let layout_path = options.path.join(LAYOUT_FILE_NAME);
		if layout_path.exists() {
			return Err(Error::CreationFailure(format!("layout file already exists at {}", layout_path.display())));
		}

		let crypto = match &cipher_factory {
			Some(factory) => Some(Arc::new(CryptoProvider::new(factory.clone())?)),
			None => None,
		};
		let cipher_challenge = match &crypto {
			Some(provider) => Some(crypto::compute_challenge(provider.factory())?),
			None => None,
		};

		let recorder = Arc::new(Recorder::open(&options.rec_file, options.force_write_commit)?);
		let tracker = Arc::new(FileSpaceTracker::new());

		let mut registry = TableRegistry::new();
		let mut snapshots: HashMap<String, WrStoreSnapshot> = HashMap::new();
		for table_opts in &options.tables {
			let store = Store::open(table_opts, recorder.clone(), 0, 0, crypto.clone())?;
			snapshots.insert(
				table_opts.name.clone(),
				WrStoreSnapshot {
					nobs_row_ref: table_opts.store.nobs_row_ref,
					nobs_outrow_ptr: table_opts.store.nobs_outrow_ptr,
					nobs_ref_count: table_opts.store.nobs_ref_count,
					fl_path: table_opts.store.fl_path.clone(),
					vl_path: table_opts.store.vl_path.clone(),
					gap_head: 0,
					gap_count: 0,
				},
			);
			registry.insert(Arc::new(store));
		}

		let wr_layout = layout::new_layout(options, cipher_challenge);
		wr_layout.validate()?;
		layout::write(&layout_path, &wr_layout, &snapshots)?;

		let layout_lock = FileHandle::open(&layout_path, true)?;
		layout_lock.try_lock(false).map_err(|_| Error::OverlappingLock(layout_path.clone()))?;

		Ok(Database {
			flavor: Flavor::Wr,
			wr: Some(WrState {
				layout: wr_layout,
				layout_path,
				layout_lock,
				recorder,
				tracker,
				sync: sync_mod::SyncManager::new(),
				registry,
				channels: ChannelProvider::new(options.mode),
				cipher_factory,
				active_unit: Mutex::new(None),
			}),
			ro: None,
		})
	}

	/// Opens an existing database at `path`, detecting its flavor from
	/// whether `path` is a directory (WR) or a file (RO).
	pub fn open(path: &Path, mode: OperatingMode, cipher_factory: Option<Arc<dyn CipherFactory>>) -> Result<Database> {
		if path.is_dir() {
			Database::open_wr(path, mode, cipher_factory)
		} else {
			Database::open_ro(path, mode, cipher_factory)
		}
	}

	fn open_wr(dir: &Path, mode: OperatingMode, cipher_factory: Option<Arc<dyn CipherFactory>>) -> Result<Database> {
		if !mode.valid_for_wr() {
			return Err(Error::UnsupportedOperation("this operating mode is RO-only".into()));
		}
		let layout_path = dir.join(LAYOUT_FILE_NAME);
		let (wr_layout, snapshots) = layout::read(&layout_path)?;
		wr_layout.validate()?;

		let crypto = if let Some(stored) = &wr_layout.cipher_challenge {
			let factory = cipher_factory.as_ref().ok_or_else(|| Error::CreationFailure("database requires a cipher factory".into()))?;
			let provider = Arc::new(CryptoProvider::new(factory.clone())?);
			crypto::verify_challenge(provider.factory(), stored)?;
			Some(provider)
		} else {
			None
		};

		let recorder = Arc::new(Recorder::open(&wr_layout.rec_file, wr_layout.force_write_commit)?);
		recorder::recover(&recorder)?;
		let tracker = Arc::new(FileSpaceTracker::new());

		let mut registry = TableRegistry::new();
		for table_opts in &wr_layout.tables {
			let snap = snapshots
				.get(&table_opts.name)
				.ok_or_else(|| Error::MissingLayoutEntry(format!("tables.{}.store", table_opts.name)))?;
			let store = Store::open(table_opts, recorder.clone(), snap.gap_head, snap.gap_count, crypto.clone())?;
			registry.insert(Arc::new(store));
		}

		let layout_lock = FileHandle::open(&layout_path, true)?;
		layout_lock.try_lock(false).map_err(|_| Error::OverlappingLock(layout_path.clone()))?;

		Ok(Database {
			flavor: Flavor::Wr,
			wr: Some(WrState {
				layout: wr_layout,
				layout_path,
				layout_lock,
				recorder,
				tracker,
				sync: sync_mod::SyncManager::new(),
				registry,
				channels: ChannelProvider::new(mode),
				cipher_factory,
				active_unit: Mutex::new(None),
			}),
			ro: None,
		})
	}

	fn open_ro(path: &Path, mode: OperatingMode, cipher_factory: Option<Arc<dyn CipherFactory>>) -> Result<Database> {
		let ro_db = RoDatabase::open(path, mode, cipher_factory)?;
		Ok(Database { flavor: Flavor::Ro, wr: None, ro: Some(ro_db) })
	}

	pub fn flavor(&self) -> Flavor {
		self.flavor
	}

	fn wr(&self) -> Result<&WrState> {
		self.wr.as_ref().ok_or_else(|| Error::UnsupportedOperation("database is read-only".into()))
	}

	fn store(&self, table: &str) -> Result<&Arc<Store>> {
		self.wr()?.registry.get(table).ok_or_else(|| Error::MissingLayoutEntry(format!("tables.{}", table)))
	}

	/// Rewrites the layout file's per-table `flGapHead`/`flGapCount` entries
	/// from each store's current in-memory gap-chain state (§4.4: "also
	/// persisted in the store's layout entry"). Called after every
	/// successful unit/Kamikaze commit, so a reopened database picks the gap
	/// chain back up where the live one left it rather than rediscovering it
	/// (the FL file itself carries no root pointer).
	fn persist_layout(&self) -> Result<()> {
		let wr = self.wr()?;
		let mut snapshots = HashMap::new();
		for table_opts in &wr.layout.tables {
			let store = wr.registry.get(&table_opts.name).ok_or_else(|| Error::MissingLayoutEntry(format!("tables.{}", table_opts.name)))?;
			snapshots.insert(
				table_opts.name.clone(),
				WrStoreSnapshot {
					nobs_row_ref: table_opts.store.nobs_row_ref,
					nobs_outrow_ptr: table_opts.store.nobs_outrow_ptr,
					nobs_ref_count: table_opts.store.nobs_ref_count,
					fl_path: table_opts.store.fl_path.clone(),
					vl_path: table_opts.store.vl_path.clone(),
					gap_head: store.gap_head(),
					gap_count: store.gap_count(),
				},
			);
		}
		layout::write(&wr.layout_path, &wr.layout, &snapshots)
	}

	/// Runs `body` inside the synchronization manager's unit zone (§9
	/// "Unit zone"), threading it a `recorder::Unit` scoped to the
	/// acquisition: a fresh one for the outermost call on this thread,
	/// reused via `nest()`/`commit()`/`rollback()` for reentrant nested
	/// calls. `body`'s `Err` rolls the unit back; `Ok` commits it.
	pub fn issue_unit<T>(&self, body: impl FnOnce(&Unit) -> Result<T>) -> Result<T> {
		let wr = self.wr()?;
		let _guard = wr.sync.issue_unit()?;

		let mut slot = wr.active_unit.lock();
		let outermost = slot.is_none();
		if outermost {
			trace!(target: "acdp", "opening top-level unit");
			*slot = Some(Arc::new(Unit::open(wr.recorder.clone(), wr.tracker.clone())));
		} else {
			trace!(target: "acdp", "nesting unit");
			slot.as_ref().unwrap().nest()?;
		}
		let unit = slot.as_ref().unwrap().clone();
		drop(slot);

		let result = body(&unit);
		let finish = if result.is_ok() {
			debug!(target: "acdp", "committing unit (outermost={})", outermost);
			unit.commit()
		} else {
			debug!(target: "acdp", "rolling back unit (outermost={})", outermost);
			unit.rollback()
		};

		if outermost {
			*wr.active_unit.lock() = None;
		}

		finish?;
		if outermost && result.is_ok() {
			self.persist_layout()?;
		}
		result
	}

	/// Runs `body` inside the synchronization manager's read zone (§9
	/// "Read zone"): any number of threads may hold it concurrently, but it
	/// excludes the unit zone and Kamikaze writes.
	pub fn read_zone<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
		let wr = self.wr()?;
		let _guard = wr.sync.open_read_zone()?;
		body()
	}

	/// Runs `body` inside the synchronization manager's ACDP zone (§9
	/// "ACDP zone"): whole-database service operations such as compaction
	/// sweeps or RO conversion, exclusive of units and Kamikaze writes.
	pub fn acdp_zone<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
		let wr = self.wr()?;
		let _guard = wr.sync.open_acdp_zone()?;
		body()
	}

	/// Runs `body` as a Kamikaze write (§9 "Kamikaze zone"): a single
	/// write performed outside of any caller-managed unit, recorded and
	/// committed (or rolled back) around a throwaway unit so the recorder's
	/// "a fresh unit always starts at cursor 0" invariant holds for whatever
	/// the next unit turns out to be.
	pub fn kamikaze_write<T>(&self, body: impl FnOnce(&Unit) -> Result<T>) -> Result<T> {
		let wr = self.wr()?;
		debug!(target: "acdp", "kamikaze write starting");
		let result = wr.sync.kamikaze_write(|| {
			let unit = Unit::open(wr.recorder.clone(), wr.tracker.clone());
			let result = body(&unit);
			let _ = if result.is_ok() { unit.commit() } else { unit.rollback() };
			result
		});
		if result.is_ok() {
			self.persist_layout()?;
		}
		result
	}

	pub fn insert(&self, table: &str, values: &[Value]) -> Result<Ref> {
		self.issue_unit(|unit| {
			let wr = self.wr()?;
			let store = self.store(table)?;
			store.insert(values, unit, &wr.tracker, &wr.registry)
		})
	}

	pub fn delete(&self, table: &str, row: Ref) -> Result<()> {
		self.issue_unit(|unit| {
			let wr = self.wr()?;
			let store = self.store(table)?;
			store.delete(row, unit, &wr.tracker, &wr.registry)
		})
	}

	pub fn update(&self, table: &str, row: Ref, values: &[Value]) -> Result<()> {
		self.issue_unit(|unit| {
			let wr = self.wr()?;
			let store = self.store(table)?;
			store.update(row, values, unit, &wr.tracker, &wr.registry)
		})
	}

	pub fn update_column(&self, table: &str, row: Ref, col_index: usize, value: &Value) -> Result<()> {
		self.issue_unit(|unit| {
			let wr = self.wr()?;
			let store = self.store(table)?;
			store.update_column(row, col_index, value, unit, &wr.tracker, &wr.registry)
		})
	}

	/// Reads a row. Works against either flavor: a WR row is read inside
	/// the read zone, an RO row is read directly (RO files never mutate).
	pub fn read_row(&self, table: &str, row: Ref) -> Result<Vec<Value>> {
		match (&self.wr, &self.ro) {
			(Some(_), None) => self.read_zone(|| self.store(table)?.read_row(row)),
			(None, Some(ro)) => {
				let t = ro.table(table).ok_or_else(|| Error::MissingLayoutEntry(format!("tables.{}", table)))?;
				t.read_row(row)
			}
			_ => unreachable!("database must be exactly one flavor"),
		}
	}

	pub fn is_live(&self, table: &str, row: Ref) -> Result<bool> {
		self.read_zone(|| self.store(table)?.is_live(row))
	}

	pub fn ref_count(&self, table: &str, row: Ref) -> Result<u64> {
		self.read_zone(|| self.store(table)?.ref_count(row))
	}

	/// Compacts a table's gap chain, remapping references to relocated
	/// rows across the whole registry (§5 "Compaction").
	pub fn compact(&self, table: &str) -> Result<()> {
		self.issue_unit(|unit| {
			let wr = self.wr()?;
			let store = self.store(table)?;
			let mapping = store.compact(unit, &wr.tracker)?;
			debug!(target: "acdp", "{}: compacted, {} rows relocated", table, mapping.len());
			wr.registry.apply_compaction(table, &mapping, unit, &wr.tracker)
		})
	}

	/// Trims trailing gap rows off the end of a table's FL file. Per §5,
	/// only valid outside any open unit, so this runs as a Kamikaze write.
	pub fn trim_trailing_gaps(&self, table: &str) -> Result<()> {
		let wr = self.wr()?;
		let result = wr.sync.kamikaze_write(|| self.store(table)?.trim_trailing_gaps());
		if result.is_ok() {
			self.persist_layout()?;
		}
		result
	}

	/// Verifies every table's on-disk invariants (§5 "Verification").
	pub fn verify(&self) -> Result<()> {
		self.read_zone(|| {
			let wr = self.wr()?;
			for store in wr.registry.iter() {
				store.verify()?;
			}
			Ok(())
		})
	}

	/// Streams this WR database into a fresh RO file (§4.9). Runs inside
	/// the ACDP zone: it reads every table's full contents and excludes
	/// concurrent units or Kamikaze writes for the duration.
	pub fn convert_to_ro(&self, out_path: &Path, cipher: Option<(&str, &dyn CipherFactory)>) -> Result<()> {
		self.acdp_zone(|| {
			let wr = self.wr()?;
			convert::convert_to_ro(
				out_path,
				&wr.layout.name,
				wr.layout.version.as_deref(),
				wr.layout.consistency_number,
				&wr.layout,
				&wr.registry,
				cipher,
			)
		})
	}

	/// Shuts the database down: wakes any waiters with `Error::Shutdown`,
	/// releases pooled file channels and the layout advisory lock.
	pub fn close(&self) -> Result<()> {
		if let Some(wr) = &self.wr {
			debug!(target: "acdp", "closing database");
			wr.sync.shutdown();
			wr.channels.close_all();
			let _ = wr.layout_lock.unlock();
		}
		Ok(())
	}

	pub fn is_shutdown(&self) -> bool {
		match &self.wr {
			Some(wr) => wr.sync.is_shutdown(),
			None => false,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::options::{ColumnOptions, StoreOptions, TableOptions};
	use crate::types::{SimpleDesc, Type};

	fn scratch(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join("acdp-test-db").join(name);
		let _ = std::fs::remove_dir_all(&dir);
		dir
	}

	fn people_options(dir: &Path) -> Options {
		let mut options = Options::with_columns(dir, 0);
		options.name = "acdp".into();
		options.tables = vec![TableOptions {
			name: "people".into(),
			columns: vec![
				ColumnOptions { name: "age".into(), ty: Type::SimpleInrow(SimpleDesc { nullable: false, byte_length: Some(2), max_size: None }), refd_table: None },
				ColumnOptions { name: "name".into(), ty: Type::SimpleOutrow(SimpleDesc { nullable: true, byte_length: None, max_size: Some(256) }), refd_table: None },
			],
			store: StoreOptions { nobs_row_ref: 4, nobs_outrow_ptr: 4, nobs_ref_count: None, fl_path: dir.join("people.fl"), vl_path: dir.join("people.vl") },
		}];
		options
	}

	#[test]
	fn create_insert_read_roundtrip() {
		let dir = scratch("roundtrip");
		let options = people_options(&dir);
		let db = Database::create(&options, None).unwrap();

		let row = db.insert("people", &[Value::Simple(vec![0, 30]), Value::Simple(b"alice".to_vec())]).unwrap();
		let values = db.read_row("people", row).unwrap();
		assert_eq!(values, vec![Value::Simple(vec![0, 30]), Value::Simple(b"alice".to_vec())]);

		db.update("people", row, &[Value::Simple(vec![0, 31]), Value::Null]).unwrap();
		let values = db.read_row("people", row).unwrap();
		assert_eq!(values, vec![Value::Simple(vec![0, 31]), Value::Null]);

		assert!(db.is_live("people", row).unwrap());
		db.delete("people", row).unwrap();
		assert!(!db.is_live("people", row).unwrap());

		db.close().unwrap();
	}

	#[test]
	fn reopen_recovers_layout_and_data() {
		let dir = scratch("reopen");
		let options = people_options(&dir);
		let row = {
			let db = Database::create(&options, None).unwrap();
			let row = db.insert("people", &[Value::Simple(vec![0, 22]), Value::Null]).unwrap();
			db.close().unwrap();
			row
		};

		let db = Database::open(&dir, OperatingMode::KeepOpenForever, None).unwrap();
		let values = db.read_row("people", row).unwrap();
		assert_eq!(values, vec![Value::Simple(vec![0, 22]), Value::Null]);
		db.close().unwrap();
	}

	#[test]
	fn reopen_after_delete_preserves_gap_chain() {
		let dir = scratch("reopen_gaps");
		let options = people_options(&dir);
		let (r1, r2) = {
			let db = Database::create(&options, None).unwrap();
			let r1 = db.insert("people", &[Value::Simple(vec![0, 1]), Value::Null]).unwrap();
			let r2 = db.insert("people", &[Value::Simple(vec![0, 2]), Value::Null]).unwrap();
			db.delete("people", r1).unwrap();
			db.close().unwrap();
			(r1, r2)
		};

		let db = Database::open(&dir, OperatingMode::KeepOpenForever, None).unwrap();
		assert!(!db.is_live("people", r1).unwrap());
		assert!(db.is_live("people", r2).unwrap());
		// the gap chain's root must have survived the reopen so a fresh
		// insert reuses the freed slot instead of growing the FL file.
		let r3 = db.insert("people", &[Value::Simple(vec![0, 3]), Value::Null]).unwrap();
		assert_eq!(r3, r1);
		db.close().unwrap();
	}

	#[test]
	fn nested_unit_rolls_back_inner_failure() {
		let dir = scratch("nested");
		let options = people_options(&dir);
		let db = Database::create(&options, None).unwrap();

		let row = db.insert("people", &[Value::Simple(vec![0, 18]), Value::Null]).unwrap();

		let outcome: Result<()> = db.issue_unit(|_outer| {
			db.update("people", row, &[Value::Simple(vec![0, 19]), Value::Null])?;
			db.issue_unit(|_inner| Err(Error::CreationFailure("boom".into())))
		});
		assert!(outcome.is_err());

		let values = db.read_row("people", row).unwrap();
		assert_eq!(values, vec![Value::Simple(vec![0, 18]), Value::Null]);

		db.close().unwrap();
	}

	#[test]
	fn create_twice_fails() {
		let dir = scratch("twice");
		let options = people_options(&dir);
		let db = Database::create(&options, None).unwrap();
		db.close().unwrap();
		assert!(Database::create(&options, None).is_err());
	}

	#[test]
	fn convert_then_open_ro() {
		let dir = scratch("convert");
		let options = people_options(&dir);
		let db = Database::create(&options, None).unwrap();
		db.insert("people", &[Value::Simple(vec![0, 30]), Value::Simple(b"bob".to_vec())]).unwrap();

		let ro_path = dir.join("out.ro");
		db.convert_to_ro(&ro_path, None).unwrap();
		db.close().unwrap();

		let ro_db = Database::open(&ro_path, OperatingMode::KeepOpenForever, None).unwrap();
		assert_eq!(ro_db.flavor(), Flavor::Ro);
		let values = ro_db.read_row("people", 1).unwrap();
		assert_eq!(values, vec![Value::Simple(vec![0, 30]), Value::Simple(b"bob".to_vec())]);
		assert!(ro_db.insert("people", &[]).is_err());
	}
}
