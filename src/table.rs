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

//! On-disk layout and I/O for the FL (fixed-length row block) file of a WR
//! table store (§3, §4.7).
//!
//! Block `i` (1-based: block 0 holds row 1) is laid out as:
//!
//! ```text
//! [INFO: 1 + ceil(nullable_inrow_count/8) bytes][REFCOUNT: nobsRefCount, if referenced]
//! [COLUMN 0] .. [COLUMN N-1]
//! ```
//!
//! INFO byte 0 bit 0 is the live/gap flag; the remaining bits (and any
//! further INFO bytes) are a bitmap of "is null" for the table's nullable
//! inrow columns, in column-definition order. A gap block threads a doubly
//! linked free list through the first two nobsRowRef-sized slots right
//! after INFO(+REFCOUNT) — `[NEXT][PREV]` — rooted in the store's in-memory
//! (first-gap index, gap-count) pair, which is itself tracked by the
//! FileSpaceTracker and persisted in the store's layout entry, not inside
//! this file.
//!
//! An inrow simple column stores its fixed bytes directly; a reference
//! column stores nobsRowRef bytes (0 = null); an outrow column (simple or
//! array) stores a `[LENGTH: type-derived][POINTER: nobsOutrowPtr]` pair,
//! with `(0, 0)` meaning null — the VL heap payload itself is written by
//! the caller via `heap.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use log::trace;
use crate::codec::{bitmap_get, bitmap_set, read_uint_be, write_uint_be};
use crate::crypto::CryptoProvider;
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::options::ColumnOptions;
use crate::recorder::Recorder;
use crate::tracker::{FileSpace, FileSpaceId, FileSpaceTracker};
use crate::types::{Scheme, Type, Value};

/// Layout of one column within a row block.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
	pub name: String,
	pub ty: Type,
	pub offset: usize,
	/// Position in the table's nullable-inrow bitmap, if this is a nullable inrow column.
	pub null_bit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TableLayout {
	pub columns: Vec<ColumnLayout>,
	pub nobs_row_ref: u8,
	pub nobs_outrow_ptr: u8,
	pub nobs_ref_count: Option<u8>,
	pub info_bytes: usize,
	pub ref_count_offset: usize,
	pub block_size: usize,
}

impl TableLayout {
	pub fn new(columns: &[ColumnOptions], nobs_row_ref: u8, nobs_outrow_ptr: u8, nobs_ref_count: Option<u8>) -> Result<TableLayout> {
		let nullable_inrow = columns.iter().filter(|c| c.ty.scheme() == Scheme::Inrow && c.ty.nullable()).count();
		if nullable_inrow > 64 {
			return Err(Error::ImplementationLimit("more than 64 nullable columns in one table".into()));
		}
		let info_bytes = 1 + crate::codec::bitmap_len(nullable_inrow);
		let ref_count_offset = info_bytes;
		let mut offset = ref_count_offset + nobs_ref_count.map(|n| n as usize).unwrap_or(0);
		let mut laid_out = Vec::with_capacity(columns.len());
		let mut next_null_bit = 0usize;
		for c in columns {
			let null_bit = if c.ty.scheme() == Scheme::Inrow && c.ty.nullable() {
				let b = next_null_bit;
				next_null_bit += 1;
				Some(b)
			} else {
				None
			};
			let width = match c.ty.scheme() {
				Scheme::Inrow => c.ty.byte_length(nobs_row_ref, nobs_outrow_ptr).ok_or_else(|| {
					Error::ImplementationLimit(format!("column {} declared inrow but has no fixed width", c.name))
				})? as usize,
				Scheme::Outrow => c.ty.size_len() as usize + nobs_outrow_ptr as usize,
			};
			laid_out.push(ColumnLayout { name: c.name.clone(), ty: c.ty.clone(), offset, null_bit });
			offset += width;
		}
		let block_size = offset.max(info_bytes + 2 * nobs_row_ref as usize);
		Ok(TableLayout {
			columns: laid_out,
			nobs_row_ref,
			nobs_outrow_ptr,
			nobs_ref_count,
			info_bytes,
			ref_count_offset,
			block_size,
		})
	}

	fn gap_next_offset(&self) -> usize {
		self.info_bytes + self.nobs_ref_count.map(|n| n as usize).unwrap_or(0)
	}
	fn gap_prev_offset(&self) -> usize {
		self.gap_next_offset() + self.nobs_row_ref as usize
	}
}

fn is_live(block: &[u8]) -> bool {
	block[0] & 1 != 0
}
fn set_live(block: &mut [u8], live: bool) {
	if live {
		block[0] |= 1;
	} else {
		block[0] &= !1;
	}
}

/// The FL gap-chain head + count: purely in-memory (no on-disk counterpart
/// inside the FL file itself), shared with a `GapSpace` so the tracker can
/// snapshot and restore both fields as a pair.
struct GapState {
	gap_head: AtomicU64,
	gap_count: AtomicU64,
}

/// The FL fixed-length row file. Row `i` (1-based, `0` is never a valid row)
/// lives at block `i - 1`.
pub struct FlTable {
	path: std::path::PathBuf,
	file: FileHandle,
	recorder: Arc<Recorder>,
	pub layout: TableLayout,
	gap: Arc<GapState>,
	crypto: Option<Arc<CryptoProvider>>,
}

impl FlTable {
	pub fn open(
		path: &std::path::Path,
		layout: TableLayout,
		recorder: Arc<Recorder>,
		gap_head: u64,
		gap_count: u64,
		crypto: Option<Arc<CryptoProvider>>,
	) -> Result<FlTable> {
		let file = FileHandle::open(path, true)?;
		Ok(FlTable {
			path: path.to_path_buf(),
			file,
			recorder,
			layout,
			gap: Arc::new(GapState { gap_head: AtomicU64::new(gap_head), gap_count: AtomicU64::new(gap_count) }),
			crypto,
		})
	}

	/// Decrypts `buf` in place if this table's WR database was opened with a
	/// cipher factory (§4.3); a no-op otherwise.
	fn decrypt(&self, buf: &mut [u8]) -> Result<()> {
		match &self.crypto {
			Some(crypto) => crypto.with_decrypt(|c| {
				c.decrypt(buf);
				Ok(())
			}),
			None => Ok(()),
		}
	}

	/// Encrypts `buf` in place if this table's WR database was opened with a
	/// cipher factory; a no-op otherwise.
	fn encrypt(&self, buf: &mut [u8]) -> Result<()> {
		match &self.crypto {
			Some(crypto) => crypto.with_encrypt(|c| {
				c.encrypt(buf);
				Ok(())
			}),
			None => Ok(()),
		}
	}

	pub fn path(&self) -> &std::path::Path {
		&self.path
	}

	pub fn block_size(&self) -> usize {
		self.layout.block_size
	}

	pub fn capacity(&self) -> Result<u64> {
		Ok(self.file.size()? / self.block_size() as u64)
	}

	pub fn gap_head(&self) -> u64 {
		self.gap.gap_head.load(Ordering::Relaxed)
	}
	pub fn gap_count(&self) -> u64 {
		self.gap.gap_count.load(Ordering::Relaxed)
	}

	/// Reports the gap-chain's pristine state to `tracker` before any mutation,
	/// mirroring `heap.rs`'s `VlHeap::report` for the VL header.
	fn report(&self, tracker: &FileSpaceTracker) {
		tracker.report_old_state(Arc::new(GapSpace { path: self.path.clone(), gap: self.gap.clone() }));
	}

	fn row_offset(&self, row: u64) -> u64 {
		(row - 1) * self.block_size() as u64
	}

	pub fn read_block(&self, row: u64, buf: &mut [u8]) -> Result<()> {
		self.file.read_at(buf, self.row_offset(row))?;
		self.decrypt(buf)
	}

	fn read_at_offset(&self, row: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
		self.file.read_at(buf, self.row_offset(row) + offset as u64)?;
		self.decrypt(buf)
	}

	/// Writes `data` at `offset` within row `row`'s block, first recording
	/// its current (still-encrypted) content as a before-image, then
	/// encrypting `data` before it hits disk.
	pub fn write_recorded(&self, row: u64, offset: usize, data: &[u8]) -> Result<()> {
		let pos = self.row_offset(row) + offset as u64;
		let mut before = vec![0u8; data.len()];
		self.file.read_at(&mut before, pos)?;
		self.recorder.record(&self.path, pos, &before)?;
		let mut data = data.to_vec();
		self.encrypt(&mut data)?;
		self.file.write_at(&data, pos)
	}

	/// Claims a free row slot: pops the gap-chain head if non-empty,
	/// otherwise appends a new block at EOF (recorded as a pure-extension
	/// undo, i.e. an empty before-image that truncates on rollback). Reports
	/// the gap chain's pristine state to `tracker` before mutating it, so a
	/// rollback puts the freed slot back instead of orphaning it.
	pub fn claim_slot(&self, tracker: &FileSpaceTracker) -> Result<u64> {
		self.report(tracker);
		let head = self.gap.gap_head.load(Ordering::Relaxed);
		if head != 0 {
			let mut next_buf = vec![0u8; self.layout.nobs_row_ref as usize];
			self.read_at_offset(head, self.layout.gap_next_offset(), &mut next_buf)?;
			let next = read_uint_be(&next_buf, self.layout.nobs_row_ref);
			if next != 0 {
				let mut prev_buf = vec![0u8; self.layout.nobs_row_ref as usize];
				write_uint_be(&mut prev_buf, self.layout.nobs_row_ref, 0);
				self.write_recorded(next, self.layout.gap_prev_offset(), &prev_buf)?;
			}
			self.gap.gap_head.store(next, Ordering::Relaxed);
			self.gap.gap_count.fetch_sub(1, Ordering::Relaxed);
			trace!(target: "acdp", "{}: reused gap slot {}", self.path().display(), head);
			Ok(head)
		} else {
			let capacity = self.capacity()?;
			let row = capacity + 1;
			if self.layout.nobs_row_ref < 8 && row >= (1u64 << (8 * self.layout.nobs_row_ref as u32)) {
				return Err(Error::MaximumExceeded(format!(
					"{}: row {} exceeds the nobsRowRef={} address space",
					self.path.display(),
					row,
					self.layout.nobs_row_ref
				)));
			}
			let pos = self.row_offset(row);
			self.recorder.record(&self.path, pos, &[])?;
			self.file.truncate(pos + self.block_size() as u64)?;
			Ok(row)
		}
	}

	/// Pushes `row` onto the head of the gap chain and marks it as a gap.
	/// Reports the gap chain's pristine state to `tracker` before mutating it.
	pub fn free_slot(&self, row: u64, tracker: &FileSpaceTracker) -> Result<()> {
		self.report(tracker);
		let old_head = self.gap.gap_head.load(Ordering::Relaxed);
		if old_head != 0 {
			let mut prev_buf = vec![0u8; self.layout.nobs_row_ref as usize];
			write_uint_be(&mut prev_buf, self.layout.nobs_row_ref, row);
			self.write_recorded(old_head, self.layout.gap_prev_offset(), &prev_buf)?;
		}
		let mut next_buf = vec![0u8; self.layout.nobs_row_ref as usize];
		write_uint_be(&mut next_buf, self.layout.nobs_row_ref, old_head);
		let mut prev_buf = vec![0u8; self.layout.nobs_row_ref as usize];
		write_uint_be(&mut prev_buf, self.layout.nobs_row_ref, 0);

		let info_len = self.layout.info_bytes;
		let mut info = vec![0u8; info_len];
		self.read_block(row, &mut info)?;
		set_live(&mut info, false);
		self.write_recorded(row, 0, &info)?;
		self.write_recorded(row, self.layout.gap_next_offset(), &next_buf)?;
		self.write_recorded(row, self.layout.gap_prev_offset(), &prev_buf)?;

		self.gap.gap_head.store(row, Ordering::Relaxed);
		self.gap.gap_count.fetch_add(1, Ordering::Relaxed);
		trace!(target: "acdp", "{}: freed row {} onto gap chain", self.path().display(), row);
		Ok(())
	}

	/// Removes `row` from the gap chain wherever it sits (used by `compact`),
	/// reading its currently stored next/prev pointers to relink its
	/// neighbors. `tracker` is `None` only for the untracked, unit-less
	/// trailing-gap trim (`Store::trim_trailing_gaps`), which has no unit to
	/// roll back in the first place.
	pub fn unlink_gap(&self, row: u64, tracker: Option<&FileSpaceTracker>) -> Result<()> {
		if let Some(tracker) = tracker {
			self.report(tracker);
		}
		let mut next_buf = vec![0u8; self.layout.nobs_row_ref as usize];
		self.read_at_offset(row, self.layout.gap_next_offset(), &mut next_buf)?;
		let next = read_uint_be(&next_buf, self.layout.nobs_row_ref);
		let mut prev_buf = vec![0u8; self.layout.nobs_row_ref as usize];
		self.read_at_offset(row, self.layout.gap_prev_offset(), &mut prev_buf)?;
		let prev = read_uint_be(&prev_buf, self.layout.nobs_row_ref);

		if prev != 0 {
			let mut buf = vec![0u8; self.layout.nobs_row_ref as usize];
			write_uint_be(&mut buf, self.layout.nobs_row_ref, next);
			self.write_recorded(prev, self.layout.gap_next_offset(), &buf)?;
		} else if self.gap.gap_head.load(Ordering::Relaxed) == row {
			self.gap.gap_head.store(next, Ordering::Relaxed);
		}
		if next != 0 {
			let mut buf = vec![0u8; self.layout.nobs_row_ref as usize];
			write_uint_be(&mut buf, self.layout.nobs_row_ref, prev);
			self.write_recorded(next, self.layout.gap_prev_offset(), &buf)?;
		}
		self.gap.gap_count.fetch_sub(1, Ordering::Relaxed);
		Ok(())
	}

	/// Reads the next-gap pointer stored at `row` (only meaningful if `row`
	/// is currently a gap).
	pub fn next_gap(&self, row: u64) -> Result<u64> {
		let mut buf = vec![0u8; self.layout.nobs_row_ref as usize];
		self.read_at_offset(row, self.layout.gap_next_offset(), &mut buf)?;
		Ok(read_uint_be(&buf, self.layout.nobs_row_ref))
	}

	/// Truncates the file to exactly `capacity` rows. Unrecorded: callers
	/// must only use this outside any open unit (see `Store::trim_trailing_gaps`).
	pub fn truncate_to(&self, capacity: u64) -> Result<()> {
		self.file.truncate(capacity * self.block_size() as u64)
	}

	pub fn is_live_row(&self, row: u64) -> Result<bool> {
		if row == 0 || row > self.capacity()? {
			return Ok(false);
		}
		let mut byte = [0u8; 1];
		self.read_at_offset(row, 0, &mut byte)?;
		Ok(is_live(&byte))
	}

	/// Reads the reference counter of `row` (0 if the table is not referenced).
	pub fn ref_count(&self, row: u64) -> Result<u64> {
		match self.layout.nobs_ref_count {
			None => Ok(0),
			Some(n) => {
				let mut buf = vec![0u8; n as usize];
				self.read_at_offset(row, self.layout.ref_count_offset, &mut buf)?;
				Ok(read_uint_be(&buf, n))
			}
		}
	}

	pub fn set_ref_count(&self, row: u64, value: u64) -> Result<()> {
		let n = self.layout.nobs_ref_count.ok_or_else(|| {
			Error::ImplementationLimit("table is not referenced, has no reference counter".into())
		})?;
		if n < 8 && value >= (1u64 << (n as u32 * 8)) {
			return Err(Error::MaximumExceeded("reference counter exceeds nobsRefCount capacity".into()));
		}
		let mut buf = vec![0u8; n as usize];
		write_uint_be(&mut buf, n, value);
		self.write_recorded(row, self.layout.ref_count_offset, &buf)
	}

	/// Writes a whole row's inrow content (info byte(s) plus every inrow and
	/// outrow column slot) for `values` in table-definition order.
	/// `outrow_slots[i]` gives the already-allocated VL `(length, pointer)`
	/// for the i-th column when it is an outrow column, `None` for null.
	pub fn write_row(&self, row: u64, values: &[Value], outrow_slots: &[Option<(u64, u64)>]) -> Result<()> {
		let info_len = self.layout.info_bytes;
		let mut info = vec![0u8; info_len];
		self.read_block(row, &mut info)?;
		set_live(&mut info, true);
		for (i, col) in self.layout.columns.iter().enumerate() {
			if let Some(bit) = col.null_bit {
				let is_null = matches!(values[i], Value::Null);
				bitmap_set(&mut info[1..], bit, is_null);
			}
		}
		self.write_recorded(row, 0, &info)?;

		for (i, col) in self.layout.columns.iter().enumerate() {
			match col.ty.scheme() {
				Scheme::Inrow => {
					let width = col.ty.byte_length(self.layout.nobs_row_ref, self.layout.nobs_outrow_ptr).unwrap() as usize;
					let mut buf = vec![0u8; width];
					col.ty.encode_inrow_into(&values[i], &mut buf, self.layout.nobs_row_ref)?;
					self.write_recorded(row, col.offset, &buf)?;
				}
				Scheme::Outrow => {
					let len_len = col.ty.size_len() as usize;
					let ptr_len = self.layout.nobs_outrow_ptr as usize;
					let (len, ptr) = outrow_slots[i].unwrap_or((0, 0));
					let mut buf = vec![0u8; len_len + ptr_len];
					write_uint_be(&mut buf[..len_len], len_len as u8, len);
					write_uint_be(&mut buf[len_len..], ptr_len as u8, ptr);
					self.write_recorded(row, col.offset, &buf)?;
				}
			}
		}
		Ok(())
	}

	/// Reads back one column's raw inrow bytes or outrow `(length, pointer)` pair.
	pub fn read_column_raw(&self, row: u64, col_index: usize) -> Result<Vec<u8>> {
		let col = &self.layout.columns[col_index];
		let width = match col.ty.scheme() {
			Scheme::Inrow => col.ty.byte_length(self.layout.nobs_row_ref, self.layout.nobs_outrow_ptr).unwrap() as usize,
			Scheme::Outrow => col.ty.size_len() as usize + self.layout.nobs_outrow_ptr as usize,
		};
		let mut buf = vec![0u8; width];
		self.read_at_offset(row, col.offset, &mut buf)?;
		Ok(buf)
	}

	pub fn read_null_bit(&self, row: u64, bit: usize) -> Result<bool> {
		let info_len = self.layout.info_bytes;
		let mut info = vec![0u8; info_len];
		self.read_block(row, &mut info)?;
		Ok(bitmap_get(&info[1..], bit))
	}

	/// Splits a raw outrow column slot into its `(length, pointer)` pair.
	pub fn split_outrow_slot(buf: &[u8], len_len: u8, ptr_len: u8) -> (u64, u64) {
		let len = read_uint_be(&buf[..len_len as usize], len_len);
		let ptr = read_uint_be(&buf[len_len as usize..], ptr_len);
		(len, ptr)
	}

	/// Copies row `src`'s entire block content to row `dst` (used by compaction
	/// to relocate a trailing live row into a lower-index gap position). Both
	/// the destination's new content and the source's about-to-be-vacated
	/// content are recorded for rollback.
	pub fn relocate_row(&self, src: u64, dst: u64) -> Result<()> {
		let mut buf = vec![0u8; self.block_size()];
		self.read_block(src, &mut buf)?;
		self.write_recorded(dst, 0, &buf)?;
		Ok(())
	}
}

/// `FileSpace` adapter for the FL gap-chain head + count (mirrors `heap.rs`'s
/// `HeaderSpace`). Persisting is a no-op: unlike the VL header, the gap
/// chain has no on-disk slot of its own — `Database::persist_layout`
/// rewrites the layout file's `flGapHead`/`flGapCount` entries straight from
/// the live atomics after every successful top-level commit.
struct GapSpace {
	path: std::path::PathBuf,
	gap: Arc<GapState>,
}

impl FileSpace for GapSpace {
	fn id(&self) -> FileSpaceId {
		(self.path.to_string_lossy().into_owned(), "fl_gap")
	}

	fn snapshot(&self) -> (u64, u64) {
		(self.gap.gap_head.load(Ordering::Relaxed), self.gap.gap_count.load(Ordering::Relaxed))
	}

	fn persist(&self) {}

	fn restore(&self, snapshot: (u64, u64)) {
		self.gap.gap_head.store(snapshot.0, Ordering::Relaxed);
		self.gap.gap_count.store(snapshot.1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::options::ColumnOptions;
	use crate::tracker::FileSpaceTracker;
	use crate::types::SimpleDesc;

	fn columns() -> Vec<ColumnOptions> {
		vec![
			ColumnOptions { name: "a".into(), ty: Type::SimpleInrow(SimpleDesc { nullable: false, byte_length: Some(4), max_size: None }), refd_table: None },
			ColumnOptions { name: "b".into(), ty: Type::SimpleOutrow(SimpleDesc { nullable: true, byte_length: None, max_size: Some(64) }), refd_table: None },
		]
	}

	fn scratch(name: &str) -> std::path::PathBuf {
		let dir = std::env::temp_dir().join("acdp-test-fl").join(name);
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn claim_and_free_roundtrip() {
		let dir = scratch("claim_free");
		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let layout = TableLayout::new(&columns(), 4, 4, None).unwrap();
		let table = FlTable::open(&dir.join("t.fl"), layout, recorder, 0, 0, None).unwrap();
		let tracker = FileSpaceTracker::new();

		let r1 = table.claim_slot(&tracker).unwrap();
		assert_eq!(r1, 1);
		table.write_row(r1, &[Value::Simple(vec![0, 0, 0, 1]), Value::Null], &[None, None]).unwrap();
		assert!(table.is_live_row(r1).unwrap());

		table.free_slot(r1, &tracker).unwrap();
		assert!(!table.is_live_row(r1).unwrap());
		assert_eq!(table.gap_head(), 1);
		assert_eq!(table.gap_count(), 1);

		let r2 = table.claim_slot(&tracker).unwrap();
		assert_eq!(r2, 1); // reused the freed slot
		assert_eq!(table.gap_head(), 0);
		assert_eq!(table.gap_count(), 0);
	}

	#[test]
	fn rollback_restores_gap_chain_after_claim() {
		let dir = scratch("claim_rollback");
		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let layout = TableLayout::new(&columns(), 4, 4, None).unwrap();
		let table = FlTable::open(&dir.join("t.fl"), layout, recorder, 0, 0, None).unwrap();
		let tracker = FileSpaceTracker::new();

		let r1 = table.claim_slot(&tracker).unwrap();
		table.write_row(r1, &[Value::Simple(vec![0, 0, 0, 1]), Value::Null], &[None, None]).unwrap();
		table.free_slot(r1, &tracker).unwrap();
		assert_eq!(table.gap_head(), 1);
		assert_eq!(table.gap_count(), 1);

		// A unit that claims the freed slot and then rolls back must see the
		// gap chain put back exactly where it was, not left pointing at an
		// orphaned state.
		let _r2 = table.claim_slot(&tracker).unwrap();
		assert_eq!(table.gap_head(), 0);
		assert_eq!(table.gap_count(), 0);
		tracker.adopt_pristine();
		assert_eq!(table.gap_head(), 1);
		assert_eq!(table.gap_count(), 1);
	}

	#[test]
	fn ref_counted_table_tracks_count() {
		let dir = scratch("refcount");
		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let layout = TableLayout::new(&columns(), 4, 4, Some(2)).unwrap();
		let table = FlTable::open(&dir.join("t.fl"), layout, recorder, 0, 0, None).unwrap();
		let tracker = FileSpaceTracker::new();
		let r1 = table.claim_slot(&tracker).unwrap();
		table.write_row(r1, &[Value::Simple(vec![0, 0, 0, 1]), Value::Null], &[None, None]).unwrap();
		assert_eq!(table.ref_count(r1).unwrap(), 0);
		table.set_ref_count(r1, 3).unwrap();
		assert_eq!(table.ref_count(r1).unwrap(), 3);
	}

	#[test]
	fn claim_slot_rejects_row_past_nobs_row_ref_address_space() {
		let dir = scratch("max_exceeded");
		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let layout = TableLayout::new(&columns(), 1, 4, None).unwrap();
		let table = FlTable::open(&dir.join("t.fl"), layout, recorder, 0, 0, None).unwrap();
		let tracker = FileSpaceTracker::new();

		for _ in 0..255 {
			let r = table.claim_slot(&tracker).unwrap();
			table.write_row(r, &[Value::Simple(vec![0, 0, 0, 1]), Value::Null], &[None, None]).unwrap();
		}
		assert_eq!(table.capacity().unwrap(), 255);

		let err = table.claim_slot(&tracker).unwrap_err();
		assert!(matches!(err, Error::MaximumExceeded(_)));
		assert_eq!(table.capacity().unwrap(), 255); // rejected before any file growth
	}
}
