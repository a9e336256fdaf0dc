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

//! Recorder / Unit (§4.5): an append-only before-image write-ahead log and
//! the nestable unit stack built on top of it. Unlike a redo log, this is
//! an *undo* log — `record` captures what was there before a write so that
//! `rollback` can put it back; the store writes the new bytes directly to
//! its own files as part of the same operation.

use std::collections::HashSet;
use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::Mutex;
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::tracker::FileSpaceTracker;

/// Constant trailer that marks the logical end of the recorder file.
pub const END_MARKER: [u8; 8] = [0x8F, 0x38, 0x05, 0xF4, 0x5D, 0x7C, 0xA7, 0xFB];

/// One logged before-image.
struct Entry {
	path: PathBuf,
	pos: u64,
	before_image: Vec<u8>,
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
	u64::from_be_bytes(buf[off..off + 8].try_into().unwrap())
}
fn write_u64(out: &mut Vec<u8>, v: u64) {
	out.extend_from_slice(&v.to_be_bytes());
}

fn serialize_entry(entry_start: u64, e: &Entry) -> Vec<u8> {
	let mut out = Vec::new();
	let path_bytes = e.path.to_string_lossy().into_owned().into_bytes();
	out.extend_from_slice(&(path_bytes.len() as u16).to_be_bytes());
	out.extend_from_slice(&path_bytes);
	write_u64(&mut out, e.pos);
	write_u64(&mut out, e.before_image.len() as u64);
	out.extend_from_slice(&e.before_image);
	write_u64(&mut out, entry_start);
	out
}

fn deserialize_entry(buf: &[u8]) -> Entry {
	let path_len = u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize;
	let mut off = 2;
	let path = PathBuf::from(String::from_utf8_lossy(&buf[off..off + path_len]).into_owned());
	off += path_len;
	let pos = read_u64(buf, off);
	off += 8;
	let len = read_u64(buf, off) as usize;
	off += 8;
	let before_image = buf[off..off + len].to_vec();
	Entry { path, pos, before_image }
}

/// The on-disk write-ahead log of before-images.
pub struct Recorder {
	file: FileHandle,
	cursor: Mutex<u64>,
	force_write_commit: bool,
	force_list: Mutex<HashSet<PathBuf>>,
	files: Mutex<std::collections::HashMap<PathBuf, Arc<FileHandle>>>,
}

impl Recorder {
	/// Opens (creating if needed) the recorder file at `path`.
	pub fn open(path: &Path, force_write_commit: bool) -> Result<Recorder> {
		let file = FileHandle::open(path, true)?;
		let size = file.size()?;
		if size == 0 {
			file.truncate(8)?;
			file.write_at(&END_MARKER, 0)?;
			return Ok(Recorder {
				file,
				cursor: Mutex::new(0),
				force_write_commit,
				force_list: Mutex::new(HashSet::new()),
				files: Mutex::new(std::collections::HashMap::new()),
			});
		}
		if size < 8 {
			return Err(Error::Corruption("recorder file shorter than the end-marker".into()));
		}
		let mut marker = [0u8; 8];
		file.read_at(&mut marker, size - 8)?;
		if marker != END_MARKER {
			return Err(Error::Corruption("recorder file has a bad trailing marker".into()));
		}
		Ok(Recorder {
			file,
			cursor: Mutex::new(size - 8),
			force_write_commit,
			force_list: Mutex::new(HashSet::new()),
			files: Mutex::new(std::collections::HashMap::new()),
		})
	}

	/// True if there is a non-empty before-image range pending (i.e. an
	/// interrupted unit's entries that need recovery-rollback at open).
	pub fn needs_recovery(&self) -> bool {
		*self.cursor.lock() > 0
	}

	fn handle_for(&self, path: &Path) -> Result<Arc<FileHandle>> {
		let mut files = self.files.lock();
		if let Some(h) = files.get(path) {
			return Ok(h.clone());
		}
		let h = Arc::new(FileHandle::open(path, true)?);
		files.insert(path.to_path_buf(), h.clone());
		Ok(h)
	}

	/// Records a before-image of `len` bytes at `pos` in `file`'s current
	/// content, advancing the logical cursor. `file` is added to the
	/// force-list for the current unit.
	pub fn record(&self, path: &Path, pos: u64, before_image: &[u8]) -> Result<()> {
		let entry = Entry { path: path.to_path_buf(), pos, before_image: before_image.to_vec() };
		let mut cursor = self.cursor.lock();
		let entry_start = *cursor;
		let bytes = serialize_entry(entry_start, &entry);
		self.file.write_at(&bytes, entry_start)?;
		let new_cursor = entry_start + bytes.len() as u64;
		self.file.write_at(&END_MARKER, new_cursor)?;
		self.file.truncate(new_cursor + 8)?;
		*cursor = new_cursor;
		self.force_list.lock().insert(path.to_path_buf());
		if self.force_write_commit {
			self.file.force(false)?;
		}
		Ok(())
	}

	fn truncate_target(&self, path: &Path, len: u64) -> Result<()> {
		self.handle_for(path)?.truncate(len)
	}

	fn write_target(&self, path: &Path, pos: u64, data: &[u8]) -> Result<()> {
		self.handle_for(path)?.write_at(data, pos)
	}

	/// Top-level commit: merges any stashed pristine states from committed
	/// nested units, persists tracked file-space states, forces every
	/// force-listed file if configured, then truncates the recorder back
	/// to just the end-marker.
	pub fn commit_top_level(&self, tracker: &FileSpaceTracker) -> Result<()> {
		tracker.merge_stash();
		tracker.write_states();
		if self.force_write_commit {
			let force_list = self.force_list.lock();
			for path in force_list.iter() {
				if let Ok(h) = self.handle_for(path) {
					h.force(false)?;
				}
			}
		}
		// §9 open question: with forceWriteCommit=off the recorder file is
		// only guaranteed materialized when the database is closed — we
		// still truncate the logical content here, matching upstream's
		// weaker durability default bug-for-bug.
		self.file.write_at(&END_MARKER, 0)?;
		self.file.truncate(8)?;
		*self.cursor.lock() = 0;
		self.force_list.lock().clear();
		Ok(())
	}

	/// Nested commit: advances `back_pos` to the current cursor (entries
	/// stay, in case an enclosing unit still rolls back) and tells the
	/// tracker to stash its pristine states.
	pub fn commit_nested(&self, tracker: &FileSpaceTracker) -> u64 {
		tracker.commit_nested();
		*self.cursor.lock()
	}

	/// Rolls back every entry from the current cursor down to `back_pos`,
	/// writing each before-image back (or truncating, for a pure-extension
	/// undo where the before-image is empty), then truncates the recorder
	/// to `back_pos`.
	pub fn rollback(&self, back_pos: u64) -> Result<()> {
		let mut cursor = self.cursor.lock();
		while *cursor > back_pos {
			let mut back_ptr_buf = [0u8; 8];
			self.file.read_at(&mut back_ptr_buf, *cursor - 8)?;
			let entry_start = read_u64(&back_ptr_buf, 0);
			let entry_len = (*cursor - 8 - entry_start) as usize;
			let mut entry_buf = vec![0u8; entry_len];
			self.file.read_at(&mut entry_buf, entry_start)?;
			let entry = deserialize_entry(&entry_buf);
			if entry.before_image.is_empty() {
				self.truncate_target(&entry.path, entry.pos)?;
			} else {
				self.write_target(&entry.path, entry.pos, &entry.before_image)?;
			}
			*cursor = entry_start;
		}
		self.file.write_at(&END_MARKER, back_pos)?;
		self.file.truncate(back_pos + 8)?;
		*cursor = back_pos;
		Ok(())
	}

	pub fn cursor(&self) -> u64 {
		*self.cursor.lock()
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
	Unit,
	Read,
	Acdp,
}

/// A nestable unit of work over the recorder + tracker.
pub struct Unit {
	owner: std::thread::ThreadId,
	recorder: Arc<Recorder>,
	tracker: Arc<FileSpaceTracker>,
	back_pos_stack: Mutex<Vec<u64>>,
	broken: Mutex<Option<Arc<Error>>>,
}

impl Unit {
	pub fn open(recorder: Arc<Recorder>, tracker: Arc<FileSpaceTracker>) -> Unit {
		Unit {
			owner: std::thread::current().id(),
			recorder,
			tracker,
			back_pos_stack: Mutex::new(vec![0]),
			broken: Mutex::new(None),
		}
	}

	pub fn owner(&self) -> std::thread::ThreadId {
		self.owner
	}

	fn check_thread(&self) -> Result<()> {
		if std::thread::current().id() != self.owner {
			return Err(Error::UnsupportedOperation("unit accessed from a non-owning thread".into()));
		}
		Ok(())
	}

	fn check_broken(&self) -> Result<()> {
		if let Some(cause) = self.broken.lock().clone() {
			return Err(Error::UnitBroken(cause));
		}
		Ok(())
	}

	fn mark_broken(&self, e: Error) -> Error {
		let arced = Arc::new(e);
		*self.broken.lock() = Some(arced.clone());
		Error::UnitBroken(arced)
	}

	/// Records a before-image. Allowed from any thread (§4.5).
	pub fn record(&self, path: &Path, pos: u64, before_image: &[u8]) -> Result<()> {
		self.check_broken()?;
		self.recorder.record(path, pos, before_image).map_err(|e| self.mark_broken(e))
	}

	pub fn depth(&self) -> usize {
		self.back_pos_stack.lock().len()
	}

	/// Nests a new sub-unit; returns its nesting depth.
	pub fn nest(&self) -> Result<usize> {
		self.check_thread()?;
		self.check_broken()?;
		self.tracker.nest();
		let cursor = self.recorder.cursor();
		let mut stack = self.back_pos_stack.lock();
		stack.push(cursor);
		Ok(stack.len())
	}

	/// Commits the innermost open level. If this was the top-level unit,
	/// persists and truncates the recorder; otherwise stashes pristine
	/// states and advances the nested back-pos.
	pub fn commit(&self) -> Result<()> {
		self.check_thread()?;
		self.check_broken()?;
		let mut stack = self.back_pos_stack.lock();
		if stack.len() <= 1 {
			self.recorder.commit_top_level(&self.tracker).map_err(|e| self.mark_broken(e))?;
			self.tracker.clear_pristine();
			stack[0] = 0;
		} else {
			stack.pop();
			self.recorder.commit_nested(&self.tracker);
		}
		Ok(())
	}

	/// Rolls back the innermost open level.
	pub fn rollback(&self) -> Result<()> {
		self.check_thread()?;
		let back_pos = {
			let stack = self.back_pos_stack.lock();
			*stack.last().unwrap()
		};
		let result = self.recorder.rollback(back_pos);
		if result.is_ok() {
			self.tracker.adopt_pristine();
			self.tracker.clear_pristine();
		}
		let mut stack = self.back_pos_stack.lock();
		if stack.len() > 1 {
			self.tracker.rollback_nested();
			stack.pop();
		}
		result.map_err(|e| self.mark_broken(e))
	}

	pub fn is_broken(&self) -> Option<Arc<Error>> {
		self.broken.lock().clone()
	}
}

/// Runs the recovery path at open: if the recorder holds an incomplete
/// unit's entries, rolls it back once as if within a synthetic top-level
/// unit (§4.5 "Recovery at open").
pub fn recover(recorder: &Recorder) -> Result<()> {
	if recorder.needs_recovery() {
		log::info!(target: "acdp", "Recorder has pending entries, rolling back for recovery");
		recorder.rollback(0)?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::tracker::FileSpaceTracker;

	fn scratch(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join("acdp-test-recorder").join(name);
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn record_and_rollback_restores_bytes() {
		let dir = scratch("record_rollback");
		let target_path = dir.join("target");
		let target = FileHandle::open(&target_path, true).unwrap();
		target.truncate(8).unwrap();
		target.write_at(b"original", 0).unwrap();

		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());

		let mut before = [0u8; 8];
		target.read_at(&mut before, 0).unwrap();
		unit.record(&target_path, 0, &before).unwrap();
		target.write_at(b"mutated!", 0).unwrap();

		let mut now = [0u8; 8];
		target.read_at(&mut now, 0).unwrap();
		assert_eq!(&now, b"mutated!");

		unit.rollback().unwrap();
		let mut restored = [0u8; 8];
		target.read_at(&mut restored, 0).unwrap();
		assert_eq!(&restored, b"original");
		std::fs::remove_dir_all(&dir).unwrap();
	}

	#[test]
	fn empty_before_image_truncates_on_rollback() {
		let dir = scratch("extension_undo");
		let target_path = dir.join("target");
		let target = FileHandle::open(&target_path, true).unwrap();
		target.truncate(4).unwrap();

		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());

		unit.record(&target_path, 4, &[]).unwrap();
		target.truncate(8).unwrap();
		target.write_at(b"abcd", 4).unwrap();
		assert_eq!(target.size().unwrap(), 8);

		unit.rollback().unwrap();
		assert_eq!(target.size().unwrap(), 4);
		std::fs::remove_dir_all(&dir).unwrap();
	}

	#[test]
	fn commit_truncates_recorder_to_marker_only() {
		let dir = scratch("commit_truncate");
		let target_path = dir.join("target");
		let target = FileHandle::open(&target_path, true).unwrap();
		target.truncate(8).unwrap();

		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());
		unit.record(&target_path, 0, &[0; 8]).unwrap();
		unit.commit().unwrap();
		assert_eq!(recorder.file.size().unwrap(), 8);
		std::fs::remove_dir_all(&dir).unwrap();
	}

	#[test]
	fn nested_commit_then_outer_rollback_undoes_both() {
		let dir = scratch("nested");
		let target_path = dir.join("target");
		let target = FileHandle::open(&target_path, true).unwrap();
		target.truncate(8).unwrap();
		target.write_at(b"AAAAAAAA", 0).unwrap();

		let recorder = Arc::new(Recorder::open(&dir.join("rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());

		let mut before = [0u8; 8];
		target.read_at(&mut before, 0).unwrap();
		unit.record(&target_path, 0, &before).unwrap(); // r1
		target.write_at(b"BBBBBBBB", 0).unwrap();

		unit.nest().unwrap();
		let mut before2 = [0u8; 8];
		target.read_at(&mut before2, 0).unwrap();
		unit.record(&target_path, 0, &before2).unwrap(); // r2 (nested)
		target.write_at(b"CCCCCCCC", 0).unwrap();
		unit.commit().unwrap(); // commits nested level only

		unit.rollback().unwrap(); // outer rollback: undoes both r1 and r2
		let mut restored = [0u8; 8];
		target.read_at(&mut restored, 0).unwrap();
		assert_eq!(&restored, b"AAAAAAAA");
		std::fs::remove_dir_all(&dir).unwrap();
	}
}
