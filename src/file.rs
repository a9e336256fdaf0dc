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

//! File I/O facade (§4.2): a path-tagged file handle with read/write/lock/
//! truncate/force, an overlap-aware in-file copy helper, and a channel-pool
//! provider that releases handles per the operating-mode policy (§6).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use fs2::FileExt;
use parking_lot::Mutex;
use crate::error::{Error, PathContext, Result};
use crate::options::OperatingMode;

/// A path-tagged file handle. Every error is reported with the offending
/// path and an explicit unexpected-EOF flag (§4.2).
pub struct FileHandle {
	path: PathBuf,
	file: File,
}

impl FileHandle {
	pub fn open(path: &Path, writable: bool) -> Result<FileHandle> {
		let file = OpenOptions::new()
			.create(writable)
			.read(true)
			.write(writable)
			.open(path)
			.path_ctx(path)?;
		disable_read_ahead(&file).path_ctx(path)?;
		Ok(FileHandle { path: path.to_path_buf(), file })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn size(&self) -> Result<u64> {
		Ok(self.file.metadata().path_ctx(&self.path)?.len())
	}

	#[cfg(unix)]
	pub fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
		use std::os::unix::fs::FileExt as _;
		self.file.read_exact_at(buf, pos).path_ctx(&self.path)
	}

	#[cfg(windows)]
	pub fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
		use std::os::windows::fs::FileExt as _;
		let mut off = 0;
		while off < buf.len() {
			let n = self.file.seek_read(&mut buf[off..], pos + off as u64).path_ctx(&self.path)?;
			if n == 0 {
				return Err(Error::Io { path: self.path.clone(), unexpected_eof: true, message: "short read".into() });
			}
			off += n;
		}
		Ok(())
	}

	#[cfg(unix)]
	pub fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
		use std::os::unix::fs::FileExt as _;
		self.file.write_all_at(buf, pos).path_ctx(&self.path)
	}

	#[cfg(windows)]
	pub fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
		use std::os::windows::fs::FileExt as _;
		let mut off = 0;
		while off < buf.len() {
			let n = self.file.seek_write(&buf[off..], pos + off as u64).path_ctx(&self.path)?;
			off += n;
		}
		Ok(())
	}

	pub fn truncate(&self, len: u64) -> Result<()> {
		self.file.set_len(len).path_ctx(&self.path)
	}

	/// Forces data (and optionally metadata) to stable storage.
	pub fn force(&self, metadata: bool) -> Result<()> {
		if metadata {
			self.file.sync_all().path_ctx(&self.path)
		} else {
			self.file.sync_data().path_ctx(&self.path)
		}
	}

	pub fn try_lock(&self, shared: bool) -> Result<()> {
		let r = if shared { self.file.try_lock_shared() } else { self.file.try_lock_exclusive() };
		r.map_err(|_| Error::OverlappingLock(self.path.clone()))
	}

	pub fn unlock(&self) -> Result<()> {
		FileExt::unlock(&self.file).path_ctx(&self.path)
	}

	/// Overlap-aware copy within the same file: copies `len` bytes from
	/// `src` to `dst`, correctly handling forward-overlapping regions by
	/// copying right-to-left when `dst > src`.
	pub fn copy_block(&self, src: u64, len: u64, dst: u64, buffer: &mut Vec<u8>) -> Result<()> {
		if len == 0 {
			return Ok(());
		}
		let chunk = buffer.len().max(1);
		buffer.resize(chunk, 0);
		if dst <= src || dst >= src + len {
			let mut done = 0u64;
			while done < len {
				let n = std::cmp::min(chunk as u64, len - done) as usize;
				self.read_at(&mut buffer[..n], src + done)?;
				self.write_at(&buffer[..n], dst + done)?;
				done += n as u64;
			}
		} else {
			let mut remaining = len;
			while remaining > 0 {
				let n = std::cmp::min(chunk as u64, remaining) as usize;
				let this_src = src + remaining - n as u64;
				let this_dst = dst + remaining - n as u64;
				self.read_at(&mut buffer[..n], this_src)?;
				self.write_at(&buffer[..n], this_dst)?;
				remaining -= n as u64;
			}
		}
		Ok(())
	}
}

#[cfg(target_os = "macos")]
fn disable_read_ahead(file: &File) -> std::io::Result<()> {
	use std::os::unix::io::AsRawFd;
	if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_RDAHEAD, 0) } != 0 {
		Err(std::io::Error::last_os_error())
	} else {
		Ok(())
	}
}

#[cfg(not(target_os = "macos"))]
fn disable_read_ahead(_file: &File) -> std::io::Result<()> {
	Ok(())
}

enum Lease {
	Open(FileHandle),
	Closed { path: PathBuf, writable: bool },
}

struct PooledEntry {
	lease: Lease,
	last_used: Instant,
}

/// Pools open handles for the process according to the operating-mode
/// policy (§4.2, §6): immediate close, delayed close (>= 10ms idle), or
/// kept open for the database's lifetime.
pub struct ChannelProvider {
	mode: OperatingMode,
	entries: Mutex<std::collections::HashMap<PathBuf, PooledEntry>>,
}

impl ChannelProvider {
	pub fn new(mode: OperatingMode) -> ChannelProvider {
		ChannelProvider { mode, entries: Mutex::new(std::collections::HashMap::new()) }
	}

	/// Runs `f` with a handle to `path`, opening it if necessary and
	/// applying the idle-close policy afterward.
	pub fn with_handle<T>(&self, path: &Path, writable: bool, f: impl FnOnce(&FileHandle) -> Result<T>) -> Result<T> {
		self.reap_idle();
		let mut entries = self.entries.lock();
		let entry = entries
			.entry(path.to_path_buf())
			.or_insert_with(|| PooledEntry { lease: Lease::Closed { path: path.to_path_buf(), writable }, last_used: Instant::now() });
		if let Lease::Closed { path, writable } = &entry.lease {
			entry.lease = Lease::Open(FileHandle::open(path, *writable)?);
		}
		entry.last_used = Instant::now();
		let result = match &entry.lease {
			Lease::Open(h) => f(h),
			Lease::Closed { .. } => unreachable!(),
		};
		if matches!(self.mode, OperatingMode::CloseImmediately) {
			entry.lease = Lease::Closed { path: path.to_path_buf(), writable };
		}
		result
	}

	fn reap_idle(&self) {
		if let OperatingMode::KeepOpenMs(ms) = self.mode {
			let mut entries = self.entries.lock();
			let deadline = Duration::from_millis(ms as u64);
			for (path, entry) in entries.iter_mut() {
				if matches!(entry.lease, Lease::Open(_)) && entry.last_used.elapsed() >= deadline {
					entry.lease = Lease::Closed { path: path.clone(), writable: true };
				}
			}
		}
	}

	/// Releases (closes) every handle, used on database shutdown.
	pub fn close_all(&self) {
		let mut entries = self.entries.lock();
		for (path, entry) in entries.iter_mut() {
			entry.lease = Lease::Closed { path: path.clone(), writable: true };
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn read_write_roundtrip() {
		let dir = std::env::temp_dir().join("acdp-test-file-rw");
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("f");
		let h = FileHandle::open(&path, true).unwrap();
		h.truncate(16).unwrap();
		h.write_at(b"hello world!", 0).unwrap();
		let mut buf = [0u8; 12];
		h.read_at(&mut buf, 0).unwrap();
		assert_eq!(&buf, b"hello world!");
		std::fs::remove_dir_all(&dir).unwrap();
	}

	#[test]
	fn overlap_copy_forward() {
		let dir = std::env::temp_dir().join("acdp-test-file-copy");
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("f");
		let h = FileHandle::open(&path, true).unwrap();
		h.truncate(32).unwrap();
		h.write_at(b"0123456789", 0).unwrap();
		let mut buffer = vec![0u8; 3];
		// overlapping forward copy: dst > src, same region
		h.copy_block(0, 10, 5, &mut buffer).unwrap();
		let mut buf = [0u8; 15];
		h.read_at(&mut buf, 0).unwrap();
		assert_eq!(&buf[5..15], b"0123456789");
		std::fs::remove_dir_all(&dir).unwrap();
	}
}
