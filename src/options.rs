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

use std::path::PathBuf;
use crate::types::Type;

/// Operating-mode code passed to `Database::open`, §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
	/// Keep channel handles open for `ms` after idle (floored to 10ms).
	KeepOpenMs(u32),
	/// Close file handles immediately after idle.
	CloseImmediately,
	/// Keep handles open for the lifetime of the database.
	KeepOpenForever,
	/// RO only: load the whole packed image into memory.
	RoMemoryPacked,
	/// RO only: unpack the whole table into memory once.
	RoMemoryUnpacked,
}

impl OperatingMode {
	pub fn from_code(code: i64) -> Self {
		match code {
			n if n > 0 => OperatingMode::KeepOpenMs(std::cmp::max(n as u32, 10)),
			0 => OperatingMode::CloseImmediately,
			-1 => OperatingMode::KeepOpenForever,
			-2 => OperatingMode::RoMemoryPacked,
			-3 => OperatingMode::RoMemoryUnpacked,
			_ => OperatingMode::KeepOpenForever,
		}
	}

	pub fn valid_for_wr(&self) -> bool {
		!matches!(self, OperatingMode::RoMemoryPacked | OperatingMode::RoMemoryUnpacked)
	}
}

impl Default for OperatingMode {
	fn default() -> Self {
		OperatingMode::KeepOpenForever
	}
}

/// A column definition as it appears in a table sublayout (§6).
#[derive(Debug, Clone)]
pub struct ColumnOptions {
	pub name: String,
	pub ty: Type,
	pub refd_table: Option<String>,
}

/// Per-table store sizing, §6 "WR store sublayout".
#[derive(Debug, Clone)]
pub struct StoreOptions {
	pub nobs_row_ref: u8,
	pub nobs_outrow_ptr: u8,
	pub nobs_ref_count: Option<u8>,
	pub fl_path: PathBuf,
	pub vl_path: PathBuf,
}

impl Default for StoreOptions {
	fn default() -> Self {
		StoreOptions {
			nobs_row_ref: 4,
			nobs_outrow_ptr: 4,
			nobs_ref_count: None,
			fl_path: PathBuf::new(),
			vl_path: PathBuf::new(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct TableOptions {
	pub name: String,
	pub columns: Vec<ColumnOptions>,
	pub store: StoreOptions,
}

/// Database-level open options (§6 layout-file database keys).
#[derive(Debug, Clone)]
pub struct Options {
	pub path: PathBuf,
	pub name: String,
	pub version: Option<String>,
	pub consistency_number: u32,
	pub cipher_factory_class_name: Option<String>,
	pub force_write_commit: bool,
	pub rec_file: PathBuf,
	pub tables: Vec<TableOptions>,
	pub mode: OperatingMode,
}

impl Options {
	pub fn with_columns(path: &std::path::Path, num_tables: usize) -> Options {
		let tables = (0..num_tables)
			.map(|i| TableOptions {
				name: format!("t{}", i),
				columns: Vec::new(),
				store: StoreOptions::default(),
			})
			.collect();
		Options {
			path: path.into(),
			name: "acdp".into(),
			version: None,
			consistency_number: 1,
			cipher_factory_class_name: None,
			force_write_commit: false,
			rec_file: path.join("acdp.rec"),
			tables,
			mode: OperatingMode::default(),
		}
	}
}
