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

//! WR to RO streaming converter (§4.9): reads every live row of every WR
//! table, in table-definition order, and packs it into the RO format
//! `ro.rs` reads — one GZIP (optionally block-encrypted) block of up to
//! `ro::BLOCK_SIZE` unpacked bytes at a time, followed by that table's
//! gzipped row-pointer/block-size index, and finally the gzipped database
//! layout trailer.
//!
//! A full, not-yet-flushed block is zero-padded up to exactly `BLOCK_SIZE`
//! before it is compressed — every non-final block is therefore exactly
//! `BLOCK_SIZE` bytes once unpacked, which is what lets `ro::RoTable`
//! locate a row's block by plain division instead of a scan. Only the very
//! last block of a table is left at its natural (possibly shorter) length.

use std::path::Path;
use log::info;
use crate::crypto::{BlockCipher, CipherFactory};
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::layout::Layout as WrLayout;
use crate::ro::{self, RoLayout, RoTableMeta, TableIndex, BLOCK_SIZE};
use crate::store::{Store, TableRegistry};

fn gzip_bytes(raw: &[u8]) -> Result<Vec<u8>> {
	use flate2::write::GzEncoder;
	use flate2::Compression;
	use std::io::Write;
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(raw).map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))?;
	encoder.finish().map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))
}

/// Appends `block` (already gzip-compressed, optionally encrypted) to `file`
/// at `*cursor`, advancing `*cursor` and recording the packed size.
fn write_section(file: &FileHandle, cursor: &mut u64, bytes: &[u8]) -> Result<u64> {
	let offset = *cursor;
	file.write_at(bytes, offset)?;
	*cursor += bytes.len() as u64;
	Ok(offset)
}

fn flush_block(file: &FileHandle, cursor: &mut u64, buf: &mut Vec<u8>, pad: bool, index: &mut TableIndex, cipher: Option<&mut dyn BlockCipher>) -> Result<()> {
	if pad {
		buf.resize(BLOCK_SIZE, 0);
	}
	let packed = ro::pack_block(buf, cipher)?;
	write_section(file, cursor, &packed)?;
	index.block_sizes.push(packed.len() as u64);
	buf.clear();
	Ok(())
}

/// Converts every table in `registry` (ordered as in `wr_layout.tables`)
/// into the table data + index sections of an RO file at `out_path`, then
/// returns the assembled `RoLayout` trailer so the caller can still add
/// database-level fields before writing it.
fn convert_tables(file: &FileHandle, cursor: &mut u64, wr_layout: &WrLayout, registry: &TableRegistry, mut cipher: Option<&mut dyn BlockCipher>) -> Result<Vec<RoTableMeta>> {
	let mut metas = Vec::with_capacity(wr_layout.tables.len());
	for table_opts in &wr_layout.tables {
		let store = registry.get(&table_opts.name).ok_or_else(|| Error::MissingLayoutEntry(format!("table {} not registered", table_opts.name)))?;
		let columns: Vec<(String, crate::types::Type)> = store.layout.columns.iter().map(|c| (c.name.clone(), c.ty.clone())).collect();
		let nobs_row_ref = store.layout.nobs_row_ref;

		let data_offset = *cursor;
		let mut index = TableIndex::default();
		let mut buf = Vec::with_capacity(BLOCK_SIZE);
		let mut blocks_flushed: u64 = 0;
		let mut row_count: u64 = 0;
		let capacity = store.capacity()?;
		for row in 1..=capacity {
			if !store.is_live(row)? {
				continue;
			}
			let values = store.read_row(row)?;
			let encoded = ro::encode_row(&columns, &values, nobs_row_ref)?;
			if encoded.len() > BLOCK_SIZE {
				return Err(Error::ImplementationLimit(format!("row {} of table {} does not fit in one RO block", row, table_opts.name)));
			}
			if !buf.is_empty() && buf.len() + encoded.len() > BLOCK_SIZE {
				flush_block(file, cursor, &mut buf, true, &mut index, cipher.as_deref_mut())?;
				blocks_flushed += 1;
			}
			let global_offset = blocks_flushed * BLOCK_SIZE as u64 + buf.len() as u64;
			index.row_pointers.push(global_offset);
			buf.extend_from_slice(&encoded);
			row_count += 1;
		}
		let final_len = buf.len() as u64;
		if final_len > 0 {
			flush_block(file, cursor, &mut buf, false, &mut index, cipher.as_deref_mut())?;
		}
		index.total_unpacked_len = blocks_flushed * BLOCK_SIZE as u64 + final_len;

		let packed_index = index.pack()?;
		let index_offset = write_section(file, cursor, &packed_index)?;

		info!(target: "acdp", "converted table {} to RO: {} rows, {} blocks", table_opts.name, row_count, index.block_sizes.len());

		metas.push(RoTableMeta {
			name: table_opts.name.clone(),
			columns,
			nobs_row_ref,
			row_count,
			data_offset,
			index_offset,
			index_packed_len: packed_index.len() as u64,
		});
	}
	Ok(metas)
}

/// Streams every table in `registry` into a fresh RO file at `out_path`
/// (§4.9). `cipher` is `Some((class_name, factory))` to RO-encrypt every
/// data block and record a fresh RO cipher-challenge; `None` produces an
/// unencrypted RO file regardless of whether the source WR database was
/// encrypted (the WR cipher-challenge never carries over — §4.9 "drops the
/// WR cipher-challenge").
pub fn convert_to_ro(
	out_path: &Path,
	name: &str,
	version: Option<&str>,
	consistency_number: u32,
	wr_layout: &WrLayout,
	registry: &TableRegistry,
	cipher: Option<(&str, &dyn CipherFactory)>,
) -> Result<()> {
	let file = FileHandle::open(out_path, true)?;
	file.truncate(0)?;
	let mut cursor: u64 = 8;

	let (cipher_factory_class_name, cipher_challenge, mut block_cipher) = match cipher {
		None => (None, None, None),
		Some((class_name, factory)) => {
			let challenge = ro::compute_ro_challenge(factory)?;
			let mut enc_cipher = factory.create_ro_cipher()?;
			factory.init_ro_cipher(enc_cipher.as_mut(), true)?;
			(Some(class_name.to_string()), Some(challenge), Some(enc_cipher))
		}
	};

	let tables = convert_tables(&file, &mut cursor, wr_layout, registry, block_cipher.as_deref_mut())?;

	let ro_layout = RoLayout {
		name: name.to_string(),
		version: version.map(|v| v.to_string()),
		consistency_number,
		cipher_factory_class_name,
		cipher_challenge,
		regular_block_size: BLOCK_SIZE,
		tables,
	};
	let entries = ro_layout.to_entries();
	let packed_layout = gzip_bytes(entries.to_text().as_bytes())?;
	let layout_offset = write_section(&file, &mut cursor, &packed_layout)?;

	file.write_at(&layout_offset.to_be_bytes(), 0)?;
	file.force(true)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::Arc;
	use crate::crypto::StreamCipher;
	use crate::options::{ColumnOptions, StoreOptions, TableOptions};
	use crate::options::Options;
	use crate::recorder::{Recorder, Unit};
	use crate::tracker::FileSpaceTracker;
	use crate::types::{SimpleDesc, Type, Value};
	use crate::options::OperatingMode;
	use crate::ro::RoDatabase;

	fn scratch(name: &str) -> std::path::PathBuf {
		let dir = std::env::temp_dir().join("acdp-test-convert").join(name);
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	fn people_table(dir: &std::path::Path) -> TableOptions {
		TableOptions {
			name: "people".into(),
			columns: vec![
				ColumnOptions { name: "age".into(), ty: Type::SimpleInrow(SimpleDesc { nullable: false, byte_length: Some(2), max_size: None }), refd_table: None },
				ColumnOptions { name: "name".into(), ty: Type::SimpleOutrow(SimpleDesc { nullable: true, byte_length: None, max_size: Some(256) }), refd_table: None },
			],
			store: StoreOptions { nobs_row_ref: 4, nobs_outrow_ptr: 4, nobs_ref_count: None, fl_path: dir.join("people.fl"), vl_path: dir.join("people.vl") },
		}
	}

	#[test]
	fn convert_roundtrip_preserves_rows() {
		let dir = scratch("roundtrip");
		let recorder = Arc::new(Recorder::open(&dir.join("acdp.rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());
		let mut registry = TableRegistry::new();
		let table_opts = people_table(&dir);
		let store = Arc::new(Store::open(&table_opts, recorder.clone(), 0, 0, None).unwrap());
		registry.insert(store.clone());

		let r1 = store.insert(&[Value::Simple(vec![0, 30]), Value::Simple(b"alice".to_vec())], &unit, &tracker, &registry).unwrap();
		let r2 = store.insert(&[Value::Simple(vec![0, 40]), Value::Null], &unit, &tracker, &registry).unwrap();
		unit.commit().unwrap();
		let _ = r2;

		let mut options = Options::with_columns(&dir, 0);
		options.name = "acdp".into();
		options.tables = vec![table_opts];
		let wr_layout = crate::layout::new_layout(&options, None);

		let out_path = dir.join("out.ro");
		convert_to_ro(&out_path, "acdp", Some("1"), 1, &wr_layout, &registry, None).unwrap();

		let ro_db = RoDatabase::open(&out_path, OperatingMode::KeepOpenForever, None).unwrap();
		let ro_table = ro_db.table("people").unwrap();
		assert_eq!(ro_table.row_count(), 2);
		assert_eq!(ro_table.read_row(1).unwrap(), vec![Value::Simple(vec![0, 30]), Value::Simple(b"alice".to_vec())]);
		assert_eq!(ro_table.read_row(2).unwrap(), vec![Value::Simple(vec![0, 40]), Value::Null]);

		let _ = store.read_row(r1).unwrap();
	}

	#[test]
	fn convert_spans_multiple_blocks() {
		let dir = scratch("multiblock");
		let recorder = Arc::new(Recorder::open(&dir.join("acdp.rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());
		let mut registry = TableRegistry::new();
		let table_opts = people_table(&dir);
		let store = Arc::new(Store::open(&table_opts, recorder.clone(), 0, 0, None).unwrap());
		registry.insert(store.clone());

		let payload = vec![b'x'; 200];
		let mut rows = Vec::new();
		for i in 0..1000u16 {
			let r = store.insert(&[Value::Simple(i.to_be_bytes().to_vec()), Value::Simple(payload.clone())], &unit, &tracker, &registry).unwrap();
			rows.push(r);
		}
		unit.commit().unwrap();

		let mut options = Options::with_columns(&dir, 0);
		options.name = "acdp".into();
		options.tables = vec![table_opts];
		let wr_layout = crate::layout::new_layout(&options, None);

		let out_path = dir.join("out.ro");
		convert_to_ro(&out_path, "acdp", None, 1, &wr_layout, &registry, None).unwrap();

		let ro_db = RoDatabase::open(&out_path, OperatingMode::CloseImmediately, None).unwrap();
		let ro_table = ro_db.table("people").unwrap();
		assert_eq!(ro_table.row_count(), 1000);
		for (i, &_row) in rows.iter().enumerate() {
			let v = ro_table.read_row((i + 1) as u64).unwrap();
			assert_eq!(v[0], Value::Simple((i as u16).to_be_bytes().to_vec()));
		}
	}

	struct XorBlock(u8);
	impl BlockCipher for XorBlock {
		fn encrypt_block(&mut self, data: &mut [u8]) {
			for b in data.iter_mut() {
				*b ^= self.0;
			}
		}
		fn decrypt_block(&mut self, data: &mut [u8]) {
			self.encrypt_block(data);
		}
	}
	struct XorStream(u8);
	impl StreamCipher for XorStream {
		fn encrypt(&mut self, data: &mut [u8]) {
			for b in data.iter_mut() {
				*b ^= self.0;
			}
		}
		fn decrypt(&mut self, data: &mut [u8]) {
			self.encrypt(data);
		}
	}
	struct XorFactory;
	impl CipherFactory for XorFactory {
		fn create_and_init_wr_cipher(&self, _encrypt: bool) -> Result<Box<dyn StreamCipher>> {
			Ok(Box::new(XorStream(0x5a)))
		}
		fn create_ro_cipher(&self) -> Result<Box<dyn BlockCipher>> {
			Ok(Box::new(XorBlock(0x5a)))
		}
		fn init_ro_cipher(&self, _cipher: &mut dyn BlockCipher, _encrypt: bool) -> Result<()> {
			Ok(())
		}
	}

	#[test]
	fn convert_with_encryption_roundtrips() {
		let dir = scratch("encrypted");
		let recorder = Arc::new(Recorder::open(&dir.join("acdp.rec"), false).unwrap());
		let tracker = Arc::new(FileSpaceTracker::new());
		let unit = Unit::open(recorder.clone(), tracker.clone());
		let mut registry = TableRegistry::new();
		let table_opts = people_table(&dir);
		let store = Arc::new(Store::open(&table_opts, recorder.clone(), 0, 0, None).unwrap());
		registry.insert(store.clone());
		store.insert(&[Value::Simple(vec![0, 22]), Value::Simple(b"bob".to_vec())], &unit, &tracker, &registry).unwrap();
		unit.commit().unwrap();

		let mut options = Options::with_columns(&dir, 0);
		options.name = "acdp".into();
		options.tables = vec![table_opts];
		let wr_layout = crate::layout::new_layout(&options, None);

		let out_path = dir.join("out.ro");
		let factory = XorFactory;
		convert_to_ro(&out_path, "acdp", None, 1, &wr_layout, &registry, Some(("XorFactory", &factory))).unwrap();

		let err = RoDatabase::open(&out_path, OperatingMode::KeepOpenForever, None).unwrap_err();
		assert!(matches!(err, Error::CreationFailure(_)));

		let ro_db = RoDatabase::open(&out_path, OperatingMode::KeepOpenForever, Some(Arc::new(XorFactory))).unwrap();
		let ro_table = ro_db.table("people").unwrap();
		assert_eq!(ro_table.read_row(1).unwrap(), vec![Value::Simple(vec![0, 22]), Value::Simple(b"bob".to_vec())]);
	}
}
