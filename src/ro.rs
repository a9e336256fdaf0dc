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

//! RO store (§4.8): a compressed, read-only rendering of a table, packed
//! into fixed-size (`BLOCK_SIZE` unpacked) GZIP blocks via `flate2`,
//! optionally block-encrypted, addressed by a per-table row-pointer index.
//!
//! File layout:
//!
//! ```text
//! [8 bytes: layoutOffset, big-endian]
//! for each table: [packed block]* [gzipped (row pointers || block sizes)]
//! at layoutOffset: gzipped database layout (text, §6 grammar reused from layout.rs)
//! ```
//!
//! A row never spans two blocks — the writer (`convert.rs`) closes a block
//! early rather than split a row, so random-access reads only ever need to
//! decompress the one block a row lives in.

use std::collections::HashMap;
use std::convert::TryInto;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use log::trace;
use crate::codec::{bitmap_get, bitmap_len, bitmap_set, read_uint_be, write_uint_be};
use crate::crypto::{BlockCipher, CipherFactory, CIPHER_CHALLENGE_PROBE};
use crate::display::base36;
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::layout::{decode_type_desc, encode_type_desc, Entries};
use crate::options::OperatingMode;
use crate::types::{Scheme, Type, Value};

/// Unpacked size of one RO block; the last block of a table is typically shorter.
pub const BLOCK_SIZE: usize = 65535;

fn refd_table_of(ty: &Type) -> Option<String> {
	match ty {
		Type::Reference { refd_table, .. } | Type::ArrayOfReference { refd_table, .. } => Some(refd_table.clone()),
		_ => None,
	}
}

/// Encodes one row's logical values into its RO wire form: a leading
/// nullable-bitmap (over every nullable column, inrow or outrow alike) then,
/// for each non-null column, its fixed inrow bytes or a `[length][payload]`
/// outrow pair — no outrow pointer, since RO rows store their payload inline.
pub fn encode_row(columns: &[(String, Type)], values: &[Value], nobs_row_ref: u8) -> Result<Vec<u8>> {
	if values.len() != columns.len() {
		return Err(Error::IncompatibleValue("row value count does not match column count".into()));
	}
	let nullable_idx: Vec<usize> = columns.iter().enumerate().filter(|(_, (_, ty))| ty.nullable()).map(|(i, _)| i).collect();
	let mut bitmap = vec![0u8; bitmap_len(nullable_idx.len())];
	for (bit, &i) in nullable_idx.iter().enumerate() {
		if matches!(values[i], Value::Null) {
			bitmap_set(&mut bitmap, bit, true);
		}
	}
	let mut out = bitmap;
	for (i, (_, ty)) in columns.iter().enumerate() {
		if matches!(values[i], Value::Null) {
			continue;
		}
		match ty.scheme() {
			Scheme::Inrow => {
				let width = ty.byte_length(nobs_row_ref, 0).ok_or_else(|| Error::ImplementationLimit("inrow column with no fixed width".into()))? as usize;
				let mut buf = vec![0u8; width];
				ty.encode_inrow_into(&values[i], &mut buf, nobs_row_ref)?;
				out.extend_from_slice(&buf);
			}
			Scheme::Outrow => {
				let bytes = ty.encode_outrow(&values[i], nobs_row_ref)?;
				let size_len = ty.size_len();
				let mut len_buf = vec![0u8; size_len as usize];
				write_uint_be(&mut len_buf, size_len, bytes.len() as u64);
				out.extend_from_slice(&len_buf);
				out.extend_from_slice(&bytes);
			}
		}
	}
	Ok(out)
}

/// Decodes one row from its RO wire form (the exact byte slice this row
/// occupies, as delimited by the row-pointer index).
pub fn decode_row(columns: &[(String, Type)], bytes: &[u8], nobs_row_ref: u8) -> Result<Vec<Value>> {
	let nullable_idx: Vec<usize> = columns.iter().enumerate().filter(|(_, (_, ty))| ty.nullable()).map(|(i, _)| i).collect();
	let bitmap_bytes = bitmap_len(nullable_idx.len());
	if bytes.len() < bitmap_bytes {
		return Err(Error::Corruption("RO row shorter than its nullable bitmap".into()));
	}
	let bitmap = &bytes[..bitmap_bytes];
	let mut off = bitmap_bytes;
	let mut is_null = vec![false; columns.len()];
	for (bit, &i) in nullable_idx.iter().enumerate() {
		is_null[i] = bitmap_get(bitmap, bit);
	}
	let mut out = Vec::with_capacity(columns.len());
	for (i, (_, ty)) in columns.iter().enumerate() {
		if is_null[i] {
			out.push(Value::Null);
			continue;
		}
		match ty.scheme() {
			Scheme::Inrow => {
				let width = ty.byte_length(nobs_row_ref, 0).ok_or_else(|| Error::ImplementationLimit("inrow column with no fixed width".into()))? as usize;
				let v = ty.decode_inrow(&bytes[off..off + width], nobs_row_ref)?;
				off += width;
				out.push(v);
			}
			Scheme::Outrow => {
				let size_len = ty.size_len();
				let len = read_uint_be(&bytes[off..off + size_len as usize], size_len) as usize;
				off += size_len as usize;
				let v = ty.decode_outrow(&bytes[off..off + len], nobs_row_ref)?;
				off += len;
				out.push(v);
			}
		}
	}
	Ok(out)
}

/// GZIP-compresses `raw`, then optionally block-encrypts the compressed bytes.
pub fn pack_block(raw: &[u8], cipher: Option<&mut dyn BlockCipher>) -> Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(raw).map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))?;
	let mut packed = encoder.finish().map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))?;
	if let Some(c) = cipher {
		c.encrypt_block(&mut packed);
	}
	Ok(packed)
}

/// Reverses `pack_block`: optionally decrypts, then GZIP-decompresses to
/// exactly `unpacked_len` bytes.
pub fn unpack_block(packed: &[u8], unpacked_len: usize, cipher: Option<&mut dyn BlockCipher>) -> Result<Vec<u8>> {
	let mut buf = packed.to_vec();
	if let Some(c) = cipher {
		c.decrypt_block(&mut buf);
	}
	let mut decoder = GzDecoder::new(&buf[..]);
	let mut out = Vec::with_capacity(unpacked_len);
	decoder.read_to_end(&mut out).map_err(|e| Error::Corruption(format!("gzip decompression failed: {}", e)))?;
	if out.len() != unpacked_len {
		return Err(Error::Corruption(format!("unpacked block length mismatch: expected {}, got {}", unpacked_len, out.len())));
	}
	Ok(out)
}

fn gzip_bytes(raw: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(raw).map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))?;
	encoder.finish().map_err(|e| Error::Corruption(format!("gzip compression failed: {}", e)))
}

fn gunzip_bytes(packed: &[u8]) -> Result<Vec<u8>> {
	let mut decoder = GzDecoder::new(packed);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).map_err(|e| Error::Corruption(format!("gzip decompression failed: {}", e)))?;
	Ok(out)
}

/// Computes the RO cipher-challenge (§6), analogous to the WR one but run
/// through the embedder's block cipher instead of its stream cipher.
pub fn compute_ro_challenge(factory: &dyn CipherFactory) -> Result<String> {
	let mut cipher = factory.create_ro_cipher()?;
	factory.init_ro_cipher(cipher.as_mut(), true)?;
	let mut probe = CIPHER_CHALLENGE_PROBE.to_vec();
	cipher.encrypt_block(&mut probe);
	Ok(base36(&probe))
}

pub fn verify_ro_challenge(factory: &dyn CipherFactory, stored: &str) -> Result<()> {
	let computed = compute_ro_challenge(factory)?;
	if computed != stored {
		return Err(Error::CreationFailure("RO cipher-challenge mismatch".into()));
	}
	Ok(())
}

/// Per-table row-pointer index plus per-block packed sizes, stored as its
/// own gzipped section (§4.9 "gzipped row-pointers||block-sizes").
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
	pub row_pointers: Vec<u64>,
	pub block_sizes: Vec<u64>,
	pub total_unpacked_len: u64,
}

impl TableIndex {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::new();
		out.extend_from_slice(&(self.row_pointers.len() as u64).to_be_bytes());
		for p in &self.row_pointers {
			out.extend_from_slice(&p.to_be_bytes());
		}
		out.extend_from_slice(&(self.block_sizes.len() as u64).to_be_bytes());
		for b in &self.block_sizes {
			out.extend_from_slice(&b.to_be_bytes());
		}
		out.extend_from_slice(&self.total_unpacked_len.to_be_bytes());
		out
	}

	pub fn from_bytes(buf: &[u8]) -> Result<TableIndex> {
		let mut off = 0usize;
		let read_u64 = |buf: &[u8], off: &mut usize| -> Result<u64> {
			if *off + 8 > buf.len() {
				return Err(Error::Corruption("truncated RO table index".into()));
			}
			let v = u64::from_be_bytes(buf[*off..*off + 8].try_into().unwrap());
			*off += 8;
			Ok(v)
		};
		let n_pointers = read_u64(buf, &mut off)? as usize;
		let mut row_pointers = Vec::with_capacity(n_pointers);
		for _ in 0..n_pointers {
			row_pointers.push(read_u64(buf, &mut off)?);
		}
		let n_blocks = read_u64(buf, &mut off)? as usize;
		let mut block_sizes = Vec::with_capacity(n_blocks);
		for _ in 0..n_blocks {
			block_sizes.push(read_u64(buf, &mut off)?);
		}
		let total_unpacked_len = read_u64(buf, &mut off)?;
		Ok(TableIndex { row_pointers, block_sizes, total_unpacked_len })
	}

	pub fn pack(&self) -> Result<Vec<u8>> {
		gzip_bytes(&self.to_bytes())
	}

	pub fn unpack(packed: &[u8]) -> Result<TableIndex> {
		TableIndex::from_bytes(&gunzip_bytes(packed)?)
	}
}

/// One table's RO metadata, as recorded in the database layout trailer.
#[derive(Debug, Clone)]
pub struct RoTableMeta {
	pub name: String,
	pub columns: Vec<(String, Type)>,
	pub nobs_row_ref: u8,
	pub row_count: u64,
	pub data_offset: u64,
	pub index_offset: u64,
	pub index_packed_len: u64,
}

/// The RO database layout trailer (§6, §4.9).
#[derive(Debug, Clone)]
pub struct RoLayout {
	pub name: String,
	pub version: Option<String>,
	pub consistency_number: u32,
	pub cipher_factory_class_name: Option<String>,
	pub cipher_challenge: Option<String>,
	pub regular_block_size: usize,
	pub tables: Vec<RoTableMeta>,
}

impl RoLayout {
	pub fn to_entries(&self) -> Entries {
		let mut e = Entries::new();
		e.set("name", &self.name);
		if let Some(v) = &self.version {
			e.set("version", v);
		}
		e.set("consistencyNumber", self.consistency_number.to_string());
		if let Some(c) = &self.cipher_factory_class_name {
			e.set("cipherFactoryClassName", c);
		}
		if let Some(c) = &self.cipher_challenge {
			e.set("cipherChallenge", c);
		}
		e.set("regularBlockSize", self.regular_block_size.to_string());
		for t in &self.tables {
			let base = format!("tables.{}", t.name);
			e.set(format!("{}.nobsRowRef", base), t.nobs_row_ref.to_string());
			e.set(format!("{}.rowCount", base), t.row_count.to_string());
			e.set(format!("{}.dataOffset", base), t.data_offset.to_string());
			e.set(format!("{}.indexOffset", base), t.index_offset.to_string());
			e.set(format!("{}.indexPackedLen", base), t.index_packed_len.to_string());
			for (i, (name, ty)) in t.columns.iter().enumerate() {
				let cbase = format!("{}.columns.{}", base, i);
				e.set(format!("{}.name", cbase), name);
				e.set(format!("{}.typeDesc", cbase), encode_type_desc(ty));
				if let Some(r) = refd_table_of(ty) {
					e.set(format!("{}.refdTable", cbase), r);
				}
			}
		}
		e
	}

	pub fn from_entries(e: &Entries) -> Result<RoLayout> {
		let name = e.get("name").ok_or_else(|| Error::MissingLayoutEntry("name".into()))?.to_string();
		let version = e.get("version").map(|s| s.to_string());
		let consistency_number: u32 = e
			.get("consistencyNumber")
			.ok_or_else(|| Error::MissingLayoutEntry("consistencyNumber".into()))?
			.parse()
			.map_err(|_| Error::Corruption("consistencyNumber is not an integer".into()))?;
		let cipher_factory_class_name = e.get("cipherFactoryClassName").map(|s| s.to_string());
		let cipher_challenge = e.get("cipherChallenge").map(|s| s.to_string());
		let regular_block_size: usize = e.get("regularBlockSize").unwrap_or(&BLOCK_SIZE.to_string()).parse().unwrap_or(BLOCK_SIZE);

		let mut tables = Vec::new();
		for table_name in e.child_segments("tables") {
			let base = format!("tables.{}", table_name);
			let nobs_row_ref: u8 = e.get(&format!("{}.nobsRowRef", base)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.nobsRowRef", base)))?.parse().map_err(|_| Error::Corruption("nobsRowRef not numeric".into()))?;
			let row_count: u64 = e.get(&format!("{}.rowCount", base)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.rowCount", base)))?.parse().map_err(|_| Error::Corruption("rowCount not numeric".into()))?;
			let data_offset: u64 = e.get(&format!("{}.dataOffset", base)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.dataOffset", base)))?.parse().map_err(|_| Error::Corruption("dataOffset not numeric".into()))?;
			let index_offset: u64 = e.get(&format!("{}.indexOffset", base)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.indexOffset", base)))?.parse().map_err(|_| Error::Corruption("indexOffset not numeric".into()))?;
			let index_packed_len: u64 = e.get(&format!("{}.indexPackedLen", base)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.indexPackedLen", base)))?.parse().map_err(|_| Error::Corruption("indexPackedLen not numeric".into()))?;
			let mut columns = Vec::new();
			for idx in e.child_segments(&format!("{}.columns", base)) {
				let cbase = format!("{}.columns.{}", base, idx);
				let cname = e.get(&format!("{}.name", cbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.name", cbase)))?.to_string();
				let type_desc = e.get(&format!("{}.typeDesc", cbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.typeDesc", cbase)))?;
				let refd_table = e.get(&format!("{}.refdTable", cbase)).map(|s| s.to_string());
				let ty = decode_type_desc(type_desc, refd_table)?;
				columns.push((cname, ty));
			}
			tables.push(RoTableMeta { name: table_name, columns, nobs_row_ref, row_count, data_offset, index_offset, index_packed_len });
		}
		Ok(RoLayout { name, version, consistency_number, cipher_factory_class_name, cipher_challenge, regular_block_size, tables })
	}
}

enum TableData {
	FilePacked { file: Arc<FileHandle>, buffered: bool, cache: Mutex<Option<(usize, Vec<u8>)>> },
	MemoryPacked { blocks: Vec<Vec<u8>> },
	MemoryUnpacked { data: Vec<u8> },
}

/// A read-only table view. Every mutation entry point is absent by
/// construction — only `read_row`/`row_count`/`columns` exist (§4.8 "strictly
/// read-only").
pub struct RoTable {
	meta: RoTableMeta,
	index: TableIndex,
	data: TableData,
	cipher_factory: Option<Arc<dyn CipherFactory>>,
}

impl RoTable {
	pub fn name(&self) -> &str {
		&self.meta.name
	}

	pub fn columns(&self) -> &[(String, Type)] {
		&self.meta.columns
	}

	pub fn row_count(&self) -> u64 {
		self.meta.row_count
	}

	fn block_count(&self) -> usize {
		self.index.block_sizes.len()
	}

	fn unpacked_len_of(&self, block_idx: usize) -> usize {
		if block_idx + 1 == self.block_count() {
			(self.index.total_unpacked_len - (block_idx as u64) * BLOCK_SIZE as u64) as usize
		} else {
			BLOCK_SIZE
		}
	}

	fn with_decrypt_cipher<T>(&self, f: impl FnOnce(Option<&mut dyn BlockCipher>) -> Result<T>) -> Result<T> {
		match &self.cipher_factory {
			None => f(None),
			Some(factory) => {
				let mut cipher = factory.create_ro_cipher()?;
				factory.init_ro_cipher(cipher.as_mut(), false)?;
				f(Some(cipher.as_mut()))
			}
		}
	}

	fn read_packed_block_from_file(&self, file: &FileHandle, block_idx: usize) -> Result<Vec<u8>> {
		let start: u64 = self.index.block_sizes[..block_idx].iter().sum();
		let len = self.index.block_sizes[block_idx] as usize;
		let mut buf = vec![0u8; len];
		file.read_at(&mut buf, self.meta.data_offset + start)?;
		Ok(buf)
	}

	fn get_unpacked_block(&self, block_idx: usize) -> Result<Vec<u8>> {
		match &self.data {
			TableData::MemoryUnpacked { data } => {
				let start = block_idx * BLOCK_SIZE;
				let len = self.unpacked_len_of(block_idx);
				Ok(data[start..start + len].to_vec())
			}
			TableData::MemoryPacked { blocks } => {
				let packed = &blocks[block_idx];
				let unpacked_len = self.unpacked_len_of(block_idx);
				self.with_decrypt_cipher(|cipher| unpack_block(packed, unpacked_len, cipher))
			}
			TableData::FilePacked { file, buffered, cache } => {
				if *buffered {
					{
						let guard = cache.lock();
						if let Some((idx, data)) = &*guard {
							if *idx == block_idx {
								return Ok(data.clone());
							}
						}
					}
					let packed = self.read_packed_block_from_file(file, block_idx)?;
					let unpacked_len = self.unpacked_len_of(block_idx);
					trace!(target: "acdp", "{}: decoding block {} ({} bytes packed)", self.name(), block_idx, packed.len());
					let unpacked = self.with_decrypt_cipher(|cipher| unpack_block(&packed, unpacked_len, cipher))?;
					*cache.lock() = Some((block_idx, unpacked.clone()));
					Ok(unpacked)
				} else {
					let packed = self.read_packed_block_from_file(file, block_idx)?;
					let unpacked_len = self.unpacked_len_of(block_idx);
					trace!(target: "acdp", "{}: decoding block {} ({} bytes packed)", self.name(), block_idx, packed.len());
					self.with_decrypt_cipher(|cipher| unpack_block(&packed, unpacked_len, cipher))
				}
			}
		}
	}

	/// Reads row `row` (1-based, as in the WR numbering it was converted from).
	pub fn read_row(&self, row: u64) -> Result<Vec<Value>> {
		if row == 0 || row > self.meta.row_count {
			return Err(Error::IllegalReference { row_gap: true });
		}
		let idx = (row - 1) as usize;
		let start = self.index.row_pointers[idx];
		let end = if idx + 1 < self.index.row_pointers.len() { self.index.row_pointers[idx + 1] } else { self.index.total_unpacked_len };
		let block_idx = (start / BLOCK_SIZE as u64) as usize;
		let block = self.get_unpacked_block(block_idx)?;
		let block_base = block_idx as u64 * BLOCK_SIZE as u64;
		let local_start = (start - block_base) as usize;
		let local_end = (end - block_base) as usize;
		decode_row(&self.meta.columns, &block[local_start..local_end], self.meta.nobs_row_ref)
	}
}

/// A read-only database: the layout trailer plus one `RoTable` per table,
/// each materialized per the operating mode given to `open` (§6).
pub struct RoDatabase {
	pub layout: RoLayout,
	tables: HashMap<String, RoTable>,
}

impl RoDatabase {
	pub fn open(path: &Path, mode: OperatingMode, cipher_factory: Option<Arc<dyn CipherFactory>>) -> Result<RoDatabase> {
		let file = Arc::new(FileHandle::open(path, false)?);
		let total_len = file.size()?;
		if total_len < 8 {
			return Err(Error::Corruption("RO file shorter than its header".into()));
		}
		let mut header = [0u8; 8];
		file.read_at(&mut header, 0)?;
		let layout_offset = u64::from_be_bytes(header);
		if layout_offset >= total_len {
			return Err(Error::Corruption("RO layout offset points past end of file".into()));
		}
		let mut packed_layout = vec![0u8; (total_len - layout_offset) as usize];
		file.read_at(&mut packed_layout, layout_offset)?;
		let layout_text = gunzip_bytes(&packed_layout)?;
		let entries = Entries::parse(&String::from_utf8(layout_text).map_err(|_| Error::Corruption("RO layout is not valid UTF-8".into()))?)?;
		let layout = RoLayout::from_entries(&entries)?;

		if let Some(stored) = &layout.cipher_challenge {
			let factory = cipher_factory.as_deref().ok_or_else(|| Error::CreationFailure("RO database is encrypted but no cipher factory was supplied".into()))?;
			verify_ro_challenge(factory, stored)?;
		}

		let mut tables = HashMap::new();
		for meta in &layout.tables {
			let mut packed_index = vec![0u8; meta.index_packed_len as usize];
			file.read_at(&mut packed_index, meta.index_offset)?;
			let index = TableIndex::unpack(&packed_index)?;

			let data = match mode {
				OperatingMode::RoMemoryPacked => {
					let mut blocks = Vec::with_capacity(index.block_sizes.len());
					let mut off = meta.data_offset;
					for &sz in &index.block_sizes {
						let mut buf = vec![0u8; sz as usize];
						file.read_at(&mut buf, off)?;
						off += sz;
						blocks.push(buf);
					}
					TableData::MemoryPacked { blocks }
				}
				OperatingMode::RoMemoryUnpacked => {
					let mut data = Vec::with_capacity(index.total_unpacked_len as usize);
					let mut off = meta.data_offset;
					for (block_idx, &sz) in index.block_sizes.iter().enumerate() {
						let mut buf = vec![0u8; sz as usize];
						file.read_at(&mut buf, off)?;
						off += sz;
						let unpacked_len = if block_idx + 1 == index.block_sizes.len() {
							(index.total_unpacked_len - (block_idx as u64) * BLOCK_SIZE as u64) as usize
						} else {
							BLOCK_SIZE
						};
						let unpacked = match &cipher_factory {
							None => unpack_block(&buf, unpacked_len, None)?,
							Some(factory) => {
								let mut cipher = factory.create_ro_cipher()?;
								factory.init_ro_cipher(cipher.as_mut(), false)?;
								unpack_block(&buf, unpacked_len, Some(cipher.as_mut()))?
							}
						};
						data.extend_from_slice(&unpacked);
					}
					TableData::MemoryUnpacked { data }
				}
				_ => TableData::FilePacked {
					file: file.clone(),
					buffered: !matches!(mode, OperatingMode::CloseImmediately),
					cache: Mutex::new(None),
				},
			};

			tables.insert(meta.name.clone(), RoTable { meta: meta.clone(), index, data, cipher_factory: cipher_factory.clone() });
		}

		Ok(RoDatabase { layout, tables })
	}

	pub fn table(&self, name: &str) -> Option<&RoTable> {
		self.tables.get(name)
	}

	pub fn table_names(&self) -> impl Iterator<Item = &str> {
		self.tables.keys().map(|s| s.as_str())
	}
}

/// The RO format is strictly read-only; every call into this path from an
/// embedder asking for a mutation raises this directly.
pub fn reject_mutation() -> Error {
	Error::UnsupportedOperation("RO tables are read-only".into())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::types::SimpleDesc;

	fn cols() -> Vec<(String, Type)> {
		vec![
			("a".into(), Type::SimpleInrow(SimpleDesc { nullable: false, byte_length: Some(4), max_size: None })),
			("b".into(), Type::SimpleOutrow(SimpleDesc { nullable: true, byte_length: None, max_size: Some(64) })),
		]
	}

	#[test]
	fn row_roundtrip_with_null_outrow() {
		let columns = cols();
		let values = vec![Value::Simple(vec![0, 0, 0, 7]), Value::Null];
		let enc = encode_row(&columns, &values, 4).unwrap();
		let dec = decode_row(&columns, &enc, 4).unwrap();
		assert_eq!(dec, values);
	}

	#[test]
	fn row_roundtrip_with_present_outrow() {
		let columns = cols();
		let values = vec![Value::Simple(vec![1, 2, 3, 4]), Value::Simple(b"hello".to_vec())];
		let enc = encode_row(&columns, &values, 4).unwrap();
		let dec = decode_row(&columns, &enc, 4).unwrap();
		assert_eq!(dec, values);
	}

	#[test]
	fn block_pack_unpack_roundtrip() {
		let raw = vec![7u8; 10_000];
		let packed = pack_block(&raw, None).unwrap();
		assert!(packed.len() < raw.len());
		let unpacked = unpack_block(&packed, raw.len(), None).unwrap();
		assert_eq!(unpacked, raw);
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

	#[test]
	fn block_pack_unpack_with_cipher() {
		let raw = b"the quick brown fox jumps over the lazy dog".to_vec();
		let mut enc_cipher = XorBlock(0x42);
		let packed = pack_block(&raw, Some(&mut enc_cipher)).unwrap();
		let mut dec_cipher = XorBlock(0x42);
		let unpacked = unpack_block(&packed, raw.len(), Some(&mut dec_cipher)).unwrap();
		assert_eq!(unpacked, raw);
	}

	#[test]
	fn table_index_roundtrip() {
		let idx = TableIndex { row_pointers: vec![0, 17, 42], block_sizes: vec![100, 57], total_unpacked_len: 90 };
		let packed = idx.pack().unwrap();
		let back = TableIndex::unpack(&packed).unwrap();
		assert_eq!(back.row_pointers, idx.row_pointers);
		assert_eq!(back.block_sizes, idx.block_sizes);
		assert_eq!(back.total_unpacked_len, idx.total_unpacked_len);
	}

	#[test]
	fn ro_layout_roundtrip_through_entries() {
		let layout = RoLayout {
			name: "acdp".into(),
			version: Some("1".into()),
			consistency_number: 1,
			cipher_factory_class_name: None,
			cipher_challenge: None,
			regular_block_size: BLOCK_SIZE,
			tables: vec![RoTableMeta {
				name: "t".into(),
				columns: cols(),
				nobs_row_ref: 4,
				row_count: 3,
				data_offset: 8,
				index_offset: 1000,
				index_packed_len: 40,
			}],
		};
		let entries = layout.to_entries();
		let back = RoLayout::from_entries(&entries).unwrap();
		assert_eq!(back.name, "acdp");
		assert_eq!(back.tables.len(), 1);
		assert_eq!(back.tables[0].row_count, 3);
		assert_eq!(back.tables[0].columns[1].0, "b");
	}
}
