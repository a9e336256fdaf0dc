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

//! Type system (§4.1, §9 "Polymorphism over column types"). Every column
//! type is one variant of the tagged `Type` enum below; logical
//! interpretation of the raw bytes (the "logical type factory") is an
//! embedder concern and out of scope (§1) — this crate only moves bytes.

use crate::codec::{min_nobs_for, read_uint_be, write_uint_be};
use crate::error::{Error, Result};

/// A table-scoped row reference. `0` denotes a NULL ref.
pub type Ref = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
	Inrow,
	Outrow,
}

/// A simple (non-reference, non-array) column type.
#[derive(Debug, Clone)]
pub struct SimpleDesc {
	pub nullable: bool,
	/// `Some(n)` for inrow fixed width; `None` for outrow (length-prefixed, heap-resident).
	pub byte_length: Option<u16>,
	/// Maximum payload size for outrow values, used to size the VL length prefix.
	pub max_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum Type {
	SimpleInrow(SimpleDesc),
	SimpleOutrow(SimpleDesc),
	Reference { refd_table: String, nullable: bool },
	ArrayOfSimple { element: SimpleDesc, max_size: u32 },
	ArrayOfReference { refd_table: String, max_size: u32 },
}

/// A decoded column value. Simple payloads are already-encoded bytes; the
/// logical interpretation of those bytes belongs to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
	Null,
	Simple(Vec<u8>),
	Reference(Ref),
	ArraySimple(Vec<Option<Vec<u8>>>),
	ArrayReference(Vec<Ref>),
}

impl Type {
	pub fn scheme(&self) -> Scheme {
		match self {
			Type::SimpleInrow(_) => Scheme::Inrow,
			Type::SimpleOutrow(_) => Scheme::Outrow,
			Type::Reference { .. } => Scheme::Inrow,
			Type::ArrayOfSimple { .. } => Scheme::Outrow,
			Type::ArrayOfReference { .. } => Scheme::Outrow,
		}
	}

	pub fn nullable(&self) -> bool {
		match self {
			Type::SimpleInrow(d) | Type::SimpleOutrow(d) => d.nullable,
			Type::Reference { nullable, .. } => *nullable,
			Type::ArrayOfSimple { .. } | Type::ArrayOfReference { .. } => true,
		}
	}

	pub fn max_size(&self) -> Option<u32> {
		match self {
			Type::SimpleInrow(d) | Type::SimpleOutrow(d) => d.max_size,
			Type::Reference { .. } => None,
			Type::ArrayOfSimple { max_size, .. } | Type::ArrayOfReference { max_size, .. } => Some(*max_size),
		}
	}

	/// Fixed byte width for inrow storage, or `None` when variable
	/// (outrow: stored as a `(length, pointer)` pair of this width plus a
	/// type-derived length field, never stored inline).
	pub fn byte_length(&self, nobs_row_ref: u8, nobs_outrow_ptr: u8) -> Option<u16> {
		match self {
			Type::SimpleInrow(d) => d.byte_length,
			Type::SimpleOutrow(_) => None,
			Type::Reference { .. } => Some(nobs_row_ref as u16),
			Type::ArrayOfSimple { .. } | Type::ArrayOfReference { .. } => {
				let _ = nobs_outrow_ptr;
				None
			}
		}
	}

	/// Number of bytes used for the outrow length prefix, derived from `max_size`.
	pub fn size_len(&self) -> u8 {
		match self.max_size() {
			Some(m) => min_nobs_for(m as u64),
			None => 4,
		}
	}

	pub fn is_compatible(&self, value: &Value) -> bool {
		match (self, value) {
			(_, Value::Null) => self.nullable(),
			(Type::SimpleInrow(d), Value::Simple(b)) => d.byte_length.map_or(true, |n| b.len() == n as usize),
			(Type::SimpleOutrow(d), Value::Simple(b)) =>
				d.max_size.map_or(true, |m| b.len() <= m as usize),
			(Type::Reference { .. }, Value::Reference(_)) => true,
			(Type::ArrayOfSimple { max_size, .. }, Value::ArraySimple(elems)) => elems.len() as u32 <= *max_size,
			(Type::ArrayOfReference { max_size, .. }, Value::ArrayReference(elems)) => elems.len() as u32 <= *max_size,
			_ => false,
		}
	}

	/// Encodes an outrow (or array) value into its VL heap-block payload.
	///
	/// `Value::Null` never reaches this: a null outrow column is represented
	/// at the FL row layer by a zero `(length, pointer)` pair with no VL
	/// block allocated at all, so there is no byte sequence here that could
	/// be confused with a present-but-empty array.
	pub fn encode_outrow(&self, value: &Value, nobs_row_ref: u8) -> Result<Vec<u8>> {
		if !self.is_compatible(value) {
			return Err(Error::IncompatibleValue(format!("value not compatible with {:?}", self)));
		}
		let size_len = self.size_len();
		match (self, value) {
			(Type::SimpleOutrow(_), Value::Simple(b)) => Ok(b.clone()),
			(Type::ArrayOfSimple { element, .. }, Value::ArraySimple(elems)) =>
				encode_array_simple(element, elems, size_len),
			(Type::ArrayOfReference { .. }, Value::ArrayReference(elems)) => {
				let _ = size_len;
				Ok(encode_array_reference(elems, nobs_row_ref))
			}
			_ => Err(Error::IncompatibleValue("null or mismatched outrow value".into())),
		}
	}

	/// Decodes an outrow (or array) payload back into a logical value.
	/// `Value::Null` is never produced here — the caller resolves a null
	/// outrow column from a zero `(length, pointer)` pair before reaching
	/// the heap at all (see the note on `encode_outrow`).
	pub fn decode_outrow(&self, bytes: &[u8], nobs_row_ref: u8) -> Result<Value> {
		let size_len = self.size_len();
		match self {
			Type::SimpleOutrow(_) => Ok(Value::Simple(bytes.to_vec())),
			Type::ArrayOfSimple { element, .. } => decode_array_simple(element, bytes, size_len),
			Type::ArrayOfReference { .. } => decode_array_reference(bytes, nobs_row_ref),
			_ => Err(Error::IncompatibleValue("not an outrow type".into())),
		}
	}

	/// Encodes an inrow fixed-width value (simple or reference) into `buf`.
	pub fn encode_inrow_into(&self, value: &Value, buf: &mut [u8], nobs_row_ref: u8) -> Result<()> {
		if !self.is_compatible(value) {
			return Err(Error::IncompatibleValue(format!("value not compatible with {:?}", self)));
		}
		match (self, value) {
			(Type::SimpleInrow(d), Value::Simple(b)) => {
				let n = d.byte_length.expect("inrow simple has fixed width") as usize;
				buf[..n].copy_from_slice(&b[..n]);
				Ok(())
			}
			(Type::SimpleInrow(d), Value::Null) => {
				let n = d.byte_length.expect("inrow simple has fixed width") as usize;
				for b in buf[..n].iter_mut() {
					*b = 0;
				}
				Ok(())
			}
			(Type::Reference { .. }, Value::Reference(r)) => {
				write_uint_be(buf, nobs_row_ref, *r);
				Ok(())
			}
			(Type::Reference { .. }, Value::Null) => {
				write_uint_be(buf, nobs_row_ref, 0);
				Ok(())
			}
			_ => Err(Error::IncompatibleValue("not an inrow type".into())),
		}
	}

	pub fn decode_inrow(&self, buf: &[u8], nobs_row_ref: u8) -> Result<Value> {
		match self {
			Type::SimpleInrow(_) => Ok(Value::Simple(buf.to_vec())),
			Type::Reference { .. } => {
				let r = read_uint_be(buf, nobs_row_ref);
				if r == 0 {
					Ok(Value::Null)
				} else {
					Ok(Value::Reference(r))
				}
			}
			_ => Err(Error::IncompatibleValue("not an inrow type".into())),
		}
	}
}

fn encode_size(n: usize, size_len: u8) -> Vec<u8> {
	let mut out = vec![0u8; size_len as usize];
	write_uint_be(&mut out, size_len, n as u64);
	out
}

fn encode_array_simple(element: &SimpleDesc, elems: &[Option<Vec<u8>>], size_len: u8) -> Result<Vec<u8>> {
	let mut out = encode_size(elems.len(), size_len);
	if element.nullable {
		let mut bitmap = vec![0u8; crate::codec::bitmap_len(elems.len())];
		for (i, e) in elems.iter().enumerate() {
			if e.is_some() {
				crate::codec::bitmap_set(&mut bitmap, i, true);
			}
		}
		out.extend_from_slice(&bitmap);
	}
	for e in elems {
		match (e, element.byte_length) {
			(Some(b), Some(n)) => {
				if b.len() != n as usize {
					return Err(Error::IncompatibleValue("array element has wrong fixed width".into()));
				}
				out.extend_from_slice(b);
			}
			(Some(b), None) => {
				let len_len = element.max_size.map(|m| min_nobs_for(m as u64)).unwrap_or(4);
				out.extend_from_slice(&encode_size(b.len(), len_len));
				out.extend_from_slice(b);
			}
			(None, _) => {
				if !element.nullable {
					return Err(Error::IncompatibleValue("null element in non-nullable array".into()));
				}
			}
		}
	}
	Ok(out)
}

fn decode_array_simple(element: &SimpleDesc, bytes: &[u8], size_len: u8) -> Result<Value> {
	let mut off = 0usize;
	let n = read_uint_be(&bytes[0..size_len as usize], size_len) as usize;
	off += size_len as usize;
	let mut bitmap_bytes = 0usize;
	if element.nullable {
		bitmap_bytes = crate::codec::bitmap_len(n);
	}
	let bitmap = &bytes[off..off + bitmap_bytes];
	off += bitmap_bytes;
	let mut elems = Vec::with_capacity(n);
	for i in 0..n {
		let is_null = element.nullable && !crate::codec::bitmap_get(bitmap, i);
		if is_null {
			elems.push(None);
			continue;
		}
		match element.byte_length {
			Some(w) => {
				let b = bytes[off..off + w as usize].to_vec();
				off += w as usize;
				elems.push(Some(b));
			}
			None => {
				let len_len = element.max_size.map(|m| min_nobs_for(m as u64)).unwrap_or(4);
				let len = read_uint_be(&bytes[off..off + len_len as usize], len_len) as usize;
				off += len_len as usize;
				let b = bytes[off..off + len].to_vec();
				off += len;
				elems.push(Some(b));
			}
		}
	}
	Ok(Value::ArraySimple(elems))
}

/// A[RT] has no length prefix (§3 "Array storage"): the element count is
/// implied by the VL block's own `(length, pointer)` size, `len / nobsRowRef`.
fn encode_array_reference(elems: &[Ref], nobs_row_ref: u8) -> Vec<u8> {
	let mut out = Vec::with_capacity(elems.len() * nobs_row_ref as usize);
	for r in elems {
		let mut slot = vec![0u8; nobs_row_ref as usize];
		write_uint_be(&mut slot, nobs_row_ref, *r);
		out.extend_from_slice(&slot);
	}
	out
}

fn decode_array_reference(bytes: &[u8], nobs_row_ref: u8) -> Result<Value> {
	let n = bytes.len() / nobs_row_ref as usize;
	let mut off = 0usize;
	let mut elems = Vec::with_capacity(n);
	for _ in 0..n {
		let r = read_uint_be(&bytes[off..off + nobs_row_ref as usize], nobs_row_ref);
		off += nobs_row_ref as usize;
		elems.push(r);
	}
	Ok(Value::ArrayReference(elems))
}

#[cfg(test)]
mod test {
	use super::*;

	fn fixed(n: u16, nullable: bool) -> SimpleDesc {
		SimpleDesc { nullable, byte_length: Some(n), max_size: None }
	}

	#[test]
	fn inrow_roundtrip() {
		let ty = Type::SimpleInrow(fixed(4, false));
		let v = Value::Simple(vec![1, 2, 3, 4]);
		let mut buf = [0u8; 4];
		ty.encode_inrow_into(&v, &mut buf, 4).unwrap();
		assert_eq!(ty.decode_inrow(&buf, 4).unwrap(), v);
	}

	#[test]
	fn reference_null_roundtrip() {
		let ty = Type::Reference { refd_table: "t".into(), nullable: true };
		let mut buf = [0u8; 4];
		ty.encode_inrow_into(&Value::Null, &mut buf, 4).unwrap();
		assert_eq!(ty.decode_inrow(&buf, 4).unwrap(), Value::Null);
		ty.encode_inrow_into(&Value::Reference(7), &mut buf, 4).unwrap();
		assert_eq!(ty.decode_inrow(&buf, 4).unwrap(), Value::Reference(7));
	}

	#[test]
	fn outrow_empty_array_of_simple() {
		let element = fixed(2, true);
		let ty = Type::ArrayOfSimple { element: element.clone(), max_size: 64 };
		let v = Value::ArraySimple(vec![]);
		let enc = ty.encode_outrow(&v, 4).unwrap();
		assert_eq!(enc.len(), 1); // just a zero size byte, no bitmap/payload
		let dec = ty.decode_outrow(&enc, 4).unwrap();
		assert_eq!(dec, Value::ArraySimple(vec![]));
	}

	#[test]
	fn outrow_array_of_simple_all_null() {
		let element = fixed(2, true);
		let ty = Type::ArrayOfSimple { element, max_size: 64 };
		let v = Value::ArraySimple(vec![None; 5]);
		let enc = ty.encode_outrow(&v, 4).unwrap();
		// size byte + bitmap(ceil(5/8)=1) + 0 payload bytes
		assert_eq!(enc.len(), 1 + 1);
		let dec = ty.decode_outrow(&enc, 4).unwrap();
		assert_eq!(dec, v);
	}

	#[test]
	fn array_of_reference_roundtrip() {
		let ty = Type::ArrayOfReference { refd_table: "t".into(), max_size: 10 };
		let v = Value::ArrayReference(vec![1, 0, 3]);
		let enc = ty.encode_outrow(&v, 4).unwrap();
		let dec = ty.decode_outrow(&enc, 4).unwrap();
		assert_eq!(dec, v);
	}
}
