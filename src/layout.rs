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

//! Layout file (§6): a text, hierarchical, line-based key-value format.
//! Sub-layouts nest via dotted key paths (`tables.people.store.nobsRowRef`)
//! and sequences via a numeric segment (`tables.people.columns.0.name`) —
//! the same flat-properties-over-a-tree technique the real ACDP engine's
//! layout file uses, chosen over a binary header (the teacher's own
//! metadata format) because this crate's layout file must stay hand-edit
//! friendly per §6.
//!
//! No counterpart crate in the retrieval pack is a closer fit than
//! hand-written parsing here (see SPEC_FULL.md); this module is therefore
//! a from-scratch recursive-descent-free flat-entry parser in the
//! teacher's general house style of hand-rolling its own codecs rather than
//! reaching for a `serde` format for on-disk structures this engine already
//! hand-maintains invariants over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::crypto::CIPHER_CHALLENGE_PROBE;
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::options::{ColumnOptions, Options, OperatingMode, StoreOptions, TableOptions};
use crate::types::{SimpleDesc, Type};

/// An ordered flat list of `key=value` entries, preserving insertion order
/// so a round-trip write reproduces the same line order a human editor saw.
#[derive(Debug, Clone, Default)]
pub struct Entries(Vec<(String, String)>);

impl Entries {
	pub fn new() -> Entries {
		Entries(Vec::new())
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.push((key.into(), value.into()));
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}

	/// Every key whose dotted path is exactly `prefix.<segment>` with no
	/// further dots, deduplicated and in first-seen order (used to discover
	/// table names / column indices without knowing them in advance).
	pub fn child_segments(&self, prefix: &str) -> Vec<String> {
		let mut seen = Vec::new();
		let dotted = format!("{}.", prefix);
		for (k, _) in &self.0 {
			if let Some(rest) = k.strip_prefix(&dotted) {
				let seg = rest.split('.').next().unwrap_or("");
				if !seg.is_empty() && !seen.contains(&seg.to_string()) {
					seen.push(seg.to_string());
				}
			}
		}
		seen
	}

	pub fn parse(text: &str) -> Result<Entries> {
		let mut out = Entries::new();
		for (lineno, raw) in text.lines().enumerate() {
			let line = raw.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let eq = line.find('=').ok_or_else(|| {
				Error::Corruption(format!("layout line {} has no '=': {:?}", lineno + 1, raw))
			})?;
			let key = line[..eq].trim().to_string();
			let value = line[eq + 1..].trim().to_string();
			out.0.push((key, value));
		}
		Ok(out)
	}

	pub fn to_text(&self) -> String {
		let mut s = String::new();
		for (k, v) in &self.0 {
			s.push_str(k);
			s.push('=');
			s.push_str(v);
			s.push('\n');
		}
		s
	}
}

/// Renders a column's `Type` into its `typeDesc` layout-entry grammar.
/// `refdTable` is not embedded here — it is stored as its own column key
/// per §6 ("refdTable (required iff the type references)").
pub fn encode_type_desc(ty: &Type) -> String {
	match ty {
		Type::SimpleInrow(d) => format!("simpleInrow(nullable={},byteLength={})", bool01(d.nullable), d.byte_length.unwrap_or(0)),
		Type::SimpleOutrow(d) => format!("simpleOutrow(nullable={},maxSize={})", bool01(d.nullable), d.max_size.unwrap_or(0)),
		Type::Reference { nullable, .. } => format!("reference(nullable={})", bool01(*nullable)),
		Type::ArrayOfSimple { element, max_size } =>
			format!("arrayOfSimple(maxSize={},element={})", max_size, encode_simple_desc(element)),
		Type::ArrayOfReference { max_size, .. } => format!("arrayOfReference(maxSize={})", max_size),
	}
}

fn encode_simple_desc(d: &SimpleDesc) -> String {
	match d.byte_length {
		Some(n) => format!("simpleInrow(nullable={},byteLength={})", bool01(d.nullable), n),
		None => format!("simpleOutrow(nullable={},maxSize={})", bool01(d.nullable), d.max_size.unwrap_or(0)),
	}
}

fn bool01(b: bool) -> &'static str {
	if b { "1" } else { "0" }
}

/// Parses a `typeDesc` string back into a `Type`. `refd_table` is supplied
/// by the caller (read from the column's own `refdTable` key) since the
/// grammar itself carries no table name.
pub fn decode_type_desc(desc: &str, refd_table: Option<String>) -> Result<Type> {
	let (head, args) = split_call(desc)?;
	let params = parse_params(args)?;
	match head {
		"simpleInrow" => Ok(Type::SimpleInrow(SimpleDesc {
			nullable: param_bool(&params, "nullable")?,
			byte_length: Some(param_u64(&params, "byteLength")? as u16),
			max_size: None,
		})),
		"simpleOutrow" => Ok(Type::SimpleOutrow(SimpleDesc {
			nullable: param_bool(&params, "nullable")?,
			byte_length: None,
			max_size: Some(param_u64(&params, "maxSize")? as u32),
		})),
		"reference" => Ok(Type::Reference {
			nullable: param_bool(&params, "nullable")?,
			refd_table: refd_table.ok_or_else(|| Error::MissingLayoutEntry("refdTable".into()))?,
		}),
		"arrayOfSimple" => {
			let max_size = param_u64(&params, "maxSize")? as u32;
			let element_desc = params.get("element").ok_or_else(|| Error::MissingLayoutEntry("element".into()))?;
			let element = match decode_type_desc(element_desc, None)? {
				Type::SimpleInrow(d) | Type::SimpleOutrow(d) => d,
				_ => return Err(Error::Corruption("arrayOfSimple element must itself be a simple type".into())),
			};
			Ok(Type::ArrayOfSimple { element, max_size })
		}
		"arrayOfReference" => Ok(Type::ArrayOfReference {
			max_size: param_u64(&params, "maxSize")? as u32,
			refd_table: refd_table.ok_or_else(|| Error::MissingLayoutEntry("refdTable".into()))?,
		}),
		other => Err(Error::Corruption(format!("unknown typeDesc head {:?}", other))),
	}
}

fn split_call(desc: &str) -> Result<(&str, &str)> {
	let open = desc.find('(').ok_or_else(|| Error::Corruption(format!("malformed typeDesc {:?}", desc)))?;
	if !desc.ends_with(')') {
		return Err(Error::Corruption(format!("malformed typeDesc {:?}", desc)));
	}
	Ok((&desc[..open], &desc[open + 1..desc.len() - 1]))
}

/// Splits `k=v,k=v,...` on top-level commas only (an `element=...(...)` value
/// may itself contain commas inside its own parens).
fn parse_params(args: &str) -> Result<BTreeMap<String, String>> {
	let mut out = BTreeMap::new();
	let mut depth = 0i32;
	let mut start = 0usize;
	let bytes = args.as_bytes();
	let mut pieces = Vec::new();
	for (i, &b) in bytes.iter().enumerate() {
		match b {
			b'(' => depth += 1,
			b')' => depth -= 1,
			b',' if depth == 0 => {
				pieces.push(&args[start..i]);
				start = i + 1;
			}
			_ => {}
		}
	}
	if start < args.len() || !args.is_empty() {
		pieces.push(&args[start..]);
	}
	for piece in pieces {
		let piece = piece.trim();
		if piece.is_empty() {
			continue;
		}
		let eq = piece.find('=').ok_or_else(|| Error::Corruption(format!("malformed typeDesc parameter {:?}", piece)))?;
		out.insert(piece[..eq].to_string(), piece[eq + 1..].to_string());
	}
	Ok(out)
}

fn param_bool(params: &BTreeMap<String, String>, key: &str) -> Result<bool> {
	Ok(param_str(params, key)? == "1")
}
fn param_u64(params: &BTreeMap<String, String>, key: &str) -> Result<u64> {
	param_str(params, key)?.parse().map_err(|_| Error::Corruption(format!("{} is not numeric", key)))
}
fn param_str<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
	params.get(key).map(|s| s.as_str()).ok_or_else(|| Error::MissingLayoutEntry(key.into()))
}

/// Snapshot of a WR table's persisted store metadata, written back into the
/// layout entries alongside the table definition.
#[derive(Debug, Clone)]
pub struct WrStoreSnapshot {
	pub nobs_row_ref: u8,
	pub nobs_outrow_ptr: u8,
	pub nobs_ref_count: Option<u8>,
	pub fl_path: PathBuf,
	pub vl_path: PathBuf,
	pub gap_head: u64,
	pub gap_count: u64,
}

/// A fully parsed layout file (§6 "Layout file").
#[derive(Debug, Clone)]
pub struct Layout {
	pub name: String,
	pub version: Option<String>,
	pub consistency_number: u32,
	pub cipher_factory_class_name: Option<String>,
	pub cipher_factory_classpath: Option<String>,
	pub cipher_challenge: Option<String>,
	pub force_write_commit: bool,
	pub rec_file: PathBuf,
	pub tables: Vec<TableOptions>,
}

impl Layout {
	/// Validates the layout per §4.10: non-empty name/version, a parseable
	/// consistency number (already typed as `u32` here so only emptiness and
	/// table-non-emptiness remain to check), and cipher-challenge/class
	/// consistency (a challenge implies a class and vice versa).
	pub fn validate(&self) -> Result<()> {
		if self.name.is_empty() {
			return Err(Error::CreationFailure("layout name is empty".into()));
		}
		if let Some(v) = &self.version {
			if v.is_empty() {
				return Err(Error::CreationFailure("layout version is empty".into()));
			}
		}
		if self.cipher_challenge.is_some() != self.cipher_factory_class_name.is_some() {
			return Err(Error::CreationFailure("cipherChallenge and cipherFactoryClassName must both be present or both absent".into()));
		}
		if self.tables.is_empty() {
			return Err(Error::CreationFailure("layout has no tables".into()));
		}
		for t in &self.tables {
			if t.name.is_empty() || t.name.starts_with('#') {
				return Err(Error::CreationFailure(format!("table name {:?} is invalid", t.name)));
			}
		}
		Ok(())
	}

	pub fn to_entries(&self, snapshots: &std::collections::HashMap<String, WrStoreSnapshot>) -> Entries {
		let mut e = Entries::new();
		e.set("name", &self.name);
		if let Some(v) = &self.version {
			e.set("version", v);
		}
		e.set("consistencyNumber", self.consistency_number.to_string());
		if let Some(c) = &self.cipher_factory_class_name {
			e.set("cipherFactoryClassName", c);
		}
		if let Some(c) = &self.cipher_factory_classpath {
			e.set("cipherFactoryClasspath", c);
		}
		if let Some(c) = &self.cipher_challenge {
			e.set("cipherChallenge", c);
		}
		e.set("forceWriteCommit", if self.force_write_commit { "on" } else { "off" });
		e.set("recFile", self.rec_file.display().to_string());
		for t in &self.tables {
			let base = format!("tables.{}", t.name);
			for (i, c) in t.columns.iter().enumerate() {
				let cbase = format!("{}.columns.{}", base, i);
				e.set(format!("{}.name", cbase), &c.name);
				e.set(format!("{}.typeDesc", cbase), encode_type_desc(&c.ty));
				if let Some(r) = &c.refd_table {
					e.set(format!("{}.refdTable", cbase), r);
				}
			}
			let sbase = format!("{}.store", base);
			if let Some(snap) = snapshots.get(&t.name) {
				e.set(format!("{}.nobsRowRef", sbase), snap.nobs_row_ref.to_string());
				e.set(format!("{}.nobsOutrowPtr", sbase), snap.nobs_outrow_ptr.to_string());
				if let Some(n) = snap.nobs_ref_count {
					e.set(format!("{}.nobsRefCount", sbase), n.to_string());
				}
				e.set(format!("{}.flFile", sbase), snap.fl_path.display().to_string());
				e.set(format!("{}.vlFile", sbase), snap.vl_path.display().to_string());
				e.set(format!("{}.flGapHead", sbase), snap.gap_head.to_string());
				e.set(format!("{}.flGapCount", sbase), snap.gap_count.to_string());
			} else {
				e.set(format!("{}.nobsRowRef", sbase), t.store.nobs_row_ref.to_string());
				e.set(format!("{}.nobsOutrowPtr", sbase), t.store.nobs_outrow_ptr.to_string());
				if let Some(n) = t.store.nobs_ref_count {
					e.set(format!("{}.nobsRefCount", sbase), n.to_string());
				}
				e.set(format!("{}.flFile", sbase), t.store.fl_path.display().to_string());
				e.set(format!("{}.vlFile", sbase), t.store.vl_path.display().to_string());
				e.set(format!("{}.flGapHead", sbase), "0");
				e.set(format!("{}.flGapCount", sbase), "0");
			}
		}
		e
	}

	pub fn from_entries(e: &Entries) -> Result<(Layout, std::collections::HashMap<String, WrStoreSnapshot>)> {
		let name = e.get("name").ok_or_else(|| Error::MissingLayoutEntry("name".into()))?.to_string();
		let version = e.get("version").map(|s| s.to_string());
		let consistency_number: u32 = e
			.get("consistencyNumber")
			.ok_or_else(|| Error::MissingLayoutEntry("consistencyNumber".into()))?
			.parse()
			.map_err(|_| Error::Corruption("consistencyNumber is not an integer".into()))?;
		let cipher_factory_class_name = e.get("cipherFactoryClassName").map(|s| s.to_string());
		let cipher_factory_classpath = e.get("cipherFactoryClasspath").map(|s| s.to_string());
		let cipher_challenge = e.get("cipherChallenge").map(|s| s.to_string());
		let force_write_commit = e.get("forceWriteCommit").map(|s| s == "on").unwrap_or(false);
		let rec_file = PathBuf::from(e.get("recFile").ok_or_else(|| Error::MissingLayoutEntry("recFile".into()))?);

		let mut tables = Vec::new();
		let mut snapshots = std::collections::HashMap::new();
		for table_name in e.child_segments("tables") {
			let base = format!("tables.{}", table_name);
			let mut columns = Vec::new();
			for idx in e.child_segments(&format!("{}.columns", base)) {
				let cbase = format!("{}.columns.{}", base, idx);
				let cname = e.get(&format!("{}.name", cbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.name", cbase)))?.to_string();
				let type_desc = e.get(&format!("{}.typeDesc", cbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.typeDesc", cbase)))?;
				let refd_table = e.get(&format!("{}.refdTable", cbase)).map(|s| s.to_string());
				let ty = decode_type_desc(type_desc, refd_table.clone())?;
				columns.push(ColumnOptions { name: cname, ty, refd_table });
			}
			let sbase = format!("{}.store", base);
			let nobs_row_ref: u8 = e.get(&format!("{}.nobsRowRef", sbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.nobsRowRef", sbase)))?.parse().map_err(|_| Error::Corruption("nobsRowRef not numeric".into()))?;
			let nobs_outrow_ptr: u8 = e.get(&format!("{}.nobsOutrowPtr", sbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.nobsOutrowPtr", sbase)))?.parse().map_err(|_| Error::Corruption("nobsOutrowPtr not numeric".into()))?;
			let nobs_ref_count: Option<u8> = match e.get(&format!("{}.nobsRefCount", sbase)) {
				Some(s) => Some(s.parse().map_err(|_| Error::Corruption("nobsRefCount not numeric".into()))?),
				None => None,
			};
			let fl_path = PathBuf::from(e.get(&format!("{}.flFile", sbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.flFile", sbase)))?);
			let vl_path = PathBuf::from(e.get(&format!("{}.vlFile", sbase)).ok_or_else(|| Error::MissingLayoutEntry(format!("{}.vlFile", sbase)))?);
			let gap_head: u64 = e.get(&format!("{}.flGapHead", sbase)).unwrap_or("0").parse().unwrap_or(0);
			let gap_count: u64 = e.get(&format!("{}.flGapCount", sbase)).unwrap_or("0").parse().unwrap_or(0);

			snapshots.insert(table_name.clone(), WrStoreSnapshot { nobs_row_ref, nobs_outrow_ptr, nobs_ref_count, fl_path: fl_path.clone(), vl_path: vl_path.clone(), gap_head, gap_count });
			tables.push(TableOptions {
				name: table_name,
				columns,
				store: StoreOptions { nobs_row_ref, nobs_outrow_ptr, nobs_ref_count, fl_path, vl_path },
			});
		}

		Ok((
			Layout { name, version, consistency_number, cipher_factory_class_name, cipher_factory_classpath, cipher_challenge, force_write_commit, rec_file, tables },
			snapshots,
		))
	}
}

/// Reads the layout file at `path`.
pub fn read(path: &Path) -> Result<(Layout, std::collections::HashMap<String, WrStoreSnapshot>)> {
	let file = FileHandle::open(path, false)?;
	let size = file.size()?;
	let mut buf = vec![0u8; size as usize];
	if size > 0 {
		file.read_at(&mut buf, 0)?;
	}
	let text = String::from_utf8(buf).map_err(|_| Error::Corruption("layout file is not valid UTF-8".into()))?;
	let entries = Entries::parse(&text)?;
	let (layout, snapshots) = Layout::from_entries(&entries)?;
	layout.validate()?;
	Ok((layout, snapshots))
}

/// Writes `layout` (with live store snapshots) to `path`, replacing any
/// existing content.
pub fn write(path: &Path, layout: &Layout, snapshots: &std::collections::HashMap<String, WrStoreSnapshot>) -> Result<()> {
	layout.validate()?;
	let entries = layout.to_entries(snapshots);
	let text = entries.to_text();
	let file = FileHandle::open(path, true)?;
	file.truncate(0)?;
	file.write_at(text.as_bytes(), 0)?;
	Ok(())
}

/// Builds a fresh `Layout` for a brand-new database from `options`, with an
/// optional cipher challenge computed by the caller (§6 cipher-challenge).
pub fn new_layout(options: &Options, cipher_challenge: Option<String>) -> Layout {
	Layout {
		name: options.name.clone(),
		version: options.version.clone(),
		consistency_number: options.consistency_number,
		cipher_factory_class_name: options.cipher_factory_class_name.clone(),
		cipher_factory_classpath: None,
		cipher_challenge,
		force_write_commit: options.force_write_commit,
		rec_file: options.rec_file.clone(),
		tables: options.tables.clone(),
	}
}

pub fn mode_is_valid_for_wr(mode: OperatingMode) -> bool {
	mode.valid_for_wr()
}

#[cfg(test)]
mod test {
	use super::*;

	fn scratch(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join("acdp-test-layout").join(name);
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn type_desc_roundtrip_simple_and_reference() {
		let inrow = Type::SimpleInrow(SimpleDesc { nullable: true, byte_length: Some(4), max_size: None });
		let desc = encode_type_desc(&inrow);
		assert_eq!(desc, "simpleInrow(nullable=1,byteLength=4)");
		let back = decode_type_desc(&desc, None).unwrap();
		assert!(matches!(back, Type::SimpleInrow(d) if d.nullable && d.byte_length == Some(4)));

		let reference = Type::Reference { refd_table: "parents".into(), nullable: true };
		let desc = encode_type_desc(&reference);
		let back = decode_type_desc(&desc, Some("parents".into())).unwrap();
		assert!(matches!(back, Type::Reference { refd_table, nullable: true } if refd_table == "parents"));
	}

	#[test]
	fn type_desc_roundtrip_array_of_simple() {
		let element = SimpleDesc { nullable: true, byte_length: None, max_size: Some(64) };
		let ty = Type::ArrayOfSimple { element, max_size: 10 };
		let desc = encode_type_desc(&ty);
		assert_eq!(desc, "arrayOfSimple(maxSize=10,element=simpleOutrow(nullable=1,maxSize=64))");
		let back = decode_type_desc(&desc, None).unwrap();
		match back {
			Type::ArrayOfSimple { element, max_size } => {
				assert_eq!(max_size, 10);
				assert!(element.nullable);
				assert_eq!(element.max_size, Some(64));
			}
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn layout_write_read_roundtrip() {
		let dir = scratch("roundtrip");
		let columns = vec![ColumnOptions { name: "a".into(), ty: Type::SimpleInrow(SimpleDesc { nullable: false, byte_length: Some(4), max_size: None }), refd_table: None }];
		let table = TableOptions {
			name: "t".into(),
			columns,
			store: StoreOptions { nobs_row_ref: 4, nobs_outrow_ptr: 4, nobs_ref_count: None, fl_path: dir.join("t.fl"), vl_path: dir.join("t.vl") },
		};
		let layout = Layout {
			name: "acdp".into(),
			version: Some("1".into()),
			consistency_number: 1,
			cipher_factory_class_name: None,
			cipher_factory_classpath: None,
			cipher_challenge: None,
			force_write_commit: false,
			rec_file: dir.join("acdp.rec"),
			tables: vec![table],
		};
		let path = dir.join("layout");
		write(&path, &layout, &std::collections::HashMap::new()).unwrap();
		let (read_back, _snap) = read(&path).unwrap();
		assert_eq!(read_back.name, "acdp");
		assert_eq!(read_back.tables.len(), 1);
		assert_eq!(read_back.tables[0].columns[0].name, "a");
	}

	#[test]
	fn validate_rejects_empty_tables() {
		let layout = Layout {
			name: "acdp".into(),
			version: None,
			consistency_number: 1,
			cipher_factory_class_name: None,
			cipher_factory_classpath: None,
			cipher_challenge: None,
			force_write_commit: false,
			rec_file: PathBuf::from("x"),
			tables: vec![],
		};
		assert!(layout.validate().is_err());
	}

	#[test]
	fn validate_rejects_mismatched_cipher_fields() {
		let mut layout = Layout {
			name: "acdp".into(),
			version: None,
			consistency_number: 1,
			cipher_factory_class_name: None,
			cipher_factory_classpath: None,
			cipher_challenge: Some("abc".into()),
			force_write_commit: false,
			rec_file: PathBuf::from("x"),
			tables: vec![TableOptions { name: "t".into(), columns: vec![], store: StoreOptions::default() }],
		};
		assert!(layout.validate().is_err());
		layout.cipher_factory_class_name = Some("SomeFactory".into());
		assert!(layout.validate().is_ok());
	}

	#[test]
	fn probe_constant_matches_spec() {
		assert_eq!(CIPHER_CHALLENGE_PROBE.len(), 11);
	}
}
