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

//! ACDP: an embedded, single-process storage engine for typed tabular data.
//!
//! A database is a set of named tables, each a fixed-length row file (FL)
//! backed by a variable-length heap (VL) for outrow columns, plus a
//! write-ahead recorder giving every mutation transactional, nestable
//! undo. It comes in two flavors: WR, a writable directory of files opened
//! through [`db::Database`], and RO, a single packed, gzip-compressed (and
//! optionally encrypted) file produced from a WR database by [`convert`]
//! and read back through [`ro::RoDatabase`].

pub mod codec;
pub mod crypto;
pub mod display;
pub mod error;
pub mod file;
pub mod heap;
pub mod layout;
pub mod options;
pub mod recorder;
pub mod ro;
pub mod convert;
pub mod store;
pub mod sync;
pub mod table;
pub mod tracker;
pub mod types;
pub mod db;

pub use db::{Database, Flavor};
pub use error::{Error, Result};
pub use options::{ColumnOptions, OperatingMode, Options, StoreOptions, TableOptions};
pub use types::{Ref, Type, Value};
