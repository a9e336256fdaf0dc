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

use std::fmt;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy, one variant per failure kind the engine distinguishes.
#[derive(Debug, Clone)]
pub enum Error {
	CreationFailure(String),
	Io { path: std::path::PathBuf, unexpected_eof: bool, message: String },
	ConsistencyMismatch { expected: u32, found: u32 },
	OverlappingLock(std::path::PathBuf),
	MissingLayoutEntry(String),
	IncompatibleValue(String),
	IllegalReference { row_gap: bool },
	DeleteConstraint { row: u64 },
	MaximumExceeded(String),
	UnitBroken(Arc<Error>),
	Shutdown,
	CryptoFailure(String),
	ImplementationLimit(String),
	UnsupportedOperation(String),
	Corruption(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::CreationFailure(m) => write!(f, "failed to create database: {}", m),
			Error::Io { path, unexpected_eof, message } => {
				if *unexpected_eof {
					write!(f, "unexpected EOF on {}: {}", path.display(), message)
				} else {
					write!(f, "I/O error on {}: {}", path.display(), message)
				}
			}
			Error::ConsistencyMismatch { expected, found } =>
				write!(f, "consistency number mismatch: expected {}, found {}", expected, found),
			Error::OverlappingLock(p) => write!(f, "overlapping lock on {}", p.display()),
			Error::MissingLayoutEntry(k) => write!(f, "missing layout entry: {}", k),
			Error::IncompatibleValue(m) => write!(f, "incompatible value: {}", m),
			Error::IllegalReference { row_gap } =>
				write!(f, "illegal reference (row gap: {})", row_gap),
			Error::DeleteConstraint { row } => write!(f, "row {} still referenced, cannot delete", row),
			Error::MaximumExceeded(m) => write!(f, "maximum exceeded: {}", m),
			Error::UnitBroken(cause) => write!(f, "unit broken by previous failure: {}", cause),
			Error::Shutdown => write!(f, "database is shutting down"),
			Error::CryptoFailure(m) => write!(f, "crypto failure: {}", m),
			Error::ImplementationLimit(m) => write!(f, "implementation limit: {}", m),
			Error::UnsupportedOperation(m) => write!(f, "unsupported operation: {}", m),
			Error::Corruption(m) => write!(f, "corruption: {}", m),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		let unexpected_eof = e.kind() == std::io::ErrorKind::UnexpectedEof;
		Error::Io { path: std::path::PathBuf::new(), unexpected_eof, message: e.to_string() }
	}
}

impl Error {
	/// Attach a path to an I/O error produced via `?`/`From`.
	pub fn with_path(self, path: &std::path::Path) -> Error {
		match self {
			Error::Io { unexpected_eof, message, .. } =>
				Error::Io { path: path.to_path_buf(), unexpected_eof, message },
			other => other,
		}
	}
}

/// Extension trait to attach a path to the first I/O error in a `Result`.
pub trait PathContext<T> {
	fn path_ctx(self, path: &std::path::Path) -> Result<T>;
}

impl<T> PathContext<T> for Result<T> {
	fn path_ctx(self, path: &std::path::Path) -> Result<T> {
		self.map_err(|e| e.with_path(path))
	}
}
