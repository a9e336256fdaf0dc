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

//! Crypto provider (§4.3). The `Cipher` construction API is explicitly out
//! of scope (§1) — an embedder supplies a `CipherFactory`; this module only
//! owns the pooling discipline and the cipher-challenge probe around it.

use std::sync::Arc;
use parking_lot::Mutex;
use crate::display::base36;
use crate::error::{Error, Result};

/// The fixed 11-byte probe encrypted (and base-36 rendered) to produce the
/// cipher-challenge layout entry (§6).
pub const CIPHER_CHALLENGE_PROBE: [u8; 11] = [0x30, 0x7f, 0xd5, 0x83, 0xb2, 0x03, 0xe5, 0x66, 0x59, 0x4c, 0xf8];

/// A byte-oriented stream cipher used for WR (per-thread, reusable).
pub trait StreamCipher: Send {
	fn encrypt(&mut self, data: &mut [u8]);
	fn decrypt(&mut self, data: &mut [u8]);
}

/// A block cipher used for RO.
pub trait BlockCipher: Send {
	fn encrypt_block(&mut self, data: &mut [u8]);
	fn decrypt_block(&mut self, data: &mut [u8]);
}

/// Capability the embedder injects (§9 "Reflection-based class loading"
/// reduced to an injected trait).
pub trait CipherFactory: Send + Sync {
	fn create_and_init_wr_cipher(&self, encrypt: bool) -> Result<Box<dyn StreamCipher>>;
	fn create_ro_cipher(&self) -> Result<Box<dyn BlockCipher>>;
	fn init_ro_cipher(&self, cipher: &mut dyn BlockCipher, encrypt: bool) -> Result<()>;
}

/// Runs the factory's self-test: round-trips a small fixed probe through a
/// freshly created WR cipher (decrypt(encrypt(probe)) == probe) and checks
/// stream-preservation of input length.
pub fn self_test(factory: &dyn CipherFactory) -> Result<()> {
	let probe = [0x11u8, 0x22, 0x33, 0x44, 0x55];
	let mut enc_cipher = factory.create_and_init_wr_cipher(true)?;
	let mut buf = probe;
	enc_cipher.encrypt(&mut buf);
	if buf.len() != probe.len() {
		return Err(Error::CryptoFailure("stream cipher changed buffer length".into()));
	}
	let mut dec_cipher = factory.create_and_init_wr_cipher(false)?;
	dec_cipher.decrypt(&mut buf);
	if buf != probe {
		return Err(Error::CryptoFailure("cipher self-test round-trip failed".into()));
	}
	Ok(())
}

/// Computes the base-36 cipher-challenge for `factory`, to be persisted in
/// the layout at database creation time.
pub fn compute_challenge(factory: &dyn CipherFactory) -> Result<String> {
	let mut cipher = factory.create_and_init_wr_cipher(true)?;
	let mut probe = CIPHER_CHALLENGE_PROBE;
	cipher.encrypt(&mut probe);
	Ok(base36(&probe))
}

/// Re-encrypts the probe and compares against the stored challenge (§8 law 6).
pub fn verify_challenge(factory: &dyn CipherFactory, stored: &str) -> Result<()> {
	let computed = compute_challenge(factory)?;
	if computed != stored {
		return Err(Error::CreationFailure("cipher-challenge mismatch".into()));
	}
	Ok(())
}

/// Per-database crypto provider: one shared encrypt cipher for WR
/// (single-threaded use under the unit/Kamikaze discipline) plus a pool of
/// decrypt ciphers safe for concurrent use by multiple reader threads.
pub struct CryptoProvider {
	factory: Arc<dyn CipherFactory>,
	encrypt_cipher: Mutex<Option<Box<dyn StreamCipher>>>,
	decrypt_pool: Mutex<Vec<Box<dyn StreamCipher>>>,
}

impl CryptoProvider {
	pub fn new(factory: Arc<dyn CipherFactory>) -> Result<CryptoProvider> {
		self_test(factory.as_ref())?;
		Ok(CryptoProvider {
			factory,
			encrypt_cipher: Mutex::new(None),
			decrypt_pool: Mutex::new(Vec::new()),
		})
	}

	pub fn factory(&self) -> &dyn CipherFactory {
		self.factory.as_ref()
	}

	/// Runs `f` with the single shared encrypt cipher, creating it lazily.
	pub fn with_encrypt<T>(&self, f: impl FnOnce(&mut dyn StreamCipher) -> Result<T>) -> Result<T> {
		let mut guard = self.encrypt_cipher.lock();
		if guard.is_none() {
			*guard = Some(self.factory.create_and_init_wr_cipher(true)?);
		}
		f(guard.as_mut().unwrap().as_mut())
	}

	/// `take_out`: returns a pooled decrypt cipher or `None` (caller creates one).
	pub fn take_out_decrypt(&self) -> Option<Box<dyn StreamCipher>> {
		self.decrypt_pool.lock().pop()
	}

	/// `take_in`: returns a decrypt cipher to the pool.
	pub fn take_in_decrypt(&self, cipher: Box<dyn StreamCipher>) {
		self.decrypt_pool.lock().push(cipher);
	}

	/// Runs `f` with a leased decrypt cipher, creating one if the pool is
	/// empty and returning it to the pool afterward (scoped lease).
	pub fn with_decrypt<T>(&self, f: impl FnOnce(&mut dyn StreamCipher) -> Result<T>) -> Result<T> {
		let mut cipher = match self.take_out_decrypt() {
			Some(c) => c,
			None => self.factory.create_and_init_wr_cipher(false)?,
		};
		let result = f(cipher.as_mut());
		self.take_in_decrypt(cipher);
		result
	}
}

#[cfg(test)]
mod test {
	use super::*;

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
	fn challenge_roundtrip() {
		let f = XorFactory;
		let challenge = compute_challenge(&f).unwrap();
		verify_challenge(&f, &challenge).unwrap();
		assert!(verify_challenge(&f, "not-the-challenge").is_err());
	}

	#[test]
	fn provider_pool() {
		let provider = CryptoProvider::new(Arc::new(XorFactory)).unwrap();
		let mut buf = *b"plaintext!!";
		provider.with_encrypt(|c| { c.encrypt(&mut buf); Ok(()) }).unwrap();
		provider.with_decrypt(|c| { c.decrypt(&mut buf); Ok(()) }).unwrap();
		assert_eq!(&buf, b"plaintext!!");
	}
}
