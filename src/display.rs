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

/// Compact hex rendering for log lines (keys, refs, probe bytes).
pub fn hex(data: &[u8]) -> String {
	hex::encode(data)
}

/// Base-36 rendering used for the cipher-challenge layout entry.
pub fn base36(data: &[u8]) -> String {
	let mut n = num_from_bytes(data);
	if n.is_empty() {
		return "0".into();
	}
	let mut digits = Vec::new();
	while !is_zero(&n) {
		let rem = divmod36(&mut n);
		digits.push(std::char::from_digit(rem as u32, 36).unwrap());
	}
	digits.iter().rev().collect()
}

// Minimal big-integer-as-base-2^32-limbs helpers, little limb first.
fn num_from_bytes(data: &[u8]) -> Vec<u32> {
	let mut n = vec![0u32];
	for &b in data {
		mul_add36_generic(&mut n, 256, b as u32);
	}
	n
}

fn mul_add36_generic(n: &mut Vec<u32>, base: u64, add: u32) {
	let mut carry: u64 = add as u64;
	for limb in n.iter_mut() {
		let v = (*limb as u64) * base + carry;
		*limb = (v & 0xffff_ffff) as u32;
		carry = v >> 32;
	}
	while carry > 0 {
		n.push((carry & 0xffff_ffff) as u32);
		carry >>= 32;
	}
}

fn is_zero(n: &[u32]) -> bool {
	n.iter().all(|&x| x == 0)
}

fn divmod36(n: &mut Vec<u32>) -> u32 {
	let mut rem: u64 = 0;
	for limb in n.iter_mut().rev() {
		let cur = (rem << 32) | (*limb as u64);
		*limb = (cur / 36) as u32;
		rem = cur % 36;
	}
	while n.len() > 1 && *n.last().unwrap() == 0 {
		n.pop();
	}
	rem as u32
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn base36_nonzero_roundtrips_through_length() {
		let probe: [u8; 4] = [0x01, 0x02, 0x03, 0x04];
		let s = base36(&probe);
		assert!(!s.is_empty() && s != "0");
	}

	#[test]
	fn hex_basic() {
		assert_eq!(hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
	}
}
