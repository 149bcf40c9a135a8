//! Minimal byte-level encoding used by [`Encoder`] and [`Decoder`].
//!
//! * Unsigned integers: LEB128 varints.
//! * Signed integers: zigzag, then varint.
//! * Floats: IEEE 754, little endian.
//! * `char`: code point as varint.
//! * Strings / byte strings: varint length, then bytes.
//!
//! [`Encoder`]: crate::Encoder
//! [`Decoder`]: crate::Decoder

use std::str;

use crate::{Error, Result};

/// Object tags.
pub(crate) mod tag {
	pub const NULL: u8 = 0;
	pub const REGISTERED: u8 = 1;
	pub const NAMED: u8 = 2;
	pub const HANDLE: u8 = 3;
}

const MAX_VARINT_LEN: usize = 10;

#[inline]
fn zigzag(n: i64) -> u64 {
	((n << 1) ^ (n >> 63)) as u64
}

#[inline]
fn unzigzag(n: u64) -> i64 {
	((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Growable output buffer.
///
/// Just a wrapper around `Vec<u8>`. Retains its allocation across `clear()`,
/// so a pooled encoder does not reallocate on every pass.
#[derive(Default)]
pub struct Output {
	inner: Vec<u8>,
}

impl Output {
	#[inline]
	pub fn new() -> Self {
		Self { inner: Vec::new() }
	}

	/// Returns current capacity of buffer in bytes.
	#[inline]
	pub fn capacity(&self) -> usize {
		self.inner.capacity()
	}

	/// Returns number of bytes written.
	#[inline]
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Clear buffer, keeping allocation.
	#[inline]
	pub fn clear(&mut self) {
		self.inner.clear();
	}

	#[inline]
	pub fn as_slice(&self) -> &[u8] {
		self.inner.as_slice()
	}

	#[inline]
	pub fn push_u8(&mut self, byte: u8) {
		self.inner.push(byte);
	}

	#[inline]
	pub fn push_bytes(&mut self, bytes: &[u8]) {
		self.inner.extend_from_slice(bytes);
	}

	#[inline]
	pub fn push_varint(&mut self, mut n: u64) {
		while n >= 0x80 {
			self.inner.push((n as u8) | 0x80);
			n >>= 7;
		}
		self.inner.push(n as u8);
	}

	#[inline]
	pub fn push_signed(&mut self, n: i64) {
		self.push_varint(zigzag(n));
	}

	#[inline]
	pub fn push_f32(&mut self, n: f32) {
		self.push_bytes(&n.to_le_bytes());
	}

	#[inline]
	pub fn push_f64(&mut self, n: f64) {
		self.push_bytes(&n.to_le_bytes());
	}

	/// Push length-prefixed bytes.
	#[inline]
	pub fn push_len_bytes(&mut self, bytes: &[u8]) {
		self.push_varint(bytes.len() as u64);
		self.push_bytes(bytes);
	}
}

/// Cursor over input bytes.
pub struct Input<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Input<'a> {
	#[inline]
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	/// Current offset in input.
	#[inline]
	pub fn pos(&self) -> usize {
		self.pos
	}

	/// Number of unread bytes.
	#[inline]
	pub fn remaining(&self) -> usize {
		self.bytes.len() - self.pos
	}

	#[inline]
	pub fn read_u8(&mut self) -> Result<u8> {
		let byte = *self.bytes.get(self.pos).ok_or_else(|| self.eof(1))?;
		self.pos += 1;
		Ok(byte)
	}

	#[inline]
	pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
		if self.remaining() < len {
			return Err(self.eof(len));
		}
		let bytes = &self.bytes[self.pos..self.pos + len];
		self.pos += len;
		Ok(bytes)
	}

	pub fn read_varint(&mut self) -> Result<u64> {
		let start = self.pos;
		let mut n = 0u64;
		for index in 0..MAX_VARINT_LEN {
			let byte = self.read_u8()?;
			let bits = (byte & 0x7f) as u64;
			// 10th byte can only carry 1 bit
			if index == MAX_VARINT_LEN - 1 && bits > 1 {
				return Err(Error::InvalidVarint { offset: start });
			}
			n |= bits << (7 * index);
			if byte & 0x80 == 0 {
				return Ok(n);
			}
		}
		Err(Error::InvalidVarint { offset: start })
	}

	#[inline]
	pub fn read_signed(&mut self) -> Result<i64> {
		self.read_varint().map(unzigzag)
	}

	#[inline]
	pub fn read_f32(&mut self) -> Result<f32> {
		let bytes = self.read_bytes(4)?;
		Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}

	#[inline]
	pub fn read_f64(&mut self) -> Result<f64> {
		let bytes = self.read_bytes(8)?;
		let mut buf = [0u8; 8];
		buf.copy_from_slice(bytes);
		Ok(f64::from_le_bytes(buf))
	}

	/// Read varint length, checked against remaining input.
	pub fn read_len(&mut self) -> Result<usize> {
		let len = self.read_varint()?;
		if len > self.remaining() as u64 {
			return Err(self.eof(usize::try_from(len).unwrap_or(usize::MAX)));
		}
		Ok(len as usize)
	}

	/// Read length-prefixed bytes.
	#[inline]
	pub fn read_len_bytes(&mut self) -> Result<&'a [u8]> {
		let len = self.read_len()?;
		self.read_bytes(len)
	}

	/// Read length-prefixed UTF-8 string.
	pub fn read_str(&mut self) -> Result<&'a str> {
		let offset = self.pos;
		let bytes = self.read_len_bytes()?;
		str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 { offset })
	}

	pub fn read_char(&mut self) -> Result<char> {
		let offset = self.pos;
		let code = self.read_varint()?;
		u32::try_from(code)
			.ok()
			.and_then(char::from_u32)
			.ok_or(Error::InvalidChar {
				code: code as u32,
				offset,
			})
	}

	#[inline]
	fn eof(&self, needed: usize) -> Error {
		Error::UnexpectedEof {
			offset: self.pos,
			needed,
			remaining: self.remaining(),
		}
	}
}
