//! Encoders and decoders.
//!
//! Each thread keeps one set of encoder storage (output buffer + identity map)
//! and one set of decoder storage, which are taken by a coder while it is in use
//! and given back when it is dropped. So repeated encodes / decodes on a thread
//! reuse the same allocations. A coder acquired while another is live on the
//! same thread gets fresh storage, so nested use is always safe.

use std::{
	cell::Cell,
	mem,
	ops::Deref,
};

use tracing::trace;

use crate::{
	identity_map::IdentityMap,
	wire::{tag, Input, Output},
	Configuration, Error, ObjKey, ObjRef, Result, TypeDescriptor,
};

struct EncoderStorage {
	output: Output,
	handles: IdentityMap<ObjKey, u32>,
}

thread_local! {
	static ENCODER_STORAGE: Cell<Option<EncoderStorage>> = const { Cell::new(None) };
	static DECODER_STORAGE: Cell<Option<IdentityMap<u32, ObjRef>>> = const { Cell::new(None) };
}

/// Encoder for an object graph.
///
/// Obtained from [`Configuration::get_coder_for_encode`]. Object headers are
/// written as:
///
/// * `NULL`
/// * `HANDLE varint(handle)` - back-reference to an object already written.
/// * `REGISTERED varint(id)`, then content.
/// * `NAMED varint(len) name`, then content.
///
/// Content is written by the codec the configuration resolves for the type.
pub struct Encoder<'c> {
	conf: &'c Configuration,
	output: Output,
	handles: IdentityMap<ObjKey, u32>,
	next_handle: u32,
	depth: usize,
}

impl<'c> Encoder<'c> {
	pub(crate) fn new(conf: &'c Configuration) -> Self {
		let storage = ENCODER_STORAGE.try_with(Cell::take).ok().flatten();
		let (output, handles) = match storage {
			Some(storage) => (storage.output, storage.handles),
			None => {
				trace!("allocating encoder storage");
				(
					Output::new(),
					IdentityMap::with_capacity(conf.options().identity_map_size),
				)
			}
		};
		Self {
			conf,
			output,
			handles,
			next_handle: 0,
			depth: 0,
		}
	}

	/// Get configuration this encoder is bound to.
	#[inline]
	pub fn configuration(&self) -> &'c Configuration {
		self.conf
	}

	/// Clear output and object identities, ready for a new graph.
	pub fn reset(&mut self) {
		self.output.clear();
		self.handles.clear();
		self.next_handle = 0;
		self.depth = 0;
	}

	/// Get bytes written so far.
	#[inline]
	pub fn as_bytes(&self) -> &[u8] {
		self.output.as_slice()
	}

	/// Number of bytes written so far.
	#[inline]
	pub fn written(&self) -> usize {
		self.output.len()
	}

	/// Capacity of output buffer, which may exceed bytes written.
	#[inline]
	pub fn buffer_capacity(&self) -> usize {
		self.output.capacity()
	}

	/// Copy bytes written so far into a new `Vec`.
	#[inline]
	pub fn to_vec(&self) -> Vec<u8> {
		self.output.as_slice().to_vec()
	}

	/// Write object, or null.
	pub fn write_object(&mut self, obj: Option<&ObjRef>) -> Result<()> {
		let Some(obj) = obj else {
			self.output.push_u8(tag::NULL);
			return Ok(());
		};

		let ty = *obj.descriptor();
		if !ty.is_serializable()
			&& !self.conf.is_force_serializable()
			&& !self.conf.is_struct_mode()
		{
			return Err(Error::NotSerializable(ty.name()));
		}

		if self.conf.is_share_references() {
			let key = obj.key();
			if let Some(&handle) = self.handles.get(&key) {
				self.output.push_u8(tag::HANDLE);
				self.output.push_varint(handle as u64);
				return Ok(());
			}
			self.handles.put(key, self.next_handle);
			self.next_handle += 1;
		}

		let max_depth = self.conf.max_depth();
		if self.depth >= max_depth {
			return Err(Error::DepthLimitExceeded(max_depth));
		}

		match self.conf.type_id_of(&ty) {
			Some(id) => {
				self.output.push_u8(tag::REGISTERED);
				self.output.push_varint(id as u64);
			}
			None => {
				self.output.push_u8(tag::NAMED);
				self.output.push_len_bytes(ty.name().as_bytes());
			}
		}

		let codec = self.conf.serializer_for(&ty);
		self.depth += 1;
		let result = codec.encode(self, obj);
		self.depth -= 1;
		result
	}

	/// Write length, then each object.
	pub fn write_objects(&mut self, objs: &[ObjRef]) -> Result<()> {
		self.write_len(objs.len());
		for obj in objs {
			self.write_object(Some(obj))?;
		}
		Ok(())
	}

	#[inline]
	pub fn write_bool(&mut self, value: bool) {
		self.output.push_u8(value as u8);
	}

	#[inline]
	pub fn write_u8(&mut self, value: u8) {
		self.output.push_u8(value);
	}

	#[inline]
	pub fn write_i64(&mut self, value: i64) {
		self.output.push_signed(value);
	}

	#[inline]
	pub fn write_u64(&mut self, value: u64) {
		self.output.push_varint(value);
	}

	#[inline]
	pub fn write_len(&mut self, len: usize) {
		self.output.push_varint(len as u64);
	}

	#[inline]
	pub fn write_f32(&mut self, value: f32) {
		self.output.push_f32(value);
	}

	#[inline]
	pub fn write_f64(&mut self, value: f64) {
		self.output.push_f64(value);
	}

	#[inline]
	pub fn write_char(&mut self, value: char) {
		self.output.push_varint(value as u64);
	}

	#[inline]
	pub fn write_str(&mut self, value: &str) {
		self.output.push_len_bytes(value.as_bytes());
	}

	#[inline]
	pub fn write_bytes(&mut self, value: &[u8]) {
		self.output.push_len_bytes(value);
	}
}

impl Drop for Encoder<'_> {
	fn drop(&mut self) {
		let mut storage = EncoderStorage {
			output: mem::take(&mut self.output),
			handles: mem::take(&mut self.handles),
		};
		storage.output.clear();
		storage.handles.clear();
		// Thread-local may already be gone during thread teardown
		let _ = ENCODER_STORAGE.try_with(|slot| slot.set(Some(storage)));
	}
}

/// Decoder for an object graph.
///
/// Obtained from [`Configuration::get_coder_for_decode`].
/// Reads the format written by [`Encoder`].
pub struct Decoder<'a> {
	conf: &'a Configuration,
	input: Input<'a>,
	objects: IdentityMap<u32, ObjRef>,
	next_handle: u32,
	depth: usize,
}

impl<'a> Decoder<'a> {
	pub(crate) fn new(conf: &'a Configuration, bytes: &'a [u8]) -> Self {
		let objects = DECODER_STORAGE
			.try_with(Cell::take)
			.ok()
			.flatten()
			.unwrap_or_else(|| IdentityMap::with_capacity(conf.options().identity_map_size));
		Self {
			conf,
			input: Input::new(bytes),
			objects,
			next_handle: 0,
			depth: 0,
		}
	}

	/// Get configuration this decoder is bound to.
	#[inline]
	pub fn configuration(&self) -> &'a Configuration {
		self.conf
	}

	/// Current offset in input.
	#[inline]
	pub fn position(&self) -> usize {
		self.input.pos()
	}

	/// Number of unread bytes.
	#[inline]
	pub fn remaining(&self) -> usize {
		self.input.remaining()
	}

	/// Read object, or null.
	pub fn read_object(&mut self) -> Result<Option<ObjRef>> {
		let offset = self.input.pos();
		let ty = match self.input.read_u8()? {
			tag::NULL => return Ok(None),
			tag::HANDLE => {
				let handle = self.read_u32()?;
				return match self.objects.get(&handle) {
					Some(obj) => Ok(Some(obj.clone())),
					None => Err(Error::UnknownHandle(handle)),
				};
			}
			tag::REGISTERED => {
				let id = self.read_u32()?;
				self.resolve_id(id)?
			}
			tag::NAMED => {
				let name = self.input.read_str()?;
				self
					.conf
					.resolve_type_name(name)
					.ok_or_else(|| Error::UnknownTypeName(name.to_string()))?
			}
			tag => return Err(Error::InvalidTag { tag, offset }),
		};

		let max_depth = self.conf.max_depth();
		if self.depth >= max_depth {
			return Err(Error::DepthLimitExceeded(max_depth));
		}

		// Bind handle before decoding content, so back-references to this object resolve
		let obj = ObjRef::instantiate(&ty);
		if self.conf.is_share_references() {
			self.objects.put(self.next_handle, obj.clone());
			self.next_handle += 1;
		}

		let codec = self.conf.serializer_for(&ty);
		self.depth += 1;
		let result = codec.decode(self, &obj);
		self.depth -= 1;
		result?;
		Ok(Some(obj))
	}

	/// Read length, then that many non-null objects.
	///
	/// `field` names the field being read, for error reporting.
	pub fn read_objects(&mut self, field: &'static str) -> Result<Vec<ObjRef>> {
		// Every object takes at least 1 byte, so length is bounded by input size
		let len = self.input.read_len()?;
		let mut objs = Vec::with_capacity(len);
		for _ in 0..len {
			let obj = self.read_object()?.ok_or(Error::NullInList { field })?;
			objs.push(obj);
		}
		Ok(objs)
	}

	fn resolve_id(&self, id: u32) -> Result<TypeDescriptor> {
		self
			.conf
			.type_entry(id)
			.map(|entry| *entry.descriptor())
			.ok_or(Error::UnknownTypeId(id))
	}

	fn read_u32(&mut self) -> Result<u32> {
		let offset = self.input.pos();
		let n = self.input.read_varint()?;
		u32::try_from(n).map_err(|_| Error::InvalidVarint { offset })
	}

	#[inline]
	pub fn read_bool(&mut self) -> Result<bool> {
		Ok(self.input.read_u8()? != 0)
	}

	#[inline]
	pub fn read_u8(&mut self) -> Result<u8> {
		self.input.read_u8()
	}

	#[inline]
	pub fn read_i64(&mut self) -> Result<i64> {
		self.input.read_signed()
	}

	#[inline]
	pub fn read_u64(&mut self) -> Result<u64> {
		self.input.read_varint()
	}

	/// Read a length, checked against remaining input.
	#[inline]
	pub fn read_len(&mut self) -> Result<usize> {
		self.input.read_len()
	}

	#[inline]
	pub fn read_f32(&mut self) -> Result<f32> {
		self.input.read_f32()
	}

	#[inline]
	pub fn read_f64(&mut self) -> Result<f64> {
		self.input.read_f64()
	}

	#[inline]
	pub fn read_char(&mut self) -> Result<char> {
		self.input.read_char()
	}

	#[inline]
	pub fn read_str(&mut self) -> Result<&'a str> {
		self.input.read_str()
	}

	#[inline]
	pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
		self.input.read_len_bytes()
	}
}

impl Drop for Decoder<'_> {
	fn drop(&mut self) {
		let mut objects = mem::take(&mut self.objects);
		// Release decoded objects now, rather than when storage is next reused
		objects.clear();
		let _ = DECODER_STORAGE.try_with(|slot| slot.set(Some(objects)));
	}
}

/// Bytes encoded into a pooled encoder's buffer, borrowed without copying.
///
/// Derefs to exactly the bytes written. The underlying buffer may be larger
/// (see [`buffer_capacity`](SharedBytes::buffer_capacity)).
///
/// The encoder's storage returns to the thread's pool when this is dropped,
/// so drop it before encoding the next graph on this thread to reuse it.
pub struct SharedBytes<'c> {
	encoder: Encoder<'c>,
}

impl<'c> SharedBytes<'c> {
	pub(crate) fn new(encoder: Encoder<'c>) -> Self {
		Self { encoder }
	}

	/// Number of bytes written.
	#[inline]
	pub fn written(&self) -> usize {
		self.encoder.written()
	}

	/// Capacity of the underlying buffer.
	#[inline]
	pub fn buffer_capacity(&self) -> usize {
		self.encoder.buffer_capacity()
	}
}

impl Deref for SharedBytes<'_> {
	type Target = [u8];

	#[inline]
	fn deref(&self) -> &[u8] {
		self.encoder.as_bytes()
	}
}

impl AsRef<[u8]> for SharedBytes<'_> {
	#[inline]
	fn as_ref(&self) -> &[u8] {
		self.encoder.as_bytes()
	}
}
