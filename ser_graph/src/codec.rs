//! Codecs, and the registry mapping types to codecs.

use std::{
	any::{Any, TypeId},
	sync::Arc,
};

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
	field::{FieldKind, RawFieldAccessor},
	Decoder, Encoder, Error, List, ObjRef, Result, Text, TypeDescriptor, TypeKey,
};

/// Encodes and decodes objects of a type, or family of types.
///
/// Codecs are shared across threads by a [`Configuration`].
///
/// On decode, the object has already been instantiated with default values
/// and bound to its back-reference handle before `decode` is called,
/// so references back to it from within its own content resolve correctly.
///
/// [`Configuration`]: crate::Configuration
pub trait Codec: Send + Sync {
	/// Write content of `obj`.
	fn encode(&self, encoder: &mut Encoder<'_>, obj: &ObjRef) -> Result<()>;

	/// Read content into `obj`.
	fn decode(&self, decoder: &mut Decoder<'_>, obj: &ObjRef) -> Result<()>;
}

/// Registered codec for a type.
#[derive(Clone)]
pub struct SerializerEntry {
	pub ty: TypeKey,
	pub codec: Arc<dyn Codec>,
	/// Also applies to types which declare `ty` as an ancestor
	pub include_subclasses: bool,
}

/// Hook consulted before the registry's own entries.
pub trait SerializerRegistryDelegate: Send + Sync {
	/// Get codec for `ty`, or `None` to fall through to registered entries.
	fn serializer_for(&self, ty: &TypeDescriptor) -> Option<Arc<dyn Codec>>;
}

/// Registry of codecs.
///
/// Lookup order:
///
/// 1. Delegate, if set.
/// 2. Entry registered for the exact type.
/// 3. Entry registered with `include_subclasses` for the nearest ancestor
///    the type declares.
/// 4. `None` - caller falls back to the structural codec.
///
/// Results are memoized per type. Mutation clears the memo.
#[derive(Default)]
pub struct SerializerRegistry {
	entries: FxHashMap<TypeId, SerializerEntry>,
	delegate: Option<Box<dyn SerializerRegistryDelegate>>,
	resolved: DashMap<TypeId, Option<Arc<dyn Codec>>>,
}

impl SerializerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Install or replace codec for `ty`.
	pub fn put(&mut self, ty: TypeKey, codec: Arc<dyn Codec>, include_subclasses: bool) {
		debug!(ty = ty.name(), include_subclasses, "registered serializer");
		self.entries.insert(
			ty.id(),
			SerializerEntry {
				ty,
				codec,
				include_subclasses,
			},
		);
		self.resolved.clear();
	}

	/// Set delegate, or remove it with `None`.
	pub fn set_delegate(&mut self, delegate: Option<Box<dyn SerializerRegistryDelegate>>) {
		self.delegate = delegate;
		self.resolved.clear();
	}

	/// Get entry registered for exactly `ty`.
	pub fn entry(&self, ty: &TypeKey) -> Option<&SerializerEntry> {
		self.entries.get(&ty.id())
	}

	/// Get codec for `ty`. `None` means use the structural codec.
	pub fn get(&self, ty: &TypeDescriptor) -> Option<Arc<dyn Codec>> {
		let id = ty.key().id();
		if let Some(resolved) = self.resolved.get(&id) {
			return resolved.value().clone();
		}
		let codec = self.resolve(ty);
		self.resolved.insert(id, codec.clone());
		codec
	}

	fn resolve(&self, ty: &TypeDescriptor) -> Option<Arc<dyn Codec>> {
		if let Some(codec) = self
			.delegate
			.as_ref()
			.and_then(|delegate| delegate.serializer_for(ty))
		{
			return Some(codec);
		}

		if let Some(entry) = self.entries.get(&ty.key().id()) {
			return Some(Arc::clone(&entry.codec));
		}

		ty.ancestors().iter().find_map(|ancestor| {
			self
				.entries
				.get(&ancestor.id())
				.filter(|entry| entry.include_subclasses)
				.map(|entry| Arc::clone(&entry.codec))
		})
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Generic codec which encodes every field of a type, in declaration order,
/// using raw field accessors.
///
/// Transient fields are skipped, unless struct mode is enabled.
/// Used for any type without a registered codec.
pub struct StructCodec;

impl Codec for StructCodec {
	fn encode(&self, encoder: &mut Encoder<'_>, obj: &ObjRef) -> Result<()> {
		let conf = encoder.configuration();
		let layout = conf.fields_of(obj.descriptor())?;
		let struct_mode = conf.is_struct_mode();

		let value = obj.try_borrow_value()?;
		let value: &dyn Any = &**value;
		for field in layout.iter() {
			if field.transient && !struct_mode {
				continue;
			}
			encode_field(encoder, &field.accessor, value)?;
		}
		Ok(())
	}

	fn decode(&self, decoder: &mut Decoder<'_>, obj: &ObjRef) -> Result<()> {
		let conf = decoder.configuration();
		let layout = conf.fields_of(obj.descriptor())?;
		let struct_mode = conf.is_struct_mode();

		let mut value = obj.try_borrow_value_mut()?;
		let value: &mut dyn Any = &mut **value;
		for field in layout.iter() {
			if field.transient && !struct_mode {
				continue;
			}
			decode_field(decoder, &field.accessor, value)?;
		}
		Ok(())
	}
}

fn encode_field(
	encoder: &mut Encoder<'_>,
	accessor: &RawFieldAccessor,
	value: &dyn Any,
) -> Result<()> {
	match accessor.kind() {
		FieldKind::Bool => encoder.write_bool(*accessor.get::<bool>(value)?),
		FieldKind::I8 => encoder.write_i64(*accessor.get::<i8>(value)? as i64),
		FieldKind::I16 => encoder.write_i64(*accessor.get::<i16>(value)? as i64),
		FieldKind::I32 => encoder.write_i64(*accessor.get::<i32>(value)? as i64),
		FieldKind::I64 => encoder.write_i64(*accessor.get::<i64>(value)?),
		FieldKind::U8 => encoder.write_u64(*accessor.get::<u8>(value)? as u64),
		FieldKind::U16 => encoder.write_u64(*accessor.get::<u16>(value)? as u64),
		FieldKind::U32 => encoder.write_u64(*accessor.get::<u32>(value)? as u64),
		FieldKind::U64 => encoder.write_u64(*accessor.get::<u64>(value)?),
		FieldKind::F32 => encoder.write_f32(*accessor.get::<f32>(value)?),
		FieldKind::F64 => encoder.write_f64(*accessor.get::<f64>(value)?),
		FieldKind::Char => encoder.write_char(*accessor.get::<char>(value)?),
		FieldKind::Str => encoder.write_str(accessor.get::<String>(value)?),
		FieldKind::Bytes => encoder.write_bytes(accessor.get::<Vec<u8>>(value)?),
		FieldKind::Ref => {
			return encoder.write_object(accessor.get::<Option<ObjRef>>(value)?.as_ref());
		}
		FieldKind::RefList => return encoder.write_objects(accessor.get::<Vec<ObjRef>>(value)?),
	}
	Ok(())
}

fn decode_field(
	decoder: &mut Decoder<'_>,
	accessor: &RawFieldAccessor,
	value: &mut dyn Any,
) -> Result<()> {
	let name = accessor.name();
	match accessor.kind() {
		FieldKind::Bool => accessor.set(value, decoder.read_bool()?),
		FieldKind::I8 => accessor.set(value, narrow::<i8, _>(decoder.read_i64()?, name)?),
		FieldKind::I16 => accessor.set(value, narrow::<i16, _>(decoder.read_i64()?, name)?),
		FieldKind::I32 => accessor.set(value, narrow::<i32, _>(decoder.read_i64()?, name)?),
		FieldKind::I64 => accessor.set(value, decoder.read_i64()?),
		FieldKind::U8 => accessor.set(value, narrow::<u8, _>(decoder.read_u64()?, name)?),
		FieldKind::U16 => accessor.set(value, narrow::<u16, _>(decoder.read_u64()?, name)?),
		FieldKind::U32 => accessor.set(value, narrow::<u32, _>(decoder.read_u64()?, name)?),
		FieldKind::U64 => accessor.set(value, decoder.read_u64()?),
		FieldKind::F32 => accessor.set(value, decoder.read_f32()?),
		FieldKind::F64 => accessor.set(value, decoder.read_f64()?),
		FieldKind::Char => accessor.set(value, decoder.read_char()?),
		FieldKind::Str => accessor.set(value, decoder.read_str()?.to_string()),
		FieldKind::Bytes => accessor.set(value, decoder.read_bytes()?.to_vec()),
		FieldKind::Ref => accessor.set(value, decoder.read_object()?),
		FieldKind::RefList => accessor.set(value, decoder.read_objects(name)?),
	}
}

fn narrow<T, N>(n: N, field: &'static str) -> Result<T>
where
	T: TryFrom<N>,
	N: Copy + std::fmt::Display,
{
	T::try_from(n).map_err(|_| Error::Codec(format!("value {n} out of range for field `{field}`")))
}

/// Codec for [`Text`]. Writes the string only.
pub struct TextCodec;

impl Codec for TextCodec {
	fn encode(&self, encoder: &mut Encoder<'_>, obj: &ObjRef) -> Result<()> {
		let value = obj.try_borrow_value()?;
		let text = value
			.downcast_ref::<Text>()
			.ok_or_else(|| wrong_type::<Text>(obj))?;
		encoder.write_str(&text.value);
		Ok(())
	}

	fn decode(&self, decoder: &mut Decoder<'_>, obj: &ObjRef) -> Result<()> {
		let string = decoder.read_str()?.to_string();
		let mut value = obj.try_borrow_value_mut()?;
		let text = value
			.downcast_mut::<Text>()
			.ok_or_else(|| wrong_type::<Text>(obj))?;
		text.value = string;
		Ok(())
	}
}

/// Codec for [`List`]. Writes length, then each item.
pub struct ListCodec;

impl Codec for ListCodec {
	fn encode(&self, encoder: &mut Encoder<'_>, obj: &ObjRef) -> Result<()> {
		let value = obj.try_borrow_value()?;
		let list = value
			.downcast_ref::<List>()
			.ok_or_else(|| wrong_type::<List>(obj))?;
		encoder.write_objects(&list.items)
	}

	fn decode(&self, decoder: &mut Decoder<'_>, obj: &ObjRef) -> Result<()> {
		let items = decoder.read_objects("items")?;
		let mut value = obj.try_borrow_value_mut()?;
		let list = value
			.downcast_mut::<List>()
			.ok_or_else(|| wrong_type::<List>(obj))?;
		list.items = items;
		Ok(())
	}
}

fn wrong_type<T>(obj: &ObjRef) -> Error {
	Error::Codec(format!(
		"codec for `{}` applied to `{}`",
		std::any::type_name::<T>(),
		obj.descriptor().name()
	))
}
