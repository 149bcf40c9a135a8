use std::{
	any::{self, Any, TypeId},
	fmt,
	hash::{Hash, Hasher},
	marker::PhantomData,
	mem,
};

use crate::{field::FieldDef, ObjRef};

/// Types which can be objects in a serializable graph.
///
/// Usually implemented with `#[derive(Structure)]`, which records the byte
/// offset of every field, so encoders / decoders can access fields directly.
///
/// ```
/// use ser_graph::{ObjRef, Structure};
///
/// #[derive(Structure, Default)]
/// struct Node {
/// 	value: i32,
/// 	next: Option<ObjRef>,
/// 	#[structure(transient)]
/// 	visits: u32,
/// }
/// ```
///
/// Container attributes:
///
/// * `#[structure(name = "node")]` - name written for types with no registered id.
/// * `#[structure(ancestors(Base, "dyn Shape"))]` - types this type is treated
///   as a subtype of when looking up serializers, nearest first. Paths must be
///   `Structure` types, and their own ancestors follow them. Strings are any
///   type, usually a capability (`dyn Trait`).
/// * `#[structure(not_serializable)]` - refuse to encode unless force-serializable
///   or struct mode is enabled.
/// * `#[structure(no_array)]` - no companion array type.
///
/// # Safety
///
/// Every [`FieldDef`] returned by [`fields`] must name a field of `Self`
/// whose type is exactly the type the `FieldDef` was declared with, located
/// at exactly the declared offset. Fields are read and written through raw
/// pointers on the strength of this.
///
/// `#[derive(Structure)]` upholds this, so implementing the trait by hand
/// requires `unsafe`:
///
/// ```compile_fail
/// use ser_graph::{FieldDef, Structure};
///
/// #[derive(Default)]
/// struct Tiny {
/// 	a: u64,
/// }
///
/// impl Structure for Tiny {
/// 	fn fields() -> Vec<FieldDef> {
/// 		vec![FieldDef::new::<u64>("a", 1 << 20, false)]
/// 	}
/// }
/// ```
///
/// [`fields`]: Structure::fields
pub unsafe trait Structure: Any + Default {
	/// Whether type is eligible for serialization outside struct mode.
	const SERIALIZABLE: bool = true;

	/// Name of type used on the wire when type has no registered id.
	fn type_name() -> &'static str {
		any::type_name::<Self>()
	}

	/// Field declarations, in declaration order.
	fn fields() -> Vec<FieldDef>;

	/// Types / capabilities this type is a subtype of, nearest first.
	///
	/// Includes ancestors of ancestors.
	fn ancestors() -> Vec<TypeKey> {
		Vec::new()
	}

	/// Companion array type, registered alongside this type by
	/// [`Configuration::register_class`](crate::Configuration::register_class).
	fn array_variant() -> Option<TypeDescriptor> {
		Some(TypeDescriptor::of::<Array<Self>>())
	}
}

/// Identity of a Rust type.
///
/// Can represent unsized types too, e.g. `TypeKey::of::<dyn Shape>()`,
/// which is useful as a capability for serializer lookup.
#[derive(Clone, Copy)]
pub struct TypeKey {
	id: TypeId,
	name: &'static str,
}

impl TypeKey {
	#[inline]
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: any::type_name::<T>(),
		}
	}

	#[inline]
	pub fn id(&self) -> TypeId {
		self.id
	}

	#[inline]
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Concatenate ancestor chains, keeping the first occurrence of each key.
	/// Used by `#[derive(Structure)]`.
	#[doc(hidden)]
	pub fn merge<I: IntoIterator<Item = Vec<TypeKey>>>(chains: I) -> Vec<TypeKey> {
		let mut merged: Vec<TypeKey> = Vec::new();
		for key in chains.into_iter().flatten() {
			if !merged.contains(&key) {
				merged.push(key);
			}
		}
		merged
	}
}

impl PartialEq for TypeKey {
	#[inline]
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
	#[inline]
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Debug for TypeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

/// Everything needed to encode, decode and construct objects of a
/// [`Structure`] type, without knowing the type statically.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
	key: TypeKey,
	name: &'static str,
	serializable: bool,
	construct: fn() -> Box<dyn Any>,
	fields: fn() -> Vec<FieldDef>,
	ancestors: fn() -> Vec<TypeKey>,
	array: fn() -> Option<TypeDescriptor>,
}

fn construct<T: Structure>() -> Box<dyn Any> {
	Box::new(T::default())
}

impl TypeDescriptor {
	/// Get descriptor for type `T`.
	pub fn of<T: Structure>() -> Self {
		Self {
			key: TypeKey::of::<T>(),
			name: T::type_name(),
			serializable: T::SERIALIZABLE,
			construct: construct::<T>,
			fields: T::fields,
			ancestors: T::ancestors,
			array: T::array_variant,
		}
	}

	#[inline]
	pub fn key(&self) -> TypeKey {
		self.key
	}

	#[inline]
	pub fn name(&self) -> &'static str {
		self.name
	}

	#[inline]
	pub fn is_serializable(&self) -> bool {
		self.serializable
	}

	/// Create a default-valued instance.
	#[inline]
	pub fn construct(&self) -> Box<dyn Any> {
		(self.construct)()
	}

	#[inline]
	pub fn fields(&self) -> Vec<FieldDef> {
		(self.fields)()
	}

	#[inline]
	pub fn ancestors(&self) -> Vec<TypeKey> {
		(self.ancestors)()
	}

	/// Companion array type, if type has one.
	#[inline]
	pub fn array_variant(&self) -> Option<TypeDescriptor> {
		(self.array)()
	}
}

impl PartialEq for TypeDescriptor {
	#[inline]
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TypeDescriptor")
			.field("name", &self.name)
			.field("serializable", &self.serializable)
			.finish()
	}
}

/// Homogeneous array of objects of type `T`.
///
/// Companion array type of `T`. Element type is not enforced when building
/// or decoding, it only gives the array a distinct type id.
pub struct Array<T> {
	pub items: Vec<ObjRef>,
	marker: PhantomData<fn() -> T>,
}

impl<T> Array<T> {
	pub fn new(items: Vec<ObjRef>) -> Self {
		Self {
			items,
			marker: PhantomData,
		}
	}
}

impl<T> Default for Array<T> {
	fn default() -> Self {
		Self::new(Vec::new())
	}
}

// `items` is a `Vec<ObjRef>` at its own offset
unsafe impl<T: Structure> Structure for Array<T> {
	fn fields() -> Vec<FieldDef> {
		vec![FieldDef::new::<Vec<ObjRef>>(
			"items",
			mem::offset_of!(Self, items),
			false,
		)]
	}

	// Arrays of arrays are not derived automatically
	fn array_variant() -> Option<TypeDescriptor> {
		None
	}
}

/// Heterogeneous list of objects.
#[derive(Default)]
pub struct List {
	pub items: Vec<ObjRef>,
}

// `items` is a `Vec<ObjRef>` at its own offset
unsafe impl Structure for List {
	fn type_name() -> &'static str {
		"list"
	}

	fn fields() -> Vec<FieldDef> {
		vec![FieldDef::new::<Vec<ObjRef>>(
			"items",
			mem::offset_of!(Self, items),
			false,
		)]
	}
}

/// String object.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Text {
	pub value: String,
}

impl Text {
	pub fn new(value: impl Into<String>) -> Self {
		Self {
			value: value.into(),
		}
	}
}

// `value` is a `String` at its own offset
unsafe impl Structure for Text {
	fn type_name() -> &'static str {
		"text"
	}

	fn fields() -> Vec<FieldDef> {
		vec![FieldDef::new::<String>(
			"value",
			mem::offset_of!(Self, value),
			false,
		)]
	}
}
