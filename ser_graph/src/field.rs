//! Raw memory field access.
//!
//! Fields of [`Structure`](crate::Structure) types are located by byte offset
//! (from `core::mem::offset_of!`, recorded by `#[derive(Structure)]`), and
//! read / written through a pointer to the object plus that offset. This
//! bypasses any per-field dispatch on the structural encode / decode path.

use std::{
	any::{Any, TypeId},
	mem,
	sync::{Arc, OnceLock},
};

use dashmap::DashMap;
use tracing::debug;

use crate::{object::ObjRef, Error, Result, TypeDescriptor};

/// Kind of a field. Each kind corresponds to exactly one Rust type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
	Bool,
	I8,
	I16,
	I32,
	I64,
	U8,
	U16,
	U32,
	U64,
	F32,
	F64,
	Char,
	/// `String`
	Str,
	/// `Vec<u8>`
	Bytes,
	/// `Option<ObjRef>`
	Ref,
	/// `Vec<ObjRef>`
	RefList,
}

mod private {
	pub trait Sealed {}
}

/// Rust types which can be fields of a [`Structure`](crate::Structure).
///
/// Sealed. `KIND` identifies the implementing type uniquely, which is what
/// makes typed raw access through [`RawFieldAccessor`] sound.
pub trait FieldType: private::Sealed + 'static {
	const KIND: FieldKind;
}

macro_rules! impl_field_type {
	($($ty:ty => $kind:ident),* $(,)?) => {
		$(
			impl private::Sealed for $ty {}
			impl FieldType for $ty {
				const KIND: FieldKind = FieldKind::$kind;
			}
		)*
	};
}

impl_field_type!(
	bool => Bool,
	i8 => I8,
	i16 => I16,
	i32 => I32,
	i64 => I64,
	u8 => U8,
	u16 => U16,
	u32 => U32,
	u64 => U64,
	f32 => F32,
	f64 => F64,
	char => Char,
	String => Str,
	Vec<u8> => Bytes,
	Option<ObjRef> => Ref,
	Vec<ObjRef> => RefList,
);

/// Declaration of a field. Emitted by `#[derive(Structure)]`.
///
/// Only trusted when returned from an implementation of the unsafe
/// [`Structure`](crate::Structure) trait.
#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
	name: &'static str,
	offset: usize,
	kind: FieldKind,
	transient: bool,
}

impl FieldDef {
	/// Declare a field of type `F` at byte `offset` within its owner.
	///
	/// `offset` should be the result of `core::mem::offset_of!` for a field of
	/// type `F` in the owning type. See safety requirements of
	/// [`Structure`](crate::Structure).
	#[inline]
	pub const fn new<F: FieldType>(name: &'static str, offset: usize, transient: bool) -> Self {
		Self {
			name,
			offset,
			kind: F::KIND,
			transient,
		}
	}

	#[inline]
	pub fn name(&self) -> &'static str {
		self.name
	}

	#[inline]
	pub fn offset(&self) -> usize {
		self.offset
	}

	#[inline]
	pub fn kind(&self) -> FieldKind {
		self.kind
	}

	#[inline]
	pub fn is_transient(&self) -> bool {
		self.transient
	}
}

/// Process-wide raw memory access capability.
///
/// Obtained once with [`RawMemory::acquire`]. If it cannot be obtained,
/// structural encoding / decoding cannot work at all.
#[derive(Debug)]
pub struct RawMemory {
	pointer_width: usize,
}

static RAW_MEMORY: OnceLock<Result<RawMemory, String>> = OnceLock::new();

const PROBE_SENTINEL: u64 = 0x5e76_a9c3_17d2_84f1;

#[allow(dead_code)]
struct Probe {
	flag: u8,
	sentinel: u64,
	tail: u16,
}

impl RawMemory {
	/// Get the raw memory capability, discovering it on first call.
	///
	/// Discovery reads a probe value through its declared field offset and
	/// checks it observes the expected sentinel. If not, the probe's bytes are
	/// scanned for the sentinel to report where the field actually lives.
	/// Either way, a mismatch is permanent for the process.
	pub fn acquire() -> Result<&'static RawMemory> {
		RAW_MEMORY
			.get_or_init(Self::discover)
			.as_ref()
			.map_err(|reason| Error::RawMemoryUnavailable(reason.clone()))
	}

	fn discover() -> Result<RawMemory, String> {
		let probe = Probe {
			flag: 0xff,
			sentinel: PROBE_SENTINEL,
			tail: 0xffff,
		};
		let declared = mem::offset_of!(Probe, sentinel);
		let base = &probe as *const Probe as *const u8;

		if declared + mem::size_of::<u64>() <= mem::size_of::<Probe>() {
			// In bounds of `probe`. Unaligned read as nothing is assumed about offset.
			let found = unsafe { base.add(declared).cast::<u64>().read_unaligned() };
			if found == PROBE_SENTINEL {
				debug!(
					pointer_width = mem::size_of::<usize>(),
					"raw field access available"
				);
				return Ok(RawMemory {
					pointer_width: mem::size_of::<usize>(),
				});
			}
		}

		let size = mem::size_of::<Probe>();
		let actual = (0..=size - mem::size_of::<u64>()).find(|&offset| {
			// In bounds: `offset + 8 <= size`
			unsafe { base.add(offset).cast::<u64>().read_unaligned() == PROBE_SENTINEL }
		});
		Err(match actual {
			Some(actual) => format!(
				"incompatible target: declared field offset {declared} but field found at {actual}"
			),
			None => format!("incompatible target: field not found at declared offset {declared}"),
		})
	}

	/// Pointer width of target, in bytes.
	#[inline]
	pub fn pointer_width(&self) -> usize {
		self.pointer_width
	}
}

/// Direct accessor for one field of one type.
///
/// Resolved once, then used for any number of objects of the owning type.
#[derive(Clone, Copy, Debug)]
pub struct RawFieldAccessor {
	owner: TypeId,
	owner_name: &'static str,
	name: &'static str,
	offset: usize,
	kind: FieldKind,
}

impl RawFieldAccessor {
	/// Resolve accessor for field `field_name` of type `ty`.
	pub fn resolve(ty: &TypeDescriptor, field_name: &str) -> Result<Self> {
		RawMemory::acquire()?;
		ty.fields()
			.into_iter()
			.find(|def| def.name() == field_name)
			.map(|def| Self::from_def(ty, &def))
			.ok_or_else(|| Error::UnknownField {
				ty: ty.name(),
				field: field_name.to_string(),
			})
	}

	#[inline]
	fn from_def(ty: &TypeDescriptor, def: &FieldDef) -> Self {
		Self {
			owner: ty.key().id(),
			owner_name: ty.name(),
			name: def.name(),
			offset: def.offset(),
			kind: def.kind(),
		}
	}

	#[inline]
	pub fn name(&self) -> &'static str {
		self.name
	}

	#[inline]
	pub fn kind(&self) -> FieldKind {
		self.kind
	}

	#[inline]
	pub fn offset(&self) -> usize {
		self.offset
	}

	#[inline]
	fn check<F: FieldType>(&self, obj: &dyn Any) -> Result<()> {
		if obj.type_id() != self.owner {
			return Err(Error::ForeignObject {
				expected: self.owner_name,
			});
		}
		if F::KIND != self.kind {
			return Err(Error::FieldKindMismatch {
				field: self.name,
				expected: self.kind,
				found: F::KIND,
			});
		}
		Ok(())
	}

	/// Get reference to field's value in `obj`.
	#[inline]
	pub fn get<'o, F: FieldType>(&self, obj: &'o dyn Any) -> Result<&'o F> {
		self.check::<F>(obj)?;
		// `obj` is of the owner type. Its `Structure` impl guarantees a field of the declared
		// kind lives at `offset`, and kinds map one-to-one onto types, so that field is an `F`.
		let ptr = obj as *const dyn Any as *const u8;
		Ok(unsafe { &*ptr.add(self.offset).cast::<F>() })
	}

	/// Get mutable reference to field's value in `obj`.
	#[inline]
	pub fn get_mut<'o, F: FieldType>(&self, obj: &'o mut dyn Any) -> Result<&'o mut F> {
		self.check::<F>(obj)?;
		// See `get`
		let ptr = obj as *mut dyn Any as *mut u8;
		Ok(unsafe { &mut *ptr.add(self.offset).cast::<F>() })
	}

	/// Set field's value in `obj`.
	#[inline]
	pub fn set<F: FieldType>(&self, obj: &mut dyn Any, value: F) -> Result<()> {
		*self.get_mut::<F>(obj)? = value;
		Ok(())
	}
}

/// Key of a field: owner type + field name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldKey {
	pub owner: TypeId,
	pub name: &'static str,
}

/// Resolved field: accessor plus flags.
#[derive(Clone, Copy, Debug)]
pub struct FieldMetadata {
	pub accessor: RawFieldAccessor,
	pub transient: bool,
}

impl FieldMetadata {
	#[inline]
	pub fn name(&self) -> &'static str {
		self.accessor.name()
	}

	#[inline]
	pub fn kind(&self) -> FieldKind {
		self.accessor.kind()
	}
}

/// Cache of resolved field metadata.
///
/// Content describes type layout only, not any configuration policy,
/// so one cache can be shared by many [`Configuration`]s.
///
/// [`Configuration`]: crate::Configuration
#[derive(Default)]
pub struct FieldCache {
	fields: DashMap<FieldKey, FieldMetadata>,
	layouts: DashMap<TypeId, Arc<[FieldMetadata]>>,
}

impl FieldCache {
	/// Create new empty [`FieldCache`].
	pub fn new() -> Self {
		Self::default()
	}

	/// Get all fields of `ty`, in declaration order.
	pub fn fields_of(&self, ty: &TypeDescriptor) -> Result<Arc<[FieldMetadata]>> {
		let id = ty.key().id();
		if let Some(layout) = self.layouts.get(&id) {
			return Ok(Arc::clone(layout.value()));
		}

		RawMemory::acquire()?;
		let layout: Arc<[FieldMetadata]> = ty
			.fields()
			.iter()
			.map(|def| FieldMetadata {
				accessor: RawFieldAccessor::from_def(ty, def),
				transient: def.is_transient(),
			})
			.collect();
		for field in layout.iter() {
			let key = FieldKey {
				owner: id,
				name: field.name(),
			};
			self.fields.insert(key, *field);
		}
		debug!(ty = ty.name(), fields = layout.len(), "resolved field layout");

		// Another thread may have raced us. Both layouts are identical, keep the first.
		let entry = self.layouts.entry(id).or_insert(layout);
		Ok(Arc::clone(entry.value()))
	}

	/// Get single field of `ty` by name.
	pub fn field(&self, ty: &TypeDescriptor, name: &str) -> Result<FieldMetadata> {
		let layout = self.fields_of(ty)?;
		layout
			.iter()
			.find(|field| field.name() == name)
			.copied()
			.ok_or_else(|| Error::UnknownField {
				ty: ty.name(),
				field: name.to_string(),
			})
	}

	/// Look up field by key, if its owner's layout has been resolved.
	pub fn get(&self, key: &FieldKey) -> Option<FieldMetadata> {
		self.fields.get(key).map(|entry| *entry.value())
	}

	/// Number of types with resolved layouts.
	pub fn len(&self) -> usize {
		self.layouts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.layouts.is_empty()
	}
}
