//! Registry assigning compact wire ids to types.

use std::any::TypeId;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{TypeDescriptor, TypeKey};

/// Registered type.
#[derive(Clone, Copy, Debug)]
pub struct TypeEntry {
	id: u32,
	descriptor: TypeDescriptor,
	array_id: Option<u32>,
}

impl TypeEntry {
	/// Wire id.
	#[inline]
	pub fn id(&self) -> u32 {
		self.id
	}

	#[inline]
	pub fn descriptor(&self) -> &TypeDescriptor {
		&self.descriptor
	}

	/// Wire id of companion array type, if it was registered with this type.
	#[inline]
	pub fn array_id(&self) -> Option<u32> {
		self.array_id
	}
}

/// Registry of types.
///
/// Ids are assigned sequentially from 0 in registration order, so two
/// registries which register the same types in the same order agree on ids.
/// Registering a type again keeps its original id.
///
/// Types can also be made known by name only, without an id. Those are
/// written on the wire by name, and can be resolved by name when decoding.
#[derive(Default)]
pub struct TypeRegistry {
	entries: Vec<TypeEntry>,
	ids: FxHashMap<TypeId, u32>,
	names: FxHashMap<&'static str, TypeDescriptor>,
}

impl TypeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `ty`, returning its id.
	pub fn register(&mut self, ty: TypeDescriptor) -> u32 {
		if let Some(&id) = self.ids.get(&ty.key().id()) {
			return id;
		}

		let id = self.entries.len() as u32;
		self.entries.push(TypeEntry {
			id,
			descriptor: ty,
			array_id: None,
		});
		self.ids.insert(ty.key().id(), id);
		self.register_known(ty);
		debug!(id, ty = ty.name(), "registered type");
		id
	}

	/// Register `ty`, and then its companion array type, if it has one.
	pub fn register_with_array(&mut self, ty: TypeDescriptor) -> u32 {
		let id = self.register(ty);
		if let Some(array) = ty.array_variant() {
			let array_id = self.register(array);
			self.entries[id as usize].array_id = Some(array_id);
		}
		id
	}

	/// Make `ty` resolvable by name, without assigning it an id.
	pub fn register_known(&mut self, ty: TypeDescriptor) {
		let existing = *self.names.entry(ty.name()).or_insert(ty);
		if existing != ty {
			warn!(
				name = ty.name(),
				"type name already taken by another type, keeping first"
			);
		}
	}

	/// Get id of type, if registered.
	#[inline]
	pub fn id_of(&self, ty: &TypeKey) -> Option<u32> {
		self.ids.get(&ty.id()).copied()
	}

	/// Get entry for `id`.
	#[inline]
	pub fn entry(&self, id: u32) -> Option<&TypeEntry> {
		self.entries.get(id as usize)
	}

	/// Find type by wire name.
	pub fn by_name(&self, name: &str) -> Option<TypeDescriptor> {
		self.names.get(name).copied()
	}

	/// Iterate over registered types, in id order.
	pub fn iter(&self) -> impl Iterator<Item = &TypeEntry> {
		self.entries.iter()
	}

	/// Number of types with ids.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
