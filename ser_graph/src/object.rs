use std::{
	any::{Any, TypeId},
	cell::{Ref, RefCell, RefMut},
	fmt,
	rc::Rc,
};

use crate::{identity_map::IdentityKey, Error, Result, Structure, TypeDescriptor};

struct Obj {
	ty: TypeDescriptor,
	value: RefCell<Box<dyn Any>>,
}

/// Shared handle to an object in a graph.
///
/// Cloning an `ObjRef` shares the object. Identity is preserved through
/// encoding / decoding when reference sharing is enabled.
///
/// Graphs may contain cycles. `Rc` does not collect cycles, so break them
/// (e.g. set a `next` field to `None`) when a cyclic graph is finished with.
#[derive(Clone)]
pub struct ObjRef(Rc<Obj>);

impl ObjRef {
	/// Wrap `value` in a new object.
	pub fn new<T: Structure>(value: T) -> Self {
		Self(Rc::new(Obj {
			ty: TypeDescriptor::of::<T>(),
			value: RefCell::new(Box::new(value)),
		}))
	}

	/// Create default-valued object of type described by `ty`.
	pub fn instantiate(ty: &TypeDescriptor) -> Self {
		Self(Rc::new(Obj {
			ty: *ty,
			value: RefCell::new(ty.construct()),
		}))
	}

	/// Get descriptor of object's type.
	#[inline]
	pub fn descriptor(&self) -> &TypeDescriptor {
		&self.0.ty
	}

	/// Check if object is of type `T`.
	#[inline]
	pub fn is<T: Structure>(&self) -> bool {
		self.0.ty.key().id() == TypeId::of::<T>()
	}

	/// Borrow object as `T`.
	///
	/// Returns `None` if object is not a `T`.
	///
	/// # Panics
	///
	/// Panics if object is currently mutably borrowed.
	pub fn borrow<T: Structure>(&self) -> Option<Ref<'_, T>> {
		Ref::filter_map(self.0.value.borrow(), |value| value.downcast_ref::<T>()).ok()
	}

	/// Mutably borrow object as `T`.
	///
	/// Returns `None` if object is not a `T`.
	///
	/// # Panics
	///
	/// Panics if object is currently borrowed.
	pub fn borrow_mut<T: Structure>(&self) -> Option<RefMut<'_, T>> {
		RefMut::filter_map(self.0.value.borrow_mut(), |value| value.downcast_mut::<T>()).ok()
	}

	/// Borrow object's value, for field access.
	pub(crate) fn try_borrow_value(&self) -> Result<Ref<'_, Box<dyn Any>>> {
		self
			.0
			.value
			.try_borrow()
			.map_err(|_| Error::ObjectBorrowed(self.0.ty.name()))
	}

	/// Mutably borrow object's value, for field access.
	pub(crate) fn try_borrow_value_mut(&self) -> Result<RefMut<'_, Box<dyn Any>>> {
		self
			.0
			.value
			.try_borrow_mut()
			.map_err(|_| Error::ObjectBorrowed(self.0.ty.name()))
	}

	/// Check if two handles point to the same object.
	#[inline]
	pub fn ptr_eq(&self, other: &ObjRef) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Identity key of this object.
	#[inline]
	pub fn key(&self) -> ObjKey {
		ObjKey {
			addr: Rc::as_ptr(&self.0) as *const () as usize,
			ty: self.0.ty.key().id(),
		}
	}
}

impl fmt::Debug for ObjRef {
	// Graph may be cyclic, so only show type and address
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObjRef<{}>({:#x})", self.0.ty.name(), self.key().addr)
	}
}

/// Identity of an object, for use as [`IdentityMap`](crate::IdentityMap) key.
///
/// Only valid while the object is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjKey {
	addr: usize,
	ty: TypeId,
}

impl ObjKey {
	#[inline]
	pub fn addr(&self) -> usize {
		self.addr
	}
}

impl IdentityKey for ObjKey {
	#[inline]
	fn type_tag(&self) -> TypeId {
		self.ty
	}
}
