//! Configuration: type registry, serializer registry, flags, and pools.

use std::{
	any::Any,
	fmt,
	io::{Read, Write},
	ptr,
	sync::{
		atomic::{AtomicPtr, Ordering},
		Arc,
	},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
	codec::{
		Codec, ListCodec, SerializerRegistry, SerializerRegistryDelegate, StructCodec, TextCodec,
	},
	coder::{Decoder, Encoder, SharedBytes},
	field::{FieldCache, FieldMetadata},
	pool::RecyclePool,
	spin::SpinLock,
	types::{TypeEntry, TypeRegistry},
	List, ObjRef, Result, Structure, Text, TypeDescriptor, TypeKey,
};

/// Number of leading bytes of a buffer shown when decoding it fails.
const PREVIEW_LEN: usize = 100;

/// Resolver of type names nothing else recognises.
pub type LastResortResolver = dyn Fn(&str) -> Option<TypeDescriptor> + Send + Sync;

/// Settings for a [`Configuration`].
///
/// All fields have defaults, so any subset can be given, e.g. as JSON:
///
/// ```
/// use ser_graph::{Configuration, Options};
///
/// let options: Options = serde_json::from_str(r#"{"name": "rpc", "max_depth": 64}"#).unwrap();
/// let conf = Configuration::from_options(options);
/// assert_eq!(conf.name(), Some("rpc"));
/// assert_eq!(conf.max_depth(), 64);
/// assert!(conf.is_share_references());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
	/// Name, for debugging
	pub name: Option<String>,
	/// Preserve object identity (shared references and cycles). Default `true`.
	pub share_references: bool,
	/// Encode types not marked serializable. Default `false`.
	pub force_serializable: bool,
	/// Encode transient fields and types not marked serializable. Default `false`.
	pub struct_mode: bool,
	/// Maximum nesting depth of a graph. Default 256.
	pub max_depth: usize,
	/// Initial size of identity maps used by coders. Default 8.
	pub identity_map_size: usize,
	/// Register built-in types and codecs. Default `true`.
	pub builtins: bool,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			name: None,
			share_references: true,
			force_serializable: false,
			struct_mode: false,
			max_depth: 256,
			identity_map_size: 8,
			builtins: true,
		}
	}
}

/// Configuration for encoding and decoding object graphs.
///
/// Set up with `&mut self` methods, then share (`&Configuration`,
/// `Arc<Configuration>`) between any number of threads for encoding /
/// decoding.
///
/// Two peers exchanging bytes must register the same types in the same
/// order, and agree on the reference sharing flag.
///
/// ```
/// use ser_graph::{Configuration, ObjRef, Structure};
///
/// #[derive(Structure, Default)]
/// struct Point {
/// 	x: i32,
/// 	y: i32,
/// }
///
/// let mut conf = Configuration::create_default();
/// conf.register_class::<Point>();
///
/// let bytes = conf.as_byte_array(&ObjRef::new(Point { x: 1, y: -2 })).unwrap();
/// let obj = conf.as_object(&bytes).unwrap().unwrap();
/// let point = obj.borrow::<Point>().unwrap();
/// assert_eq!((point.x, point.y), (1, -2));
/// ```
pub struct Configuration {
	options: Options,
	types: TypeRegistry,
	serializers: SerializerRegistry,
	struct_codec: Arc<dyn Codec>,
	field_cache: Arc<FieldCache>,
	recycled: RecyclePool,
	last_resort: Option<Box<LastResortResolver>>,
}

static DEFAULT_CONFIGURATION: AtomicPtr<Configuration> = AtomicPtr::new(ptr::null_mut());
static DEFAULT_CONFIGURATION_INIT: SpinLock<()> = SpinLock::new(());

/// Get process-wide default configuration, created on first call with
/// [`Configuration::create_default`].
///
/// Every caller gets the same instance.
pub fn default_configuration() -> &'static Configuration {
	let conf = DEFAULT_CONFIGURATION.load(Ordering::Acquire);
	if !conf.is_null() {
		// Only ever set to a leaked `Box`, which is never freed
		return unsafe { &*conf };
	}

	let _guard = DEFAULT_CONFIGURATION_INIT.lock();
	let conf = DEFAULT_CONFIGURATION.load(Ordering::Acquire);
	if !conf.is_null() {
		return unsafe { &*conf };
	}
	let conf: &'static Configuration = Box::leak(Box::new(Configuration::create_default()));
	DEFAULT_CONFIGURATION.store(
		conf as *const Configuration as *mut Configuration,
		Ordering::Release,
	);
	conf
}

impl Configuration {
	/// Create bare configuration, with no types or serializers registered.
	pub fn new() -> Self {
		Self::from_options(Options {
			builtins: false,
			..Options::default()
		})
	}

	/// Create configuration with built-in types and codecs registered.
	pub fn create_default() -> Self {
		Self::from_options(Options::default())
	}

	/// Create configuration from `options`.
	pub fn from_options(options: Options) -> Self {
		let builtins = options.builtins;
		let mut conf = Self {
			options,
			types: TypeRegistry::new(),
			serializers: SerializerRegistry::new(),
			struct_codec: Arc::new(StructCodec),
			field_cache: Arc::new(FieldCache::new()),
			recycled: RecyclePool::new(),
			last_resort: None,
		};
		if builtins {
			conf.add_builtins();
		}
		debug!(
			name = conf.options.name.as_deref().unwrap_or("<unnamed>"),
			types = conf.types.len(),
			share_references = conf.options.share_references,
			"created configuration"
		);
		conf
	}

	fn add_builtins(&mut self) {
		self.register_class::<Text>();
		self.register_class::<List>();
		self.register_serializer(TypeKey::of::<Text>(), Arc::new(TextCodec), false);
		self.register_serializer(TypeKey::of::<List>(), Arc::new(ListCodec), false);
	}

	/// Use `cache` for field metadata, instead of this configuration's own.
	///
	/// Configurations sharing a cache resolve each type's fields once.
	pub fn with_field_cache(mut self, cache: Arc<FieldCache>) -> Self {
		self.field_cache = cache;
		self
	}

	#[inline]
	pub fn options(&self) -> &Options {
		&self.options
	}

	/// Name, for debugging.
	#[inline]
	pub fn name(&self) -> Option<&str> {
		self.options.name.as_deref()
	}

	pub fn set_name(&mut self, name: impl Into<String>) {
		self.options.name = Some(name.into());
	}

	#[inline]
	pub fn is_share_references(&self) -> bool {
		self.options.share_references
	}

	pub fn set_share_references(&mut self, share_references: bool) {
		self.options.share_references = share_references;
	}

	#[inline]
	pub fn is_force_serializable(&self) -> bool {
		self.options.force_serializable
	}

	pub fn set_force_serializable(&mut self, force_serializable: bool) {
		self.options.force_serializable = force_serializable;
	}

	#[inline]
	pub fn is_struct_mode(&self) -> bool {
		self.options.struct_mode
	}

	pub fn set_struct_mode(&mut self, struct_mode: bool) {
		self.options.struct_mode = struct_mode;
	}

	#[inline]
	pub fn max_depth(&self) -> usize {
		self.options.max_depth
	}

	pub fn set_max_depth(&mut self, max_depth: usize) {
		self.options.max_depth = max_depth;
	}

	// Types

	/// Register type `T` and its companion array type, returning `T`'s id.
	pub fn register_class<T: Structure>(&mut self) -> u32 {
		self.types.register_with_array(TypeDescriptor::of::<T>())
	}

	/// Register types in order, each followed by its companion array type.
	///
	/// Types already registered keep their first id.
	pub fn register_classes(&mut self, types: &[TypeDescriptor]) {
		for ty in types {
			self.types.register_with_array(*ty);
		}
	}

	/// Make type resolvable by name when decoding, without assigning it an id.
	pub fn register_known(&mut self, ty: TypeDescriptor) {
		self.types.register_known(ty);
	}

	/// Set resolver for type names which are neither registered nor known.
	pub fn set_last_resort_resolver<F>(&mut self, resolver: F)
	where
		F: Fn(&str) -> Option<TypeDescriptor> + Send + Sync + 'static,
	{
		self.last_resort = Some(Box::new(resolver));
	}

	#[inline]
	pub fn types(&self) -> &TypeRegistry {
		&self.types
	}

	/// Get wire id of type, if registered.
	#[inline]
	pub fn type_id_of(&self, ty: &TypeDescriptor) -> Option<u32> {
		self.types.id_of(&ty.key())
	}

	#[inline]
	pub fn type_entry(&self, id: u32) -> Option<&TypeEntry> {
		self.types.entry(id)
	}

	/// Resolve type from wire name, falling back to last-resort resolver.
	pub fn resolve_type_name(&self, name: &str) -> Option<TypeDescriptor> {
		self.types.by_name(name).or_else(|| {
			let resolver = self.last_resort.as_ref()?;
			let ty = resolver(name);
			if ty.is_some() {
				debug!(name, "type resolved by last-resort resolver");
			}
			ty
		})
	}

	// Serializers

	/// Register codec for type `ty`.
	///
	/// With `include_subclasses`, it also applies to types which declare `ty`
	/// as an ancestor, and have no codec of their own.
	pub fn register_serializer(
		&mut self,
		ty: TypeKey,
		codec: Arc<dyn Codec>,
		include_subclasses: bool,
	) {
		self.serializers.put(ty, codec, include_subclasses);
	}

	/// Set delegate consulted before registered codecs. `None` removes it.
	pub fn set_serializer_registry_delegate(
		&mut self,
		delegate: Option<Box<dyn SerializerRegistryDelegate>>,
	) {
		self.serializers.set_delegate(delegate);
	}

	#[inline]
	pub fn serializers(&self) -> &SerializerRegistry {
		&self.serializers
	}

	/// Get codec for type. Types with no registered codec use [`StructCodec`].
	pub fn serializer_for(&self, ty: &TypeDescriptor) -> Arc<dyn Codec> {
		self
			.serializers
			.get(ty)
			.unwrap_or_else(|| Arc::clone(&self.struct_codec))
	}

	// Fields

	#[inline]
	pub fn field_cache(&self) -> &Arc<FieldCache> {
		&self.field_cache
	}

	/// Get field metadata of type, in declaration order.
	#[inline]
	pub fn fields_of(&self, ty: &TypeDescriptor) -> Result<Arc<[FieldMetadata]>> {
		self.field_cache.fields_of(ty)
	}

	// Coders

	/// Get encoder, reusing this thread's pooled storage if available.
	pub fn get_coder_for_encode(&self) -> Encoder<'_> {
		Encoder::new(self)
	}

	/// Get decoder for `bytes`, reusing this thread's pooled storage if available.
	pub fn get_coder_for_decode<'a>(&'a self, bytes: &'a [u8]) -> Decoder<'a> {
		Decoder::new(self, bytes)
	}

	// Recycled objects

	/// Offer `object` for reuse.
	pub fn return_object<T: Any + Send>(&self, object: T) {
		self.recycled.put(object);
	}

	/// Take a previously returned object of type `T`, if any is cached.
	pub fn get_cached_object<T: Any + Send>(&self) -> Option<T> {
		self.recycled.get()
	}

	/// Discard all cached objects.
	pub fn invalidate_cached_objects(&self) {
		self.recycled.invalidate();
	}

	#[inline]
	pub fn recycle_pool(&self) -> &RecyclePool {
		&self.recycled
	}

	// Convenience

	/// Encode `obj` into a new byte vector.
	pub fn as_byte_array(&self, obj: &ObjRef) -> Result<Vec<u8>> {
		let mut encoder = self.get_coder_for_encode();
		encoder.write_object(Some(obj))?;
		Ok(encoder.to_vec())
	}

	/// Encode `obj` into this thread's pooled buffer, and return a view of it
	/// without copying.
	pub fn as_shared_byte_array(&self, obj: &ObjRef) -> Result<SharedBytes<'_>> {
		let mut encoder = self.get_coder_for_encode();
		encoder.write_object(Some(obj))?;
		Ok(SharedBytes::new(encoder))
	}

	/// Decode object from `bytes`.
	///
	/// On failure, logs a preview of the start of `bytes` before returning the error.
	pub fn as_object(&self, bytes: &[u8]) -> Result<Option<ObjRef>> {
		let mut decoder = self.get_coder_for_decode(bytes);
		decoder.read_object().map_err(|err| {
			let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_LEN)]);
			warn!(error = %err, len = bytes.len(), %preview, "failed to decode object");
			err
		})
	}

	/// Encode `obj` to `writer`. Returns number of bytes written.
	pub fn write_object<W: Write>(&self, obj: &ObjRef, writer: &mut W) -> Result<usize> {
		let mut encoder = self.get_coder_for_encode();
		encoder.write_object(Some(obj))?;
		writer.write_all(encoder.as_bytes())?;
		Ok(encoder.written())
	}

	/// Read all of `reader`, and decode an object from it.
	pub fn read_object<R: Read>(&self, reader: &mut R) -> Result<Option<ObjRef>> {
		let mut bytes = Vec::new();
		reader.read_to_end(&mut bytes)?;
		self.as_object(&bytes)
	}
}

impl Default for Configuration {
	fn default() -> Self {
		Self::create_default()
	}
}

impl fmt::Debug for Configuration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Configuration")
			.field("options", &self.options)
			.field("types", &self.types.len())
			.field("serializers", &self.serializers.len())
			.finish_non_exhaustive()
	}
}
