use std::{sync::Arc, thread};

use ser_graph::{
	default_configuration, Array, Codec, Configuration, Decoder, Encoder, Error, List, ObjRef,
	Options, RecyclePool, Result, SerializerRegistryDelegate, Structure, Text, TypeDescriptor,
	TypeKey, MAX_CACHED_PER_TYPE,
};

mod common;
use common::{register_all, Item, Node, Player};

/// Codec which writes nothing, so it can be recognised by identity.
struct EmptyCodec;

impl Codec for EmptyCodec {
	fn encode(&self, _encoder: &mut Encoder<'_>, _obj: &ObjRef) -> Result<()> {
		Ok(())
	}

	fn decode(&self, _decoder: &mut Decoder<'_>, _obj: &ObjRef) -> Result<()> {
		Ok(())
	}
}

fn empty_codec() -> Arc<dyn Codec> {
	Arc::new(EmptyCodec)
}

trait Named {}

#[derive(Structure, Default)]
struct Shape {
	sides: u8,
}

#[derive(Structure, Default)]
#[structure(ancestors(Shape, "dyn Named"))]
struct Polygon {
	sides: u8,
}

#[derive(Structure, Default)]
#[structure(ancestors(Polygon))]
struct Square {
	side: f64,
}

#[derive(Structure, Default)]
#[structure(ancestors(Square, Shape))]
struct Tile {
	color: u32,
}

#[derive(Structure, Default)]
#[structure(no_array)]
struct Loner {
	value: u8,
}

#[test]
fn ids_are_sequential_and_deterministic() {
	let mut first = Configuration::new();
	register_all(&mut first);
	let mut second = Configuration::new();
	register_all(&mut second);

	let item = TypeDescriptor::of::<Item>();
	let player = TypeDescriptor::of::<Player>();
	let node = TypeDescriptor::of::<Node>();

	assert_eq!(first.type_id_of(&item), Some(0));
	assert_eq!(first.type_id_of(&TypeDescriptor::of::<Array<Item>>()), Some(1));
	assert_eq!(first.type_id_of(&player), Some(2));
	assert_eq!(first.type_id_of(&TypeDescriptor::of::<Array<Player>>()), Some(3));
	assert_eq!(first.type_id_of(&node), Some(4));
	assert_eq!(first.types().len(), 6);

	for ty in [item, player, node] {
		assert_eq!(first.type_id_of(&ty), second.type_id_of(&ty));
	}
	for (left, right) in first.types().iter().zip(second.types().iter()) {
		assert_eq!(left.id(), right.id());
		assert_eq!(left.descriptor(), right.descriptor());
	}
}

#[test]
fn registration_order_matters() {
	let mut first = Configuration::new();
	register_all(&mut first);

	let mut second = Configuration::new();
	second.register_class::<Node>();
	second.register_class::<Item>();
	second.register_class::<Player>();

	let node = TypeDescriptor::of::<Node>();
	assert_eq!(second.type_id_of(&node), Some(0));
	assert_ne!(first.type_id_of(&node), second.type_id_of(&node));
}

#[test]
fn duplicate_registration_keeps_first_id() {
	let mut conf = Configuration::new();
	assert_eq!(conf.register_class::<Item>(), 0);
	assert_eq!(conf.register_class::<Node>(), 2);
	assert_eq!(conf.register_class::<Item>(), 0);
	conf.register_classes(&[TypeDescriptor::of::<Node>(), TypeDescriptor::of::<Player>()]);

	assert_eq!(conf.types().len(), 6);
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<Node>()), Some(2));
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<Player>()), Some(4));
}

#[test]
fn array_variants() {
	let mut conf = Configuration::new();
	conf.register_class::<Item>();
	conf.register_class::<Loner>();

	let entry = conf.type_entry(0).unwrap();
	assert_eq!(*entry.descriptor(), TypeDescriptor::of::<Item>());
	assert_eq!(entry.array_id(), Some(1));

	let loner = conf.type_entry(2).unwrap();
	assert_eq!(*loner.descriptor(), TypeDescriptor::of::<Loner>());
	assert_eq!(loner.array_id(), None);
	assert_eq!(conf.types().len(), 3);

	// Arrays have no arrays of their own
	assert!(TypeDescriptor::of::<Array<Item>>().array_variant().is_none());
}

#[test]
fn builtins() {
	let conf = Configuration::create_default();
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<Text>()), Some(0));
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<List>()), Some(2));
	assert!(conf.serializers().entry(&TypeKey::of::<Text>()).is_some());
	assert!(conf.serializers().entry(&TypeKey::of::<List>()).is_some());

	let bare = Configuration::new();
	assert!(bare.types().is_empty());
	assert!(bare.serializers().is_empty());
}

#[test]
fn serializer_exact_match() {
	let mut conf = Configuration::new();
	let codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Item>(), Arc::clone(&codec), false);

	let resolved = conf.serializer_for(&TypeDescriptor::of::<Item>());
	assert!(Arc::ptr_eq(&resolved, &codec));

	let other = conf.serializer_for(&TypeDescriptor::of::<Node>());
	assert!(!Arc::ptr_eq(&other, &codec));
}

#[test]
fn serializer_via_ancestor() {
	let mut conf = Configuration::new();
	let shape_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Shape>(), Arc::clone(&shape_codec), true);

	let resolved = conf.serializer_for(&TypeDescriptor::of::<Polygon>());
	assert!(Arc::ptr_eq(&resolved, &shape_codec));
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Square>());
	assert!(Arc::ptr_eq(&resolved, &shape_codec));
}

#[test]
fn serializer_ancestor_requires_include_subclasses() {
	let mut conf = Configuration::new();
	let shape_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Shape>(), Arc::clone(&shape_codec), false);

	let resolved = conf.serializer_for(&TypeDescriptor::of::<Polygon>());
	assert!(!Arc::ptr_eq(&resolved, &shape_codec));
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Shape>());
	assert!(Arc::ptr_eq(&resolved, &shape_codec));
}

#[test]
fn serializer_nearest_ancestor_wins() {
	let mut conf = Configuration::new();
	let shape_codec = empty_codec();
	let polygon_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Shape>(), Arc::clone(&shape_codec), true);
	conf.register_serializer(TypeKey::of::<Polygon>(), Arc::clone(&polygon_codec), true);

	let resolved = conf.serializer_for(&TypeDescriptor::of::<Square>());
	assert!(Arc::ptr_eq(&resolved, &polygon_codec));
}

#[test]
fn serializer_via_capability() {
	let mut conf = Configuration::new();
	let named_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<dyn Named>(), Arc::clone(&named_codec), true);

	let resolved = conf.serializer_for(&TypeDescriptor::of::<Polygon>());
	assert!(Arc::ptr_eq(&resolved, &named_codec));
	// Inherited through `Polygon`
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Square>());
	assert!(Arc::ptr_eq(&resolved, &named_codec));
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Shape>());
	assert!(!Arc::ptr_eq(&resolved, &named_codec));
}

#[test]
fn ancestors_are_inherited() {
	assert_eq!(
		Square::ancestors(),
		[
			TypeKey::of::<Polygon>(),
			TypeKey::of::<Shape>(),
			TypeKey::of::<dyn Named>(),
		]
	);
	assert_eq!(
		TypeDescriptor::of::<Polygon>().ancestors(),
		[TypeKey::of::<Shape>(), TypeKey::of::<dyn Named>()]
	);
	assert!(Shape::ancestors().is_empty());

	// Declared twice, directly and through `Square`, listed once
	assert_eq!(
		Tile::ancestors(),
		[
			TypeKey::of::<Square>(),
			TypeKey::of::<Polygon>(),
			TypeKey::of::<Shape>(),
			TypeKey::of::<dyn Named>(),
		]
	);
}

#[test]
fn serializer_via_inherited_ancestor() {
	let mut conf = Configuration::new();
	let shape_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Shape>(), Arc::clone(&shape_codec), true);

	// `Tile` declares neither `Polygon` nor `Shape` itself
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Tile>());
	assert!(Arc::ptr_eq(&resolved, &shape_codec));

	let square_codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Square>(), Arc::clone(&square_codec), true);
	let resolved = conf.serializer_for(&TypeDescriptor::of::<Tile>());
	assert!(Arc::ptr_eq(&resolved, &square_codec));
}

#[test]
fn serializer_registration_replaces_memoized_lookup() {
	let mut conf = Configuration::new();
	let before = conf.serializer_for(&TypeDescriptor::of::<Item>());

	let codec = empty_codec();
	conf.register_serializer(TypeKey::of::<Item>(), Arc::clone(&codec), false);
	let after = conf.serializer_for(&TypeDescriptor::of::<Item>());

	assert!(!Arc::ptr_eq(&before, &codec));
	assert!(Arc::ptr_eq(&after, &codec));
}

struct ItemDelegate {
	codec: Arc<dyn Codec>,
}

impl SerializerRegistryDelegate for ItemDelegate {
	fn serializer_for(&self, ty: &TypeDescriptor) -> Option<Arc<dyn Codec>> {
		(ty.key() == TypeKey::of::<Item>()).then(|| Arc::clone(&self.codec))
	}
}

#[test]
fn serializer_delegate_consulted_first() {
	let mut conf = Configuration::new();
	let registered = empty_codec();
	let delegated = empty_codec();
	conf.register_serializer(TypeKey::of::<Item>(), Arc::clone(&registered), false);
	conf.register_serializer(TypeKey::of::<Node>(), Arc::clone(&registered), false);
	conf.set_serializer_registry_delegate(Some(Box::new(ItemDelegate {
		codec: Arc::clone(&delegated),
	})));

	let item = conf.serializer_for(&TypeDescriptor::of::<Item>());
	assert!(Arc::ptr_eq(&item, &delegated));
	// Delegate declines, so falls through to registry
	let node = conf.serializer_for(&TypeDescriptor::of::<Node>());
	assert!(Arc::ptr_eq(&node, &registered));

	conf.set_serializer_registry_delegate(None);
	let item = conf.serializer_for(&TypeDescriptor::of::<Item>());
	assert!(Arc::ptr_eq(&item, &registered));
}

#[test]
fn names() {
	assert_eq!(TypeDescriptor::of::<Item>().name(), "item");
	assert_eq!(TypeDescriptor::of::<Text>().name(), "text");
	assert_eq!(TypeDescriptor::of::<Shape>().name(), std::any::type_name::<Shape>());
}

#[test]
fn resolve_by_name() {
	let mut conf = Configuration::new();
	assert_eq!(conf.resolve_type_name("item"), None);

	conf.register_known(TypeDescriptor::of::<Item>());
	assert_eq!(conf.resolve_type_name("item"), Some(TypeDescriptor::of::<Item>()));
	// Known types have no id
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<Item>()), None);

	conf.register_class::<Node>();
	assert_eq!(conf.resolve_type_name("node"), Some(TypeDescriptor::of::<Node>()));
}

#[test]
fn last_resort_resolver() {
	let mut conf = Configuration::new();
	conf.set_last_resort_resolver(|name| match name {
		"legacy.item" => Some(TypeDescriptor::of::<Item>()),
		_ => None,
	});

	assert_eq!(conf.resolve_type_name("legacy.item"), Some(TypeDescriptor::of::<Item>()));
	assert_eq!(conf.resolve_type_name("legacy.node"), None);
}

#[test]
fn unknown_name_on_decode() {
	// Sender knows nothing, so writes type by name
	let sender = Configuration::new();
	let bytes = sender
		.as_byte_array(&ObjRef::new(Item {
			count: 3,
			slot: 1,
			id: "stone".to_string(),
		}))
		.unwrap();

	let mut receiver = Configuration::new();
	match receiver.as_object(&bytes) {
		Err(Error::UnknownTypeName(name)) => assert_eq!(name, "item"),
		other => panic!("unexpected result {other:?}"),
	}

	receiver.set_last_resort_resolver(|name| (name == "item").then(TypeDescriptor::of::<Item>));
	let obj = receiver.as_object(&bytes).unwrap().unwrap();
	assert_eq!(obj.borrow::<Item>().unwrap().id, "stone");
}

#[test]
fn options_from_json() {
	let options: Options = serde_json::from_str("{}").unwrap();
	assert_eq!(options, Options::default());
	assert!(options.share_references);
	assert_eq!(options.max_depth, 256);

	let options: Options = serde_json::from_str(
		r#"{
			"name": "wire",
			"share_references": false,
			"force_serializable": true,
			"struct_mode": true,
			"max_depth": 32,
			"builtins": false
		}"#,
	)
	.unwrap();
	let conf = Configuration::from_options(options);
	assert_eq!(conf.name(), Some("wire"));
	assert!(!conf.is_share_references());
	assert!(conf.is_force_serializable());
	assert!(conf.is_struct_mode());
	assert_eq!(conf.max_depth(), 32);
	assert!(conf.types().is_empty());
}

#[test]
fn setters() {
	let mut conf = Configuration::create_default();
	assert_eq!(conf.name(), None);
	conf.set_name("debug");
	conf.set_share_references(false);
	conf.set_force_serializable(true);
	conf.set_struct_mode(true);
	conf.set_max_depth(8);

	assert_eq!(conf.name(), Some("debug"));
	assert!(!conf.is_share_references());
	assert!(conf.is_force_serializable());
	assert!(conf.is_struct_mode());
	assert_eq!(conf.max_depth(), 8);
	assert_eq!(conf.options().max_depth, 8);
}

#[test]
fn default_configuration_is_singleton() {
	let conf = default_configuration();
	assert!(std::ptr::eq(conf, default_configuration()));
	assert_eq!(conf.type_id_of(&TypeDescriptor::of::<Text>()), Some(0));

	let addrs: Vec<usize> = (0..8)
		.map(|_| thread::spawn(|| default_configuration() as *const Configuration as usize))
		.collect::<Vec<_>>()
		.into_iter()
		.map(|handle| handle.join().unwrap())
		.collect();
	for addr in addrs {
		assert_eq!(addr, conf as *const Configuration as usize);
	}
}

#[test]
fn recycled_objects() {
	let conf = Configuration::new();
	for index in 0..7 {
		conf.return_object(vec![index; 4]);
	}
	assert_eq!(conf.recycle_pool().cached::<Vec<i32>>(), MAX_CACHED_PER_TYPE);

	let mut taken = 0;
	while let Some(buffer) = conf.get_cached_object::<Vec<i32>>() {
		assert_eq!(buffer.len(), 4);
		taken += 1;
	}
	assert!(taken <= 5);
	assert_eq!(conf.get_cached_object::<String>(), None);

	conf.return_object(String::from("scratch"));
	conf.invalidate_cached_objects();
	assert_eq!(conf.get_cached_object::<String>(), None);
}

#[test]
fn recycle_pool_is_lifo_and_bounded() {
	let pool = RecyclePool::new();
	for n in 0..7u32 {
		pool.put(n);
	}
	assert_eq!(pool.cached::<u32>(), MAX_CACHED_PER_TYPE);

	let mut taken = Vec::new();
	while let Some(n) = pool.get::<u32>() {
		taken.push(n);
	}
	assert_eq!(taken, vec![4, 3, 2, 1, 0]);
	assert_eq!(pool.get::<u64>(), None);

	pool.put(1u8);
	pool.invalidate();
	assert_eq!(pool.cached::<u8>(), 0);
	pool.put(2u8);
	assert_eq!(pool.get::<u8>(), Some(2));

	// Full pool of stale objects makes room for new ones, keeping their order
	for n in 0..5u16 {
		pool.put(n);
	}
	pool.invalidate();
	for n in 10..17u16 {
		pool.put(n);
	}
	assert_eq!(pool.cached::<u16>(), MAX_CACHED_PER_TYPE);
	let mut taken = Vec::new();
	while let Some(n) = pool.get::<u16>() {
		taken.push(n);
	}
	assert_eq!(taken, vec![14, 13, 12, 11, 10]);
}

#[test]
fn shared_across_threads() {
	let mut conf = Configuration::create_default();
	register_all(&mut conf);
	let conf = Arc::new(conf);

	let handles: Vec<_> = (0..4)
		.map(|thread_index| {
			let conf = Arc::clone(&conf);
			thread::spawn(move || {
				for index in 0..50 {
					let item = ObjRef::new(Item {
						count: thread_index,
						slot: index,
						id: format!("item-{thread_index}-{index}"),
					});
					let bytes = conf.as_byte_array(&item).unwrap();
					let decoded = conf.as_object(&bytes).unwrap().unwrap();
					assert_eq!(*decoded.borrow::<Item>().unwrap(), *item.borrow::<Item>().unwrap());
				}
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}
}
