#![allow(dead_code)]

use std::{collections::HashMap, ops};

use rand::Rng;
use rand_pcg::Lcg64Xsh32;
use ser_graph::{Configuration, ObjRef, Structure};

const STATE: u64 = 3141592653;
const STREAM: u64 = 5897932384;

/// Seeded RNG, so every run generates the same data.
pub fn rng() -> Lcg64Xsh32 {
	Lcg64Xsh32::new(STATE, STREAM)
}

#[derive(Structure, Default, Clone, Debug, PartialEq)]
#[structure(name = "item")]
pub struct Item {
	pub count: i8,
	pub slot: u8,
	pub id: String,
}

#[derive(Structure, Default)]
#[structure(name = "player")]
pub struct Player {
	pub name: String,
	pub health: f32,
	pub food_saturation: f64,
	pub xp: u32,
	pub score: i64,
	pub game_type: u16,
	pub flying: bool,
	pub symbol: char,
	pub avatar: Vec<u8>,
	pub inventory: Vec<ObjRef>,
	pub best_friend: Option<ObjRef>,
	#[structure(transient)]
	pub session: u64,
}

#[derive(Structure, Default)]
#[structure(name = "node")]
pub struct Node {
	pub value: i32,
	pub next: Option<ObjRef>,
}

impl Node {
	pub fn new(value: i32) -> ObjRef {
		ObjRef::new(Node { value, next: None })
	}
}

/// Link `from.next` to `to`.
pub fn link(from: &ObjRef, to: &ObjRef) {
	from.borrow_mut::<Node>().unwrap().next = Some(to.clone());
}

/// Drop `next` of every node in a chain, so cyclic chains are freed.
pub fn unlink(start: &ObjRef) {
	let mut current = Some(start.clone());
	while let Some(node) = current {
		current = node.borrow_mut::<Node>().unwrap().next.take();
	}
}

/// Register test types, in a fixed order.
pub fn register_all(conf: &mut Configuration) {
	conf.register_class::<Item>();
	conf.register_class::<Player>();
	conf.register_class::<Node>();
}

fn generate_item<R: Rng>(rng: &mut R) -> ObjRef {
	const IDS: [&str; 8] = [
		"dirt",
		"stone",
		"pickaxe",
		"sand",
		"gravel",
		"shovel",
		"chestplate",
		"steak",
	];
	ObjRef::new(Item {
		count: rng.gen(),
		slot: rng.gen(),
		id: IDS[rng.gen_range(0..IDS.len())].to_string(),
	})
}

fn generate_string<R: Rng>(rng: &mut R, len: ops::Range<usize>) -> String {
	let len = rng.gen_range(len);
	(0..len)
		.map(|_| rng.gen_range(b'a'..=b'z') as char)
		.collect()
}

/// Generate players with inventories drawn from a shared pool of items,
/// and best friends pointing at other players (so graph contains cycles).
pub fn generate_players(count: usize) -> Vec<ObjRef> {
	let mut rng = rng();
	let items: Vec<ObjRef> = (0..count.max(1) * 2).map(|_| generate_item(&mut rng)).collect();

	let players: Vec<ObjRef> = (0..count)
		.map(|_| {
			let inventory_len = rng.gen_range(0..6);
			let inventory = (0..inventory_len)
				.map(|_| items[rng.gen_range(0..items.len())].clone())
				.collect();
			ObjRef::new(Player {
				name: generate_string(&mut rng, 3..12),
				health: rng.gen(),
				food_saturation: rng.gen(),
				xp: rng.gen(),
				score: rng.gen(),
				game_type: rng.gen_range(0..4),
				flying: rng.gen(),
				symbol: rng.gen_range('a'..='z'),
				avatar: (0..rng.gen_range(0..16)).map(|_| rng.gen()).collect(),
				inventory,
				best_friend: None,
				session: rng.gen(),
			})
		})
		.collect();

	for player in &players {
		if rng.gen_bool(0.7) {
			let friend = players[rng.gen_range(0..players.len())].clone();
			player.borrow_mut::<Player>().unwrap().best_friend = Some(friend);
		}
	}

	players
}

/// Drop best friend links, so cyclic player graphs are freed.
pub fn release_players(players: &[ObjRef]) {
	for player in players {
		player.borrow_mut::<Player>().unwrap().best_friend = None;
	}
}

/// Checks two graphs have equal content and the same shape,
/// i.e. objects shared in one are shared in the other.
#[derive(Default)]
pub struct GraphComparer {
	// Address of object in left graph -> object in right graph
	seen: HashMap<usize, ObjRef>,
}

impl GraphComparer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn assert_same(&mut self, left: &ObjRef, right: &ObjRef) {
		let addr = left.key().addr();
		if let Some(previous) = self.seen.get(&addr) {
			assert!(
				previous.ptr_eq(right),
				"object shared in left graph is not shared in right graph"
			);
			return;
		}
		self.seen.insert(addr, right.clone());

		if let Some(left_item) = left.borrow::<Item>() {
			let right_item = right.borrow::<Item>().expect("expected item");
			assert_eq!(*left_item, *right_item);
		} else if let Some(left_player) = left.borrow::<Player>() {
			let right_player = right.borrow::<Player>().expect("expected player");
			self.assert_same_player(&left_player, &right_player);
		} else if let Some(left_node) = left.borrow::<Node>() {
			let right_node = right.borrow::<Node>().expect("expected node");
			assert_eq!(left_node.value, right_node.value);
			self.assert_same_option(&left_node.next, &right_node.next);
		} else {
			panic!("unexpected type {}", left.descriptor().name());
		}
	}

	fn assert_same_player(&mut self, left: &Player, right: &Player) {
		assert_eq!(left.name, right.name);
		assert_eq!(left.health.to_bits(), right.health.to_bits());
		assert_eq!(left.food_saturation.to_bits(), right.food_saturation.to_bits());
		assert_eq!(left.xp, right.xp);
		assert_eq!(left.score, right.score);
		assert_eq!(left.game_type, right.game_type);
		assert_eq!(left.flying, right.flying);
		assert_eq!(left.symbol, right.symbol);
		assert_eq!(left.avatar, right.avatar);
		assert_eq!(left.inventory.len(), right.inventory.len());
		for (left_item, right_item) in left.inventory.iter().zip(&right.inventory) {
			self.assert_same(left_item, right_item);
		}
		self.assert_same_option(&left.best_friend, &right.best_friend);
	}

	fn assert_same_option(&mut self, left: &Option<ObjRef>, right: &Option<ObjRef>) {
		match (left, right) {
			(None, None) => {}
			(Some(left), Some(right)) => self.assert_same(left, right),
			_ => panic!("reference present in one graph only"),
		}
	}
}
