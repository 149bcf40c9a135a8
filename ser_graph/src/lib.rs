#[cfg(feature = "derive")]
pub use ser_graph_derive::Structure;

mod codec;
pub use codec::{
	Codec, ListCodec, SerializerEntry, SerializerRegistry, SerializerRegistryDelegate, StructCodec,
	TextCodec,
};

mod coder;
pub use coder::{Decoder, Encoder, SharedBytes};

mod configuration;
pub use configuration::{default_configuration, Configuration, LastResortResolver, Options};

mod error;
pub use error::{Error, Result};

pub mod field;
pub use field::{
	FieldCache, FieldDef, FieldKey, FieldKind, FieldMetadata, FieldType, RawFieldAccessor,
	RawMemory,
};

pub mod identity_map;
pub use identity_map::{EqualityMode, IdentityKey, IdentityMap};

mod object;
pub use object::{ObjKey, ObjRef};

mod pool;
pub use pool::{RecyclePool, MAX_CACHED_PER_TYPE};

mod spin;

mod structure;
pub use structure::{Array, List, Structure, Text, TypeDescriptor, TypeKey};

mod types;
pub use types::{TypeEntry, TypeRegistry};

pub mod wire;
