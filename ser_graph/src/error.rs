//! Error type for encoding, decoding and configuration lookups.

use std::io;

use thiserror::Error;

use crate::field::FieldKind;

/// Result type used throughout `ser_graph`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while encoding or decoding an object graph.
///
/// A failed encode or decode leaves no usable partial output.
/// Discard the buffer / partial graph and retry with corrected input or
/// configuration.
#[derive(Debug, Error)]
pub enum Error {
	/// Underlying reader or writer failed
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// Input ended before a complete value could be read
	#[error("Unexpected end of input: need {needed} bytes at offset {offset}, {remaining} remaining")]
	UnexpectedEof {
		offset: usize,
		needed: usize,
		remaining: usize,
	},

	/// Object tag byte is not one of the known tags
	#[error("Invalid object tag {tag:#04x} at offset {offset}")]
	InvalidTag { tag: u8, offset: usize },

	/// Varint is longer than 10 bytes or overflows 64 bits
	#[error("Malformed varint at offset {offset}")]
	InvalidVarint { offset: usize },

	/// String payload is not valid UTF-8
	#[error("Invalid UTF-8 string at offset {offset}")]
	InvalidUtf8 { offset: usize },

	/// Code point is not a valid `char`
	#[error("Invalid char code point {code:#x} at offset {offset}")]
	InvalidChar { code: u32, offset: usize },

	/// Numeric type id has no entry in the type registry
	#[error("Unknown type id {0} (peer registries must register the same types in the same order)")]
	UnknownTypeId(u32),

	/// Type name could not be resolved, not even by the last-resort resolver
	#[error("Unknown type name `{0}`")]
	UnknownTypeName(String),

	/// Back-reference to an object which has not been decoded yet
	#[error("Unknown object handle {0}")]
	UnknownHandle(u32),

	/// A reference list contained a null entry
	#[error("Null entry in reference list of field `{field}`")]
	NullInList { field: &'static str },

	/// Type is not marked serializable and neither force-serializable nor
	/// struct mode is enabled
	#[error("Type `{0}` is not serializable")]
	NotSerializable(&'static str),

	/// Field name does not exist on the type
	#[error("Type `{ty}` has no field `{field}`")]
	UnknownField { ty: &'static str, field: String },

	/// Field accessed with a Rust type which does not match its declared kind
	#[error("Field `{field}` is of kind {expected:?}, accessed as {found:?}")]
	FieldKindMismatch {
		field: &'static str,
		expected: FieldKind,
		found: FieldKind,
	},

	/// Field accessor applied to an object of a different type
	#[error("Field accessor for `{expected}` applied to object of another type")]
	ForeignObject { expected: &'static str },

	/// Object is mutably borrowed elsewhere while the coder needs it
	#[error("Object of type `{0}` is already borrowed")]
	ObjectBorrowed(&'static str),

	/// Graph nesting exceeded the configured maximum depth
	#[error("Object graph nesting exceeds maximum depth of {0}")]
	DepthLimitExceeded(usize),

	/// Raw memory field access could not be established on this target
	#[error("Raw field access unavailable: {0}")]
	RawMemoryUnavailable(String),

	/// Error raised by a custom codec
	#[error("Codec error: {0}")]
	Codec(String),
}
