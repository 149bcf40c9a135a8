use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{spanned::Spanned, Field, Fields, Index, Meta, NestedMeta};

/// Get `FieldDef` constructor expression for each field, in declaration order.
pub fn get_field_defs(fields: Fields) -> Vec<TokenStream> {
	match fields {
		Fields::Named(fields) => fields
			.named
			.iter()
			.map(|field| {
				let ident = field.ident.as_ref().expect("Missing field name");
				get_field_def(ident.to_string(), quote! {#ident}, field)
			})
			.collect(),
		Fields::Unnamed(fields) => fields
			.unnamed
			.iter()
			.enumerate()
			.map(|(index, field)| {
				let member = Index::from(index);
				get_field_def(index.to_string(), quote! {#member}, field)
			})
			.collect(),
		Fields::Unit => vec![],
	}
}

fn get_field_def(name: String, member: TokenStream, field: &Field) -> TokenStream {
	let ty = &field.ty;
	let transient = is_transient(field);
	// Span of field, so an unsupported field type is reported on the field
	quote_spanned! {field.span()=>
		::ser_graph::FieldDef::new::<#ty>(#name, ::core::mem::offset_of!(Self, #member), #transient)
	}
}

fn is_transient(field: &Field) -> bool {
	let mut transient = false;
	for attr in field.attrs.iter().filter(|attr| attr.path.is_ident("structure")) {
		let nested = match attr.parse_meta() {
			Ok(Meta::List(list)) => list.nested,
			_ => panic!("Malformed `structure` attr on field, expected `#[structure(transient)]`"),
		};
		for meta in nested {
			match meta {
				NestedMeta::Meta(Meta::Path(path)) if path.is_ident("transient") => {
					transient = true
				}
				_ => panic!("Unrecognised `structure` attr on field. Only `transient` is supported."),
			}
		}
	}
	transient
}
