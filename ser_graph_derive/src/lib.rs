use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Lit, Meta, NestedMeta, Type};

mod structs;
use structs::get_field_defs;

#[proc_macro_derive(Structure, attributes(structure))]
pub fn structure(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let input = parse_macro_input!(input as DeriveInput);
	structure_impl(input).into()
}

fn structure_impl(input: DeriveInput) -> TokenStream {
	let options = get_options(&input.attrs);

	let field_defs = match input.data {
		Data::Struct(data) => get_field_defs(data.fields),
		Data::Enum(_) => panic!("Deriving `Structure` on enums not supported"),
		Data::Union(_) => panic!("Deriving `Structure` on unions not supported"),
	};

	let ident = input.ident;
	let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

	let serializable = if options.not_serializable {
		quote! { const SERIALIZABLE: bool = false; }
	} else {
		quote! {}
	};

	let type_name = match options.name {
		Some(name) => quote! {
			fn type_name() -> &'static str {
				#name
			}
		},
		None => quote! {},
	};

	let ancestors = if options.ancestors.is_empty() {
		quote! {}
	} else {
		let chains = options.ancestors.iter().map(|ancestor| match ancestor {
			Ancestor::Structure(ty) => quote! {
				::std::iter::once(::ser_graph::TypeKey::of::<#ty>())
					.chain(<#ty as ::ser_graph::Structure>::ancestors())
					.collect::<::std::vec::Vec<_>>()
			},
			Ancestor::Capability(ty) => quote! {
				::std::vec![::ser_graph::TypeKey::of::<#ty>()]
			},
		});
		quote! {
			fn ancestors() -> ::std::vec::Vec<::ser_graph::TypeKey> {
				::ser_graph::TypeKey::merge([#(#chains),*])
			}
		}
	};

	let array_variant = if options.no_array {
		quote! {
			fn array_variant() -> ::core::option::Option<::ser_graph::TypeDescriptor> {
				::core::option::Option::None
			}
		}
	} else {
		quote! {}
	};

	quote! {
		#[automatically_derived]
		unsafe impl #impl_generics ::ser_graph::Structure for #ident #type_generics #where_clause {
			#serializable

			#type_name

			fn fields() -> ::std::vec::Vec<::ser_graph::FieldDef> {
				::std::vec![#(#field_defs),*]
			}

			#ancestors

			#array_variant
		}
	}
}

#[derive(Default)]
struct Options {
	name: Option<String>,
	ancestors: Vec<Ancestor>,
	not_serializable: bool,
	no_array: bool,
}

/// Parse `#[structure(...)]` container attributes.
fn get_options(attrs: &[Attribute]) -> Options {
	let mut options = Options::default();

	for attr in attrs.iter().filter(|attr| attr.path.is_ident("structure")) {
		let nested = match attr.parse_meta() {
			Ok(Meta::List(list)) => list.nested,
			_ => panic!("Malformed `structure` attr, expected e.g. `#[structure(name = \"node\")]`"),
		};

		for meta in nested {
			match meta {
				NestedMeta::Meta(Meta::NameValue(name_value))
					if name_value.path.is_ident("name") =>
				{
					let Lit::Str(name) = name_value.lit else {
						panic!("`#[structure(name)]` must be a string e.g. `#[structure(name = \"node\")]`");
					};
					if options.name.is_some() {
						panic!("Can only specify `name` once");
					}
					options.name = Some(name.value());
				}
				NestedMeta::Meta(Meta::List(list)) if list.path.is_ident("ancestors") => {
					options
						.ancestors
						.extend(list.nested.into_iter().map(get_ancestor));
				}
				NestedMeta::Meta(Meta::Path(path)) if path.is_ident("not_serializable") => {
					options.not_serializable = true;
				}
				NestedMeta::Meta(Meta::Path(path)) if path.is_ident("no_array") => {
					options.no_array = true;
				}
				_ => panic!(
					"Unrecognised `structure` attr. Expected `name`, `ancestors`, `not_serializable` or `no_array`."
				),
			}
		}
	}

	options
}

enum Ancestor {
	/// Another `Structure` type. Its ancestors are inherited.
	Structure(Type),
	/// Any type, e.g. `dyn Shape`.
	Capability(Type),
}

/// Ancestor is either a path (`Base`), or a string containing any type (`"dyn Shape"`).
fn get_ancestor(meta: NestedMeta) -> Ancestor {
	match meta {
		NestedMeta::Meta(Meta::Path(path)) => {
			Ancestor::Structure(Type::Path(syn::TypePath { qself: None, path }))
		}
		NestedMeta::Lit(Lit::Str(ty)) => Ancestor::Capability(
			ty.parse::<Type>()
				.unwrap_or_else(|_| panic!("Malformed type in `ancestors`: `{}`", ty.value())),
		),
		_ => panic!("`ancestors` entries must be paths or strings e.g. `ancestors(Base, \"dyn Shape\")`"),
	}
}
