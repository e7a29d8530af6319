//! Derive macros for gonvoy.
//!
//! `#[derive(FilterSchema)]` implements `gonvoy::config::FilterSchema` for a
//! struct with named fields, building its merge descriptor from
//! `#[gonvoy(...)]` field attributes:
//!
//! - `#[gonvoy(mergeable)]`: a route-level value replaces the parent's.
//! - `#[gonvoy(mergeable, preserve)]` or `#[gonvoy(preserve)]`: same, but a
//!   zero route-level value keeps the parent's.
//!
//! Field names follow serde's `rename` and `rename_all` attributes, so the
//! descriptor matches the serialized form.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, FilterSchema)]
//! #[serde(rename_all = "camelCase")]
//! struct Cors {
//!     #[gonvoy(mergeable)]
//!     max_age: u32,
//!     #[gonvoy(mergeable, preserve)]
//!     allowed_origins: Vec<String>,
//! }
//! ```

mod parse;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use parse::SchemaInput;

#[proc_macro_derive(FilterSchema, attributes(gonvoy))]
pub fn derive_filter_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let schema = SchemaInput::from_derive(&input)?;
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = schema.fields.iter().map(|field| {
        let name = &field.serialized_name;
        if field.preserve {
            quote! { .preserve(#name) }
        } else {
            quote! { .mergeable(#name) }
        }
    });

    Ok(quote! {
        impl #impl_generics ::gonvoy::config::FilterSchema for #ident #ty_generics #where_clause {
            fn merge_descriptor() -> ::gonvoy::config::MergeDescriptor {
                ::gonvoy::config::MergeDescriptor::new()
                    #(#fields)*
            }
        }
    })
}
