//! `#[derive(CapabilityDeclare)]` — collects `#[capability(...)]`-annotated
//! fields into the `Vec<CapabilityDecl>` an `ExtensionDescriptor` needs.
//!
//! Grounded on `#[derive(Bean)]`'s field walk: instead of resolving
//! `#[inject]` fields from a `BeanContext`, each `#[capability]` field
//! contributes one declaration literal. The field's value is never read —
//! the struct is a declaration-time manifest, not a runtime value, so field
//! types are conventionally `()`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

use crate::capability_meta;
use crate::crate_path::tapestry_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match generate(&input) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let krate = tapestry_core_path();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "#[derive(CapabilityDeclare)] only works on structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "#[derive(CapabilityDeclare)] only works on structs — enums and unions are not supported",
            ))
        }
    };

    let mut declarations = Vec::new();
    for field in fields {
        let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("capability")) else {
            continue;
        };
        let metas = attr.parse_args_with(syn::punctuated::Punctuated::parse_terminated)?;
        let capability_meta::CapabilityMeta { kind, name: cap_name, exclusive, path } = capability_meta::parse(&metas)?;
        let path_expr = match path {
            Some(p) => quote! { Some(#p.to_string()) },
            None => quote! { None },
        };
        declarations.push(quote! {
            #krate::CapabilityDecl {
                name: #cap_name.to_string(),
                kind: #krate::CapabilityKind::#kind,
                exclusive: #exclusive,
                config: Default::default(),
                path: #path_expr,
            }
        });
    }

    Ok(quote! {
        impl #name {
            /// Every capability this manifest declares, in field-declaration
            /// order. Feed directly into a `DescriptorBuilder`'s
            /// `capabilities`.
            pub fn capability_declarations() -> Vec<#krate::CapabilityDecl> {
                vec![#(#declarations),*]
            }
        }
    })
}
