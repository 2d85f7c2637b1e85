//! `#[native_capability(...)]` — wraps a free function into a
//! [`tapestry_core::Callable`] provider, the native-Rust-extension
//! equivalent of registering a guest script function.
//!
//! Grounded on `#[producer]`: both wrap a free function into a generated
//! PascalCase struct exposing the pieces the host needs to register it,
//! rather than running any registration at macro-expansion time (there is
//! no `BeanContext`-equivalent to resolve dependencies from here — a native
//! capability is a plain `fn(Vec<Value>) -> Result<Value, CallableError>`).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse::Parser, parse_macro_input, punctuated::Punctuated, FnArg, ItemFn, Meta, Token};

use crate::capability_meta::{self, CapabilityMeta};
use crate::crate_path::tapestry_core_path;

pub fn expand(args: TokenStream, input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);
    let parser = Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = match parser.parse(args) {
        Ok(metas) => metas,
        Err(err) => return err.to_compile_error().into(),
    };
    match generate(&item_fn, &metas) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(item_fn: &ItemFn, metas: &Punctuated<Meta, Token![,]>) -> syn::Result<TokenStream2> {
    let fn_name = &item_fn.sig.ident;

    if item_fn.sig.inputs.iter().any(|arg| matches!(arg, FnArg::Receiver(_))) {
        return Err(syn::Error::new_spanned(
            fn_name,
            "#[native_capability] must be a free function (no `self` parameter)",
        ));
    }

    let CapabilityMeta { kind, name, exclusive, path } = capability_meta::parse(metas)?;
    let path_expr = match path {
        Some(p) => quote! { Some(#p.to_string()) },
        None => quote! { None },
    };

    let struct_ident = syn::Ident::new(&to_pascal_case(&fn_name.to_string()), fn_name.span());
    let krate = tapestry_core_path();
    let vis = &item_fn.vis;

    Ok(quote! {
        #item_fn

        #vis struct #struct_ident;

        impl #struct_ident {
            pub const NAME: &'static str = #name;
            pub const KIND: #krate::CapabilityKind = #krate::CapabilityKind::#kind;
            pub const EXCLUSIVE: bool = #exclusive;

            /// The `CapabilityDecl` to list in this extension's descriptor.
            pub fn declaration() -> #krate::CapabilityDecl {
                #krate::CapabilityDecl {
                    name: Self::NAME.to_string(),
                    kind: Self::KIND,
                    exclusive: Self::EXCLUSIVE,
                    config: Default::default(),
                    path: #path_expr,
                }
            }

            /// The callable handle to register once the capability registry
            /// opens, wrapping the original function.
            pub fn callable() -> #krate::Callable {
                #krate::Callable::new(#fn_name)
            }
        }
    })
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect()
}
