//! Crate path resolution for generated code.
//!
//! Mirrors the facade-or-direct-dependency detection used elsewhere in this
//! codebase's macro crates: a consumer
//! may depend on `tapestry-core` directly, or (eventually) on a facade crate
//! that re-exports it. Only the direct case exists today, but the lookup
//! keeps generated code correct either way without a breaking change later.

use proc_macro2::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;

/// Returns the token stream for accessing `tapestry_core` types from
/// generated code.
pub fn tapestry_core_path() -> TokenStream {
    match crate_name("tapestry-core") {
        Ok(FoundCrate::Itself) => quote!(crate),
        Ok(FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote!(::#ident)
        }
        Err(_) => quote!(::tapestry_core),
    }
}
