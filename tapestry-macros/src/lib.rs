//! Procedural macros for native Rust extensions hosted by Tapestry.
//!
//! Guest scripting languages register capabilities at runtime; a Rust
//! extension linked directly into the host can declare the same capability
//! shape at compile time instead. These macros only generate declaration
//! metadata and `Callable` wrappers — they never call into a registry
//! themselves, since registration still has to happen during the host's
//! own REGISTRATION phase in the order it chooses.

extern crate proc_macro;
use proc_macro::TokenStream;

pub(crate) mod capability_declare_derive;
pub(crate) mod capability_meta;
pub(crate) mod crate_path;
pub(crate) mod native_capability_attr;

/// Wrap a free function `fn(Vec<Value>) -> Result<Value, CallableError>` as
/// a native capability provider.
///
/// ```ignore
/// #[native_capability(kind = Api, name = "alpha.move")]
/// fn move_unit(args: Vec<Value>) -> Result<Value, CallableError> {
///     Ok(Value::Bool(true))
/// }
///
/// // descriptor.capabilities.push(MoveUnit::declaration());
/// // registry.register(&table, "alpha", MoveUnit::NAME, MoveUnit::callable())?;
/// ```
#[proc_macro_attribute]
pub fn native_capability(args: TokenStream, input: TokenStream) -> TokenStream {
    native_capability_attr::expand(args, input)
}

/// Collect `#[capability(kind = ..., name = "...")]`-annotated fields into a
/// `Vec<CapabilityDecl>` via a generated `capability_declarations()`
/// associated function.
///
/// ```ignore
/// #[derive(CapabilityDeclare)]
/// struct AlphaCapabilities {
///     #[capability(kind = Api, name = "alpha.move")]
///     move_unit: (),
///     #[capability(kind = Hook, name = "alpha.on_tick", exclusive = true)]
///     on_tick: (),
/// }
/// ```
#[proc_macro_derive(CapabilityDeclare, attributes(capability))]
pub fn derive_capability_declare(input: TokenStream) -> TokenStream {
    capability_declare_derive::expand(input)
}
