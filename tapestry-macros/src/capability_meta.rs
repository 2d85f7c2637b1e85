//! Shared `kind = Api, name = "...", exclusive = true, path = "..."`
//! attribute-argument parsing, used by both the `#[native_capability]`
//! attribute and the `#[derive(CapabilityDeclare)]` field attributes so the
//! two stay in lockstep.

use syn::{punctuated::Punctuated, Expr, ExprLit, Lit, Meta, Token};

pub struct CapabilityMeta {
    pub kind: syn::Ident,
    pub name: String,
    pub exclusive: bool,
    pub path: Option<String>,
}

pub fn parse(metas: &Punctuated<Meta, Token![,]>) -> syn::Result<CapabilityMeta> {
    let mut kind: Option<syn::Ident> = None;
    let mut name: Option<String> = None;
    let mut exclusive = false;
    let mut path: Option<String> = None;

    for meta in metas {
        let name_value = match meta {
            Meta::NameValue(nv) => nv,
            _ => return Err(syn::Error::new_spanned(meta, "expected `key = value`")),
        };
        let key = name_value
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new_spanned(&name_value.path, "expected a plain identifier"))?
            .to_string();

        match key.as_str() {
            "kind" => {
                let Expr::Path(p) = &name_value.value else {
                    return Err(syn::Error::new_spanned(&name_value.value, "`kind` must be an identifier like `Api`"));
                };
                kind = Some(
                    p.path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new_spanned(p, "`kind` must be a single identifier"))?
                        .clone(),
                );
            }
            "name" => name = Some(expect_str(&name_value.value, "name")?),
            "exclusive" => {
                let Expr::Lit(ExprLit { lit: Lit::Bool(b), .. }) = &name_value.value else {
                    return Err(syn::Error::new_spanned(&name_value.value, "`exclusive` must be `true` or `false`"));
                };
                exclusive = b.value;
            }
            "path" => path = Some(expect_str(&name_value.value, "path")?),
            other => return Err(syn::Error::new_spanned(&name_value.path, format!("unknown argument `{other}`"))),
        }
    }

    Ok(CapabilityMeta {
        kind: kind.ok_or_else(|| syn::Error::new(proc_macro2::Span::call_site(), "missing required `kind`"))?,
        name: name.ok_or_else(|| syn::Error::new(proc_macro2::Span::call_site(), "missing required `name`"))?,
        exclusive,
        path,
    })
}

fn expect_str(expr: &Expr, field: &str) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => Ok(s.value()),
        _ => Err(syn::Error::new_spanned(expr, format!("`{field}` must be a string literal"))),
    }
}
