use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Fields, GenericArgument, PathArguments, Type};

/// Options parsed from `#[config(...)]` on a field.
#[derive(Default)]
struct FieldOptions {
    default: Option<TokenStream2>,
    hot_updated: bool,
    section: bool,
    serde: bool,
    min: Option<TokenStream2>,
    max: Option<TokenStream2>,
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut opts = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("config") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("hot_updated") {
                opts.hot_updated = true;
                return Ok(());
            }
            if meta.path.is_ident("section") {
                opts.section = true;
                return Ok(());
            }
            if meta.path.is_ident("serde") {
                opts.serde = true;
                return Ok(());
            }
            if meta.path.is_ident("default") {
                let expr: Expr = meta.value()?.parse()?;
                opts.default = Some(quote!(#expr));
                return Ok(());
            }
            if meta.path.is_ident("min") {
                let expr: Expr = meta.value()?.parse()?;
                opts.min = Some(quote!(#expr));
                return Ok(());
            }
            if meta.path.is_ident("max") {
                let expr: Expr = meta.value()?.parse()?;
                opts.max = Some(quote!(#expr));
                return Ok(());
            }
            Err(meta.error("unrecognized config attribute"))
        })?;
    }

    Ok(opts)
}

fn last_segment_is(ty: &Type, ident: &str) -> bool {
    match ty {
        Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|seg| seg.ident == ident)
            .unwrap_or(false),
        _ => false,
    }
}

/// Returns true for `Vec<String>`.
fn is_string_vec_type(ty: &Type) -> bool {
    let Type::Path(tp) = ty else {
        return false;
    };
    let Some(seg) = tp.path.segments.last() else {
        return false;
    };
    if seg.ident != "Vec" {
        return false;
    }
    match &seg.arguments {
        PathArguments::AngleBracketed(args) => matches!(
            args.args.first(),
            Some(GenericArgument::Type(inner)) if last_segment_is(inner, "String")
        ),
        _ => false,
    }
}

#[derive(Clone, Copy)]
enum FieldKind {
    Section,
    Serde,
    Str,
    Bool,
    StrList,
    Number,
}

fn classify(ty: &Type, opts: &FieldOptions) -> FieldKind {
    if opts.section {
        FieldKind::Section
    } else if opts.serde {
        FieldKind::Serde
    } else if last_segment_is(ty, "String") {
        FieldKind::Str
    } else if last_segment_is(ty, "bool") {
        FieldKind::Bool
    } else if is_string_vec_type(ty) {
        FieldKind::StrList
    } else {
        FieldKind::Number
    }
}

#[proc_macro_derive(Config, attributes(config))]
pub fn derive_config(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(ds) => match &ds.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Config derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Config derive only supports structs",
            ))
        }
    };

    let mut default_fields = Vec::new();
    let mut from_toml_fields = Vec::new();
    let mut hot_update_fields = Vec::new();
    let mut render_scalars = Vec::new();
    let mut render_tables = Vec::new();
    let mut validate_fields = Vec::new();

    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let key = field_name.to_string();
        let field_ty = &field.ty;
        let opts = parse_field_options(&field.attrs)?;
        let kind = classify(field_ty, &opts);

        let default_expr = match (kind, &opts.default) {
            (FieldKind::Section | FieldKind::Serde, _) => quote!(<#field_ty as Default>::default()),
            (FieldKind::Str, Some(expr)) => quote!((#expr).to_string()),
            (FieldKind::StrList, Some(expr)) => quote! {
                {
                    let items: &[&str] = &#expr;
                    items.iter().map(|s| s.to_string()).collect::<Vec<String>>()
                }
            },
            (_, Some(expr)) => quote!(#expr),
            (_, None) => {
                return Err(syn::Error::new_spanned(
                    field_name,
                    format!(
                        "field `{}` needs #[config(default = ...)], #[config(section)] or #[config(serde)]",
                        key
                    ),
                ))
            }
        };

        default_fields.push(quote! { #field_name: #default_expr, });

        let mismatch = |expected: &str| {
            quote! {
                etcdfs_config::ConfigError::TypeMismatch {
                    field: #key.into(),
                    expected: #expected.into(),
                }
            }
        };

        let parse_expr = match kind {
            FieldKind::Section => quote! {
                <#field_ty as etcdfs_config::Config>::from_toml(v)?
            },
            FieldKind::Serde => {
                let err = mismatch("table");
                quote! {
                    v.clone().try_into::<#field_ty>().map_err(|_| #err)?
                }
            }
            FieldKind::Str => {
                let err = mismatch("string");
                quote! { v.as_str().ok_or_else(|| #err)?.to_string() }
            }
            FieldKind::Bool => {
                let err = mismatch("bool");
                quote! { v.as_bool().ok_or_else(|| #err)? }
            }
            FieldKind::StrList => {
                let err = mismatch("array of strings");
                quote! {
                    v.as_array()
                        .ok_or_else(|| #err)?
                        .iter()
                        .map(|item| item.as_str().map(str::to_string))
                        .collect::<Option<Vec<String>>>()
                        .ok_or_else(|| #err)?
                }
            }
            FieldKind::Number => {
                let err = mismatch("number");
                quote! {
                    v.as_integer()
                        .map(|n| n as #field_ty)
                        .or_else(|| v.as_float().map(|f| f as #field_ty))
                        .ok_or_else(|| #err)?
                }
            }
        };

        from_toml_fields.push(quote! {
            #field_name: match value.get(#key) {
                Some(v) => #parse_expr,
                None => #default_expr,
            },
        });

        match kind {
            FieldKind::Section => hot_update_fields.push(quote! {
                etcdfs_config::Config::hot_update(&mut self.#field_name, &other.#field_name);
            }),
            _ if opts.hot_updated => hot_update_fields.push(quote! {
                self.#field_name = other.#field_name.clone();
            }),
            _ => {}
        }

        match kind {
            FieldKind::Section => render_tables.push(quote! {
                out.push_str(&format!("\n[{}]\n", #key));
                out.push_str(&etcdfs_config::Config::render(&self.#field_name));
            }),
            FieldKind::Serde => render_tables.push(quote! {
                if let Ok(body) = toml::to_string(&self.#field_name) {
                    out.push_str(&format!("\n[{}]\n", #key));
                    out.push_str(&body);
                }
            }),
            FieldKind::Str => render_scalars.push(quote! {
                out.push_str(&format!("{} = {:?}\n", #key, self.#field_name));
            }),
            FieldKind::StrList => render_scalars.push(quote! {
                out.push_str(&format!("{} = {:?}\n", #key, self.#field_name));
            }),
            FieldKind::Bool | FieldKind::Number => render_scalars.push(quote! {
                out.push_str(&format!("{} = {}\n", #key, self.#field_name));
            }),
        }

        if let FieldKind::Section = kind {
            validate_fields.push(quote! {
                etcdfs_config::Config::validate(&self.#field_name)?;
            });
        }
        if let Some(min_expr) = &opts.min {
            validate_fields.push(quote! {
                if (self.#field_name as i64) < (#min_expr as i64) {
                    return Err(etcdfs_config::ConfigError::OutOfRange {
                        field: #key.into(),
                        value: format!("{}", self.#field_name),
                        min: Some(format!("{}", #min_expr)),
                        max: None,
                    });
                }
            });
        }
        if let Some(max_expr) = &opts.max {
            validate_fields.push(quote! {
                if (self.#field_name as i64) > (#max_expr as i64) {
                    return Err(etcdfs_config::ConfigError::OutOfRange {
                        field: #key.into(),
                        value: format!("{}", self.#field_name),
                        min: None,
                        max: Some(format!("{}", #max_expr)),
                    });
                }
            });
        }
    }

    Ok(quote! {
        impl #impl_generics Default for #name #ty_generics #where_clause {
            fn default() -> Self {
                Self {
                    #(#default_fields)*
                }
            }
        }

        impl #impl_generics etcdfs_config::Config for #name #ty_generics #where_clause {
            fn from_toml(value: &toml::Value) -> Result<Self, etcdfs_config::ConfigError> {
                Ok(Self {
                    #(#from_toml_fields)*
                })
            }

            fn hot_update(&mut self, other: &Self) {
                #(#hot_update_fields)*
            }

            fn render(&self) -> String {
                let mut out = String::new();
                #(#render_scalars)*
                #(#render_tables)*
                out
            }

            fn validate(&self) -> Result<(), etcdfs_config::ConfigError> {
                #(#validate_fields)*
                Ok(())
            }
        }
    })
}
