//! Procedural macros for unisql.
//!
//! `#[derive(Model)]` turns a plain struct with named fields into a
//! `unisql_core::Model`: table and primary key constants, a `static` field
//! table computed once per type, and the row conversions used by the CRUD
//! helpers in the `unisql` crate.
//!
//! Generated code refers to `::unisql_core`, so the deriving crate must
//! depend on `unisql-core` (directly or through the workspace).

use proc_macro::TokenStream;
use syn::ext::IdentExt;

mod parse;
mod validate;

use parse::{FieldDef, ModelDef, parse_model};

/// Derive macro for the `Model` trait.
///
/// # Attributes
///
/// - `#[unisql(table = "name")]` on the struct: table name (defaults to the
///   snake_case struct name plus `s`)
/// - `#[unisql(primary_key)]`: primary key field (defaults to the field
///   named `id`)
/// - `#[unisql(column = "name")]`: column name (defaults to the field name)
/// - `#[unisql(skip)]`: not mapped; set to `Default::default()` when loading
///
/// A primary key declared as `Option<_>` is treated as generated by the
/// database: it is left out of INSERTs while `None`.
///
/// # Example
///
/// ```ignore
/// use unisql::prelude::*;
///
/// #[derive(Model, Debug, Clone, PartialEq)]
/// #[unisql(table = "users")]
/// struct User {
///     id: Option<i64>,
///     name: String,
///     #[unisql(column = "email_address")]
///     email: Option<String>,
///     #[unisql(skip)]
///     session_token: String,
/// }
/// ```
#[proc_macro_derive(Model, attributes(unisql))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_model(&model) {
        return e.to_compile_error().into();
    }

    generate_model_impl(&model).into()
}

/// Generate the Model trait implementation from a validated definition.
fn generate_model_impl(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let table_name = &model.table_name;
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    // Validation guarantees a primary key
    let Some(pk) = model.primary_key() else {
        return syn::Error::new(model.name.span(), "Model needs a primary key").to_compile_error();
    };
    let pk_column = &pk.column_name;
    let pk_ident = &pk.name;

    let field_infos = generate_field_infos(model, pk);
    let to_values_body = generate_to_values(model);
    let from_row_body = generate_from_row(model);

    quote::quote! {
        impl #impl_generics ::unisql_core::Model for #name #ty_generics #where_clause {
            const TABLE_NAME: &'static str = #table_name;
            const PRIMARY_KEY: &'static str = #pk_column;

            fn fields() -> &'static [::unisql_core::FieldInfo] {
                static FIELDS: &[::unisql_core::FieldInfo] = &[
                    #field_infos
                ];
                FIELDS
            }

            fn to_values(&self) -> ::std::vec::Vec<(&'static str, ::unisql_core::Value)> {
                #to_values_body
            }

            fn from_row(row: &::unisql_core::Row) -> ::unisql_core::Result<Self> {
                #from_row_body
            }

            fn primary_key_value(&self) -> ::unisql_core::Value {
                ::unisql_core::Value::from(::core::clone::Clone::clone(&self.#pk_ident))
            }
        }
    }
}

/// `FieldInfo` constructors for every mapped field, in declaration order.
fn generate_field_infos(model: &ModelDef, pk: &FieldDef) -> proc_macro2::TokenStream {
    let infos = model.mapped_fields().map(|field| {
        let field_name = field.name.unraw().to_string();
        let column_name = &field.column_name;
        let rust_type = field.type_string();
        let nullable = field.nullable;
        let primary_key = field.name == pk.name;
        let auto_increment = primary_key && field.nullable;

        quote::quote! {
            ::unisql_core::FieldInfo::new(#field_name, #rust_type)
                .column(#column_name)
                .nullable(#nullable)
                .primary_key(#primary_key)
                .auto_increment(#auto_increment)
        }
    });

    quote::quote! { #(#infos),* }
}

fn generate_to_values(model: &ModelDef) -> proc_macro2::TokenStream {
    let pairs = model.mapped_fields().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote::quote! {
            (#column_name, ::unisql_core::Value::from(::core::clone::Clone::clone(&self.#field_name)))
        }
    });

    quote::quote! {
        ::std::vec![#(#pairs),*]
    }
}

fn generate_from_row(model: &ModelDef) -> proc_macro2::TokenStream {
    let assignments = model.fields.iter().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;

        if field.skip {
            quote::quote! { #field_name: ::core::default::Default::default() }
        } else if field.nullable {
            // NULL and a missing column both load as None
            quote::quote! { #field_name: row.get_parsed(#column_name)? }
        } else {
            let rust_type = field.type_string();
            quote::quote! {
                #field_name: row.get_parsed(#column_name)?.ok_or_else(|| {
                    ::unisql_core::Error::Conversion(::unisql_core::ConversionError {
                        column: ::std::string::String::from(#column_name),
                        expected: #rust_type,
                        value: ::std::string::String::from("NULL"),
                    })
                })?
            }
        }
    });

    quote::quote! {
        ::core::result::Result::Ok(Self {
            #(#assignments,)*
        })
    }
}
