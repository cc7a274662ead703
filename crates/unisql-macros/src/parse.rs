//! Parsing for the Model derive macro.
//!
//! Extracts `#[unisql(...)]` attributes from the struct and its fields into
//! [`ModelDef`] / [`FieldDef`], which drive code generation.

use proc_macro2::Span;
use quote::ToTokens;
use syn::ext::IdentExt;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Generics, Ident, Lit, Result, Type};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `User`).
    pub name: Ident,
    /// The SQL table name (e.g., `"users"`).
    pub table_name: String,
    /// Span of the `table = "..."` literal, or the struct name.
    pub table_span: Span,
    pub fields: Vec<FieldDef>,
    pub generics: Generics,
}

/// Parsed definition of one struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name (e.g., `email`).
    pub name: Ident,
    /// The SQL column name (field name unless overridden).
    pub column_name: String,
    pub ty: Type,
    /// Whether the field is `Option<T>`.
    pub nullable: bool,
    /// Marked with `#[unisql(primary_key)]`.
    pub primary_key: bool,
    /// Excluded from every statement; filled with `Default` when loading.
    pub skip: bool,
}

impl ModelDef {
    /// Fields that map to columns.
    pub fn mapped_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.skip)
    }

    /// The explicit primary key, or the mapped field named `id`.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.mapped_fields()
            .find(|f| f.primary_key)
            .or_else(|| self.mapped_fields().find(|f| f.name == "id"))
    }
}

impl FieldDef {
    /// Rust type as written, for diagnostics.
    pub fn type_string(&self) -> String {
        self.ty.to_token_stream().to_string().replace(' ', "")
    }
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();

    let (table_name, table_span) = match parse_table_attr(&input.attrs)? {
        Some(lit) => (lit.value(), lit.span()),
        None => (derive_table_name(&name.to_string()), name.span()),
    };

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    Ok(ModelDef {
        name,
        table_name,
        table_span,
        fields,
        generics: input.generics.clone(),
    })
}

/// Parse struct-level `#[unisql(table = "name")]`.
fn parse_table_attr(attrs: &[Attribute]) -> Result<Option<syn::LitStr>> {
    let mut table: Option<syn::LitStr> = None;

    for attr in attrs {
        if !attr.path().is_ident("unisql") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: Lit = meta.value()?.parse()?;
                let Lit::Str(lit_str) = value else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for table name",
                    ));
                };
                if table.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate unisql attribute: table",
                    ));
                }
                table = Some(lit_str);
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown unisql struct attribute (supported: table)",
                ))
            }
        })?;
    }

    Ok(table)
}

/// Default table name: snake_case struct name plus `s`.
///
/// - `User` -> `users`
/// - `BlogPost` -> `blog_posts`
fn derive_table_name(struct_name: &str) -> String {
    format!("{}s", to_snake_case(struct_name))
}

/// Convert PascalCase to snake_case.
///
/// - `Hero` -> `hero`
/// - `TeamMember` -> `team_member`
/// - `HTTPServer` -> `http_server`
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // New word after lowercase, or last capital of an acronym
                let should_underscore = prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase));
                if should_underscore {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut column: Option<String> = None;
    let mut primary_key = false;
    let mut skip = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("unisql") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("primary_key") {
                primary_key = true;
            } else if path.is_ident("skip") {
                skip = true;
            } else if path.is_ident("column") {
                let value: Lit = meta.value()?.parse()?;
                let Lit::Str(lit_str) = value else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for column name",
                    ));
                };
                if lit_str.value().trim().is_empty() {
                    return Err(Error::new_spanned(lit_str, "column name cannot be empty"));
                }
                column = Some(lit_str.value());
            } else {
                return Err(Error::new_spanned(
                    path,
                    "unknown unisql field attribute (supported: primary_key, column, skip)",
                ));
            }
            Ok(())
        })?;
    }

    if skip && primary_key {
        return Err(Error::new_spanned(
            &name,
            "a skipped field cannot be the primary key",
        ));
    }

    Ok(FieldDef {
        column_name: column.unwrap_or_else(|| name.unraw().to_string()),
        nullable: is_option_type(&field.ty),
        ty: field.ty.clone(),
        name,
        primary_key,
        skip,
    })
}

/// Check if a type's last path segment is `Option`.
pub fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("Hero"), "hero");
        assert_eq!(to_snake_case("TeamMember"), "team_member");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_derive_table_name() {
        assert_eq!(derive_table_name("User"), "users");
        assert_eq!(derive_table_name("BlogPost"), "blog_posts");
    }

    #[test]
    fn test_is_option_type() {
        let ty: Type = parse_quote!(Option<i64>);
        assert!(is_option_type(&ty));
        let ty: Type = parse_quote!(std::option::Option<String>);
        assert!(is_option_type(&ty));
        let ty: Type = parse_quote!(Vec<Option<i64>>);
        assert!(!is_option_type(&ty));
    }

    #[test]
    fn test_parse_model_attributes() {
        let input: DeriveInput = parse_quote! {
            #[unisql(table = "accounts")]
            struct User {
                #[unisql(primary_key)]
                user_id: Option<i64>,
                #[unisql(column = "email_address")]
                email: String,
                #[unisql(skip)]
                cached: Vec<u8>,
            }
        };
        let model = parse_model(&input).unwrap();
        assert_eq!(model.table_name, "accounts");
        assert_eq!(model.fields.len(), 3);
        assert_eq!(model.mapped_fields().count(), 2);

        let pk = model.primary_key().unwrap();
        assert_eq!(pk.column_name, "user_id");
        assert!(pk.nullable);
        assert_eq!(model.fields[1].column_name, "email_address");
        assert!(model.fields[2].skip);
        assert_eq!(model.fields[0].type_string(), "Option<i64>");
    }

    #[test]
    fn test_default_table_and_primary_key() {
        let input: DeriveInput = parse_quote! {
            struct BlogPost {
                id: i64,
                title: String,
            }
        };
        let model = parse_model(&input).unwrap();
        assert_eq!(model.table_name, "blog_posts");
        assert_eq!(model.primary_key().unwrap().name, "id");
    }

    #[test]
    fn test_rejects_bad_input() {
        let input: DeriveInput = parse_quote! {
            enum Status { On, Off }
        };
        assert!(parse_model(&input).is_err());

        let input: DeriveInput = parse_quote! {
            struct Pair(i64, String);
        };
        assert!(parse_model(&input).is_err());

        let input: DeriveInput = parse_quote! {
            #[unisql(tabel = "x")]
            struct User { id: i64 }
        };
        assert!(parse_model(&input).is_err());

        let input: DeriveInput = parse_quote! {
            struct User {
                #[unisql(primary_key, skip)]
                id: i64,
            }
        };
        assert!(parse_model(&input).is_err());
    }
}
