//! Compile-time validation for the Model derive macro.
//!
//! All problems are collected and reported together, each pointing at the
//! offending field or attribute.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::{Error, GenericArgument, PathArguments, Type};

use crate::parse::{FieldDef, ModelDef};

/// Validate a parsed model definition.
pub fn validate_model(model: &ModelDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    validate_has_columns(model, &mut errors);
    validate_identifier("table", &model.table_name, model.table_span, &mut errors);
    validate_no_duplicate_columns(model, &mut errors);
    validate_primary_key(model, &mut errors);

    for field in model.mapped_fields() {
        validate_identifier("column", &field.column_name, field.name.span(), &mut errors);
        validate_type(field, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

fn validate_has_columns(model: &ModelDef, errors: &mut Vec<Error>) {
    if model.mapped_fields().next().is_none() {
        errors.push(Error::new(
            model.name.span(),
            "Model struct must have at least one non-skipped field",
        ));
    }
}

/// Reject names that would break out of an identifier position.
fn validate_identifier(kind: &str, name: &str, span: Span, errors: &mut Vec<Error>) {
    const DANGEROUS_CHARS: &[char] = &[';', '\'', '"', '`', '-', '/', '*', '\\', '\0', '\n', '\r'];

    if name.trim().is_empty() {
        errors.push(Error::new(span, format!("{kind} name cannot be empty")));
        return;
    }

    if let Some(ch) = name.chars().find(|c| DANGEROUS_CHARS.contains(c) || c.is_whitespace()) {
        errors.push(Error::new(
            span,
            format!(
                "{kind} name contains invalid character {ch:?}; \
                 use letters, digits, underscores and dots"
            ),
        ));
        return;
    }

    if let Some(first) = name.chars().next() {
        if !first.is_alphabetic() && first != '_' {
            errors.push(Error::new(
                span,
                format!("{kind} name must start with a letter or underscore, got '{first}'"),
            ));
        }
    }
}

fn validate_no_duplicate_columns(model: &ModelDef, errors: &mut Vec<Error>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for field in model.mapped_fields() {
        if !seen.insert(&field.column_name) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "duplicate column name '{}'; another field already maps to this column",
                    field.column_name
                ),
            ));
        }
    }
}

fn validate_primary_key(model: &ModelDef, errors: &mut Vec<Error>) {
    let explicit: Vec<&FieldDef> = model.fields.iter().filter(|f| f.primary_key).collect();
    if explicit.len() > 1 {
        for field in &explicit[1..] {
            errors.push(Error::new(
                field.name.span(),
                "only one field can be #[unisql(primary_key)]",
            ));
        }
    }
    if model.primary_key().is_none() && model.mapped_fields().next().is_some() {
        errors.push(Error::new(
            model.name.span(),
            "Model needs a primary key: add a field named `id` or mark one with #[unisql(primary_key)]",
        ));
    }
}

fn validate_type(field: &FieldDef, errors: &mut Vec<Error>) {
    let span = field.name.span();
    if is_nested_option(&field.ty) {
        errors.push(Error::new(
            span,
            "nested Option<Option<T>> is ambiguous and not supported; use a single Option<T>",
        ));
    }
    if matches!(field.ty, Type::Reference(_)) {
        errors.push(Error::new(
            span,
            "reference types (&T) are not supported; use owned types instead",
        ));
    }
    if matches!(field.ty, Type::Ptr(_)) {
        errors.push(Error::new(
            span,
            "raw pointer types (*const T, *mut T) are not supported; use owned types instead",
        ));
    }
}

/// Check if a type is `Option<Option<T>>`.
fn is_nested_option(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(Type::Path(inner_path))) = args.args.first() {
                        if let Some(inner_seg) = inner_path.path.segments.last() {
                            return inner_seg.ident == "Option";
                        }
                    }
                }
            }
        }
    }
    false
}
