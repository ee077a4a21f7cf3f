//! Attribute templates
//!
//! Producers describe records with attribute maps whose string values may
//! carry `{key}` placeholders (`{basename}`, `{IdGrp}`, ...). The values
//! come from per-file metadata; `{{` and `}}` stand for literal braces.
//! A date placeholder may carry a strftime format, as in `{date:%y%m%d}`.

use li3ds_core::attrs::display_value;
use li3ds_core::{Attributes, ResourceKind, Timestamp};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Placeholder values; a `None` entry is known but has no value
pub type Metadata = BTreeMap<String, Option<String>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("metadata {key} not available for {kind}/{field}=\"{template}\"")]
    UnknownKey {
        key: String,
        kind: ResourceKind,
        field: String,
        template: String,
    },
    #[error("unbalanced braces in {kind}/{field}=\"{template}\"")]
    Malformed {
        kind: ResourceKind,
        field: String,
        template: String,
    },
    #[error("metadata {key} cannot be formatted as a date for {kind}/{field}=\"{template}\"")]
    DateFormat {
        key: String,
        kind: ResourceKind,
        field: String,
        template: String,
    },
}

/// Result of rendering a single template
#[derive(Debug, PartialEq)]
enum Rendered {
    Text(String),
    /// A placeholder is known but has no value
    Missing,
    Unknown(String),
    Malformed,
    DateFormat(String),
}

fn render(template: &str, metadata: &Metadata) -> Rendered {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut missing = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Rendered::Malformed,
                        Some(c) => key.push(c),
                    }
                }
                let (name, spec) = match key.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (key.as_str(), None),
                };
                match (metadata.get(name), spec) {
                    (Some(Some(value)), None) => out.push_str(value),
                    (Some(Some(value)), Some(spec)) => {
                        match Timestamp::parse(value).and_then(|t| t.format(spec)) {
                            Ok(text) => out.push_str(&text),
                            Err(_) => return Rendered::DateFormat(name.to_string()),
                        }
                    }
                    (Some(None), _) => missing = true,
                    (None, _) => return Rendered::Unknown(name.to_string()),
                }
            }
            '}' => return Rendered::Malformed,
            c => out.push(c),
        }
    }

    if missing {
        Rendered::Missing
    } else {
        Rendered::Text(out)
    }
}

/// Render the template held by `kind`/`field`
///
/// `Ok(None)` means a placeholder is known but has no value.
pub fn render_field(
    kind: ResourceKind,
    field: &str,
    template: &str,
    metadata: &Metadata,
) -> Result<Option<String>, TemplateError> {
    match render(template, metadata) {
        Rendered::Text(text) => Ok(Some(text)),
        Rendered::Missing => Ok(None),
        Rendered::Unknown(key) => Err(TemplateError::UnknownKey {
            key,
            kind,
            field: field.to_string(),
            template: template.to_string(),
        }),
        Rendered::Malformed => Err(TemplateError::Malformed {
            kind,
            field: field.to_string(),
            template: template.to_string(),
        }),
        Rendered::DateFormat(key) => Err(TemplateError::DateFormat {
            key,
            kind,
            field: field.to_string(),
            template: template.to_string(),
        }),
    }
}

/// Metadata from the scalar fields of a JSON object
pub fn metadata_from(attrs: &Attributes) -> Metadata {
    attrs
        .iter()
        .filter(|(_, value)| !value.is_array() && !value.is_object())
        .map(|(key, value)| {
            let value = (!value.is_null()).then(|| display_value(value));
            (key.clone(), value)
        })
        .collect()
}

/// Layer defaults and overrides on `attrs`, then expand its templates
///
/// Kinds named after their file get a `{basename}` name; kinds that carry
/// a description get an "Imported from" one. Non-null `overrides` replace
/// producer values. Attributes whose template refers to known metadata
/// without a value are removed.
pub fn fill(
    kind: ResourceKind,
    attrs: &mut Attributes,
    overrides: Option<&Attributes>,
    metadata: &Metadata,
) -> Result<(), TemplateError> {
    if !matches!(
        kind,
        ResourceKind::Datasource | ResourceKind::ForeignpcTable | ResourceKind::ForeignpcView
    ) {
        attrs
            .entry("name".to_string())
            .or_insert_with(|| json!("{basename}"));
    }
    if !matches!(
        kind,
        ResourceKind::Datasource
            | ResourceKind::Transfotree
            | ResourceKind::Project
            | ResourceKind::Session
            | ResourceKind::ForeignpcServer
            | ResourceKind::ForeignpcTable
            | ResourceKind::ForeignpcView
    ) {
        attrs
            .entry("description".to_string())
            .or_insert_with(|| json!("Imported from \"{basename}\""));
    }
    if let Some(overrides) = overrides {
        for (field, value) in overrides {
            if !value.is_null() {
                attrs.insert(field.clone(), value.clone());
            }
        }
    }

    let fields: Vec<String> = attrs.keys().cloned().collect();
    for field in fields {
        let Some(Value::String(template)) = attrs.get(&field) else {
            continue;
        };
        if template.is_empty() {
            continue;
        }
        match render_field(kind, &field, template, metadata)? {
            Some(text) => {
                attrs.insert(field, Value::String(text));
            }
            None => {
                attrs.remove(&field);
            }
        }
    }
    Ok(())
}
