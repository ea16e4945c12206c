use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use super::{
    ConfigSchema, KeyDefinition, KeyFlags, LocaleText, Permissions, ResourceId, Visibility,
};
use crate::{DConfigError, Result, value::Value};

/// Magic string identifying schema documents.
pub(crate) const META_MAGIC: &str = "dsg.config.meta";

#[derive(Deserialize)]
struct MetaDocument {
    magic: String,
    version: String,
    contents: Map<String, JsonValue>,
}

/// Parses a schema document, attributing errors to `source` when given.
pub(super) fn parse_schema(id: ResourceId, text: &str, source: Option<&Path>) -> Result<ConfigSchema> {
    let document: MetaDocument =
        serde_json::from_str(text).map_err(|e| DConfigError::malformed(e, source))?;

    if document.magic != META_MAGIC {
        return Err(DConfigError::malformed(
            format!("expected magic '{META_MAGIC}', found '{}'", document.magic),
            source,
        ));
    }

    let keys = document
        .contents
        .into_iter()
        .map(|(key, entry)| parse_key(key, entry).map_err(|e| DConfigError::malformed(e, source)))
        .collect::<Result<Vec<_>>>()?;

    Ok(ConfigSchema::new(
        id,
        document.version,
        source.map(Path::to_path_buf),
        keys,
    ))
}

fn parse_key(key: String, entry: JsonValue) -> std::result::Result<KeyDefinition, String> {
    let JsonValue::Object(fields) = entry else {
        return Err(format!("key '{key}' must be an object"));
    };

    let default = fields
        .get("value")
        .cloned()
        .map(Value::from)
        .ok_or_else(|| format!("key '{key}' has no 'value'"))?;

    let mut definition = KeyDefinition {
        default,
        visibility: parse_visibility(&key, fields.get("visibility"))?,
        permissions: parse_permissions(&key, fields.get("permissions"))?,
        flags: parse_flags(&key, fields.get("flags"))?,
        serial: parse_serial(&key, fields.get("serial"))?,
        name: LocaleText::default(),
        description: LocaleText::default(),
        key,
    };

    for (field, value) in &fields {
        let (table, locale) = if let Some(locale) = localized_field(field, "name") {
            (&mut definition.name, locale)
        } else if let Some(locale) = localized_field(field, "description") {
            (&mut definition.description, locale)
        } else {
            continue;
        };

        let text = value
            .as_str()
            .ok_or_else(|| format!("'{field}' of key '{}' must be a string", definition.key))?;
        table.insert(locale, text);
    }

    Ok(definition)
}

/// Splits `name` / `name[zh_CN]` style field names into their locale tag.
fn localized_field<'a>(field: &'a str, base: &str) -> Option<&'a str> {
    let rest = field.strip_prefix(base)?;
    if rest.is_empty() {
        return Some("");
    }

    rest.strip_prefix('[')?.strip_suffix(']')
}

fn parse_visibility(key: &str, field: Option<&JsonValue>) -> std::result::Result<Visibility, String> {
    match field.map(JsonValue::as_str) {
        None => Ok(Visibility::default()),
        Some(Some("public")) => Ok(Visibility::Public),
        Some(Some("private")) => Ok(Visibility::Private),
        Some(other) => Err(format!("key '{key}' has invalid visibility {other:?}")),
    }
}

fn parse_permissions(
    key: &str,
    field: Option<&JsonValue>,
) -> std::result::Result<Permissions, String> {
    match field.map(JsonValue::as_str) {
        None => Ok(Permissions::default()),
        Some(Some("readonly")) => Ok(Permissions::ReadOnly),
        Some(Some("readwrite")) => Ok(Permissions::ReadWrite),
        Some(other) => Err(format!("key '{key}' has invalid permissions {other:?}")),
    }
}

fn parse_flags(key: &str, field: Option<&JsonValue>) -> std::result::Result<KeyFlags, String> {
    let Some(field) = field else {
        return Ok(KeyFlags::empty());
    };

    let tokens = field
        .as_array()
        .ok_or_else(|| format!("flags of key '{key}' must be an array"))?;

    tokens.iter().try_fold(KeyFlags::empty(), |flags, token| {
        token
            .as_str()
            .and_then(KeyFlags::from_token)
            .map(|flag| flags | flag)
            .ok_or_else(|| format!("key '{key}' has invalid flag token {token}"))
    })
}

fn parse_serial(key: &str, field: Option<&JsonValue>) -> std::result::Result<Option<i64>, String> {
    match field {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("serial of key '{key}' must be an integer")),
    }
}
