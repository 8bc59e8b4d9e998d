//! Declarative shape checking for the raw configuration document.
//!
//! The configuration is validated twice. First, the merged document (stock
//! defaults + user file) is checked against the schema in this module, which
//! gives precise errors of the form "`templates.files` must be array|string,
//! found number". Then it is deserialized into the typed
//! [`BuildConfig`](crate::config::BuildConfig), which rejects unknown keys.
//!
//! A schema is an ordered list of [`Field`]s. Each field names the union of
//! [`TypeTag`]s it accepts and optionally a nested schema that applies when
//! the value is present and is an object.
//!
//! ```text
//! templates   object|null
//!   files       array|string
//!   id          string|null
//! ```
//!
//! A missing key is checked as if it were `null`, so a stage slot declared
//! `object|null` may be omitted while a required `string` may not. Validation
//! stops at the first mismatch.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// The runtime type of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl TypeTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => TypeTag::String,
            Value::Number(_) => TypeTag::Number,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
            Value::Null => TypeTag::Null,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Null => "null",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One key of a schema.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub allowed: &'static [TypeTag],
    pub nested: Option<Schema>,
}

pub type Schema = &'static [Field];

const fn field(key: &'static str, allowed: &'static [TypeTag], nested: Option<Schema>) -> Field {
    Field {
        key,
        allowed,
        nested,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{path}` must be {expected}, found {actual}")]
pub struct SchemaError {
    /// Dotted path of the offending key, e.g. `revision.options`.
    pub path: String,
    /// The allowed union, e.g. `object|null`.
    pub expected: String,
    /// The type found, or `missing` when the key was absent.
    pub actual: &'static str,
}

/// Check `config` against `schema`, failing on the first mismatch.
pub fn validate(schema: Schema, config: &Value) -> Result<(), SchemaError> {
    validate_at(schema, config, "")
}

fn validate_at(schema: Schema, value: &Value, prefix: &str) -> Result<(), SchemaError> {
    for field in schema {
        let path = if prefix.is_empty() {
            field.key.to_string()
        } else {
            format!("{prefix}.{}", field.key)
        };
        let found = value.get(field.key);
        let tag = found.map(TypeTag::of).unwrap_or(TypeTag::Null);
        if !field.allowed.contains(&tag) {
            return Err(SchemaError {
                path,
                expected: union_name(field.allowed),
                actual: if found.is_none() { "missing" } else { tag.name() },
            });
        }
        if let (Some(nested), Some(inner @ Value::Object(_))) = (field.nested, found) {
            validate_at(nested, inner, &path)?;
        }
    }
    Ok(())
}

fn union_name(allowed: &[TypeTag]) -> String {
    allowed
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join("|")
}

// =============================================================================
// Build configuration schema
// =============================================================================

use TypeTag::{Array, Boolean, Null, Number, Object, String as Str};

const STRING: &[TypeTag] = &[Str];
const OPT_STRING: &[TypeTag] = &[Str, Null];
const OPT_NUMBER: &[TypeTag] = &[Number, Null];
const OPT_BOOLEAN: &[TypeTag] = &[Boolean, Null];
const BOOLEAN: &[TypeTag] = &[Boolean];
const OBJECT: &[TypeTag] = &[Object];
const OPT_OBJECT: &[TypeTag] = &[Object, Null];
const FILES: &[TypeTag] = &[Array, Str];
const OPT_FILES: &[TypeTag] = &[Array, Str, Null];
const OPT_ARRAY: &[TypeTag] = &[Array, Null];

const FILES_STAGE: Schema = &[field("files", FILES, None)];

const LINT_STAGE: Schema = &[
    field("files", FILES, None),
    field("config_path", OPT_STRING, None),
];

const TRANSFORM_STAGE: Schema = &[
    field("files", FILES, None),
    field("options", OPT_OBJECT, None),
];

const TEMPLATES_STAGE: Schema = &[
    field("files", FILES, None),
    field("id", OPT_STRING, None),
    field("context_id", OPT_STRING, None),
    field("data", OPT_OBJECT, None),
    field("markdown", OPT_OBJECT, None),
    field("options", OPT_OBJECT, None),
];

const CLEAN_CSS_OPTIONS: Schema = &[
    field("html", OPT_FILES, None),
    field("ignore", OPT_ARRAY, None),
];

const CLEAN_CSS_STAGE: Schema = &[
    field("files", FILES, None),
    field("options", OPT_OBJECT, Some(CLEAN_CSS_OPTIONS)),
];

const SITEMAP_OPTIONS: Schema = &[
    field("site_url", STRING, None),
    field("changefreq", OPT_STRING, None),
    field("priority", OPT_NUMBER, None),
];

const SITEMAP_STAGE: Schema = &[
    field("files", FILES, None),
    field("options", OBJECT, Some(SITEMAP_OPTIONS)),
];

const BROWSERCONFIG_STAGE: Schema = &[
    field("tile70x70", STRING, None),
    field("tile150x150", STRING, None),
    field("tile310x150", STRING, None),
    field("tile310x310", STRING, None),
    field("tile_color", STRING, None),
];

const REVISION_OPTIONS: Schema = &[
    field("dont_rename", OPT_ARRAY, None),
    field("hash_length", OPT_NUMBER, None),
    field("mode", OPT_STRING, None),
    field("query_param", OPT_STRING, None),
];

const REVISION_STAGE: Schema = &[
    field("files", FILES, None),
    field("options", OPT_OBJECT, Some(REVISION_OPTIONS)),
];

const VALIDATE_HTML_OPTIONS: Schema = &[
    field("strict", OPT_BOOLEAN, None),
    field("endpoint", OPT_STRING, None),
];

const VALIDATE_HTML_STAGE: Schema = &[
    field("files", FILES, None),
    field("options", OPT_OBJECT, Some(VALIDATE_HTML_OPTIONS)),
];

/// Schema of the complete build configuration document.
pub const BUILD_CONFIG: Schema = &[
    field("src_path", STRING, None),
    field("build_path", STRING, None),
    field("dist_path", STRING, None),
    field("validate_js", OPT_OBJECT, Some(FILES_STAGE)),
    field("lint_js", OPT_OBJECT, Some(LINT_STAGE)),
    field("lint_sass", OPT_OBJECT, Some(LINT_STAGE)),
    field("templates", OPT_OBJECT, Some(TEMPLATES_STAGE)),
    field("sass", OPT_OBJECT, Some(TRANSFORM_STAGE)),
    field("collect_assets", OPT_OBJECT, Some(FILES_STAGE)),
    field("minify_js", OPT_OBJECT, Some(TRANSFORM_STAGE)),
    field("minify_html", OPT_OBJECT, Some(TRANSFORM_STAGE)),
    field("clean_css", OPT_OBJECT, Some(CLEAN_CSS_STAGE)),
    field("minify_css", OPT_OBJECT, Some(TRANSFORM_STAGE)),
    field("sitemap", OPT_OBJECT, Some(SITEMAP_STAGE)),
    field("browserconfig", OPT_OBJECT, Some(BROWSERCONFIG_STAGE)),
    field("generate_images", OPT_ARRAY, None),
    field("optimize_images", OPT_OBJECT, Some(TRANSFORM_STAGE)),
    field("revision", OPT_OBJECT, Some(REVISION_STAGE)),
    field("validate_html", OPT_OBJECT, Some(VALIDATE_HTML_STAGE)),
    field("report", BOOLEAN, None),
    field("clean_before", FILES, None),
    field("clean_after", FILES, None),
    field("server", OBJECT, None),
    field("tools", OBJECT, None),
];
