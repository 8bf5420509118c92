//! Route table.
//!
//! Maps paths to an index and type by ordered pattern matching. The first
//! matching route wins; a route that does not match directly is retried as a
//! tag route (the same pattern under `/_TAGS`). After [`RouteTable::build`]
//! the table always ends with exactly one catch-all `*` route.
//!
//! Dynamic routes name their index, type and extra fields in `{{...}}`
//! placeholder segments, e.g. `/dynamic/{{index}}/{{type}}/{{size:integer}}/*`.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::{ProviderConfig, RouteConfig};
use crate::error::{ConfigError, RouteError, ValidationError};
use crate::index::validate_static_index_name;
use crate::path::WildcardMatcher;

/// Envelope properties a dynamic field may not shadow.
const RESERVED_FIELDS: &[&str] = &[
    "path",
    "data",
    "created",
    "modified",
    "timestamp",
    "createdBy",
    "modifiedBy",
    "deletedBy",
    "_tag",
    "doc_type",
];

/// The prefix under which tag paths live.
pub const TAG_PREFIX: &str = "/_TAGS";

/// Declared type of a dynamic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Mapped as `keyword`; the default.
    String,
    /// Mapped as `integer`.
    Integer,
    /// Integer epoch milliseconds, mapped as `date`.
    Date,
    /// Mapped as `long`.
    Long,
    /// Mapped as `double`.
    Double,
    /// Mapped as `float`.
    Float,
    /// Mapped as `half_float`.
    HalfFloat,
    /// Mapped as `scaled_float`.
    ScaledFloat,
    /// `true` or `1` is true, anything else false.
    Boolean,
}

impl FieldType {
    /// Parses a declared type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(FieldType::String),
            "integer" => Some(FieldType::Integer),
            "date" => Some(FieldType::Date),
            "long" => Some(FieldType::Long),
            "double" => Some(FieldType::Double),
            "float" => Some(FieldType::Float),
            "half_float" => Some(FieldType::HalfFloat),
            "scaled_float" => Some(FieldType::ScaledFloat),
            "boolean" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    /// Declared type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Date => "date",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::HalfFloat => "half_float",
            FieldType::ScaledFloat => "scaled_float",
            FieldType::Boolean => "boolean",
        }
    }

    /// Index mapping for a property of this type.
    pub fn mapping(&self) -> Value {
        match self {
            FieldType::String => json!({ "type": "keyword" }),
            FieldType::ScaledFloat => json!({ "type": "scaled_float", "scaling_factor": 100 }),
            other => json!({ "type": other.as_str() }),
        }
    }

    /// Parses a raw path segment as a value of this type.
    pub fn coerce(&self, field: &str, raw: &str) -> Result<Value, ValidationError> {
        let invalid = || ValidationError::InvalidFieldValue {
            field: field.to_string(),
            field_type: self.as_str().to_string(),
            value: raw.to_string(),
        };
        match self {
            FieldType::String => Ok(Value::String(raw.to_string())),
            FieldType::Integer | FieldType::Date => {
                raw.parse::<i64>().map(Value::from).map_err(|_| invalid())
            }
            FieldType::Long
            | FieldType::Double
            | FieldType::Float
            | FieldType::HalfFloat
            | FieldType::ScaledFloat => {
                let parsed = raw.parse::<f64>().map_err(|_| invalid())?;
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(invalid)
            }
            FieldType::Boolean => Ok(Value::Bool(raw == "true" || raw == "1")),
        }
    }
}

/// A field declared by a dynamic route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name, stored as a top-level envelope property.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
}

/// One segment of a dynamic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A literal segment (may itself be a wildcard).
    Literal(String),
    /// `{{index}}`.
    Index,
    /// `{{type}}`.
    Type,
    /// `{{name}}` or `{{name:type}}`.
    Field(FieldDecl),
}

/// Parsed placeholder layout of a dynamic route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLayout {
    /// Pattern segments, split on `/`.
    pub segments: Vec<Segment>,
    /// Position of the `{{index}}` segment.
    pub index_segment: Option<usize>,
    /// Position of the `{{type}}` segment.
    pub type_segment: Option<usize>,
}

impl DynamicLayout {
    /// Parses a dynamic pattern.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut index_segment = None;
        let mut type_segment = None;

        for (position, raw) in pattern.split('/').enumerate() {
            let Some(inner) = raw
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
            else {
                if raw.contains("{{") {
                    return Err(ConfigError::InvalidRoute {
                        pattern: pattern.to_string(),
                        message: format!("placeholder '{}' must fill a whole segment", raw),
                    });
                }
                segments.push(Segment::Literal(raw.to_string()));
                continue;
            };

            let segment = match inner.trim() {
                "index" => {
                    index_segment = Some(position);
                    Segment::Index
                }
                "type" => {
                    type_segment = Some(position);
                    Segment::Type
                }
                declaration => Segment::Field(parse_field(pattern, declaration)?),
            };
            segments.push(segment);
        }

        Ok(Self {
            segments,
            index_segment,
            type_segment,
        })
    }

    /// Declared fields with their segment positions.
    pub fn fields(&self) -> impl Iterator<Item = (usize, &FieldDecl)> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(position, segment)| match segment {
                Segment::Field(decl) => Some((position, decl)),
                _ => None,
            })
    }
}

fn parse_field(pattern: &str, declaration: &str) -> Result<FieldDecl, ConfigError> {
    let (name, type_name) = match declaration.split_once(':') {
        Some((name, type_name)) => (name.trim(), type_name.trim()),
        None => (declaration, "string"),
    };

    if name.is_empty() {
        return Err(ConfigError::InvalidRoute {
            pattern: pattern.to_string(),
            message: "empty field placeholder".to_string(),
        });
    }
    if RESERVED_FIELDS.contains(&name) {
        return Err(ConfigError::InvalidRoute {
            pattern: pattern.to_string(),
            message: format!("field '{}' collides with a stored envelope field", name),
        });
    }

    let field_type =
        FieldType::parse(type_name).ok_or_else(|| ConfigError::UnsupportedFieldType {
            pattern: pattern.to_string(),
            field: name.to_string(),
            field_type: type_name.to_string(),
        })?;

    Ok(FieldDecl {
        name: name.to_string(),
        field_type,
    })
}

/// A route from a pattern to an index and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Pattern as configured.
    pub pattern: String,
    /// Target index, or the fallback index for a dynamic route without an
    /// `{{index}}` segment.
    pub index: String,
    /// Target type, or the fallback type for a dynamic route without a
    /// `{{type}}` segment.
    pub doc_type: String,
    /// Placeholder layout, present for dynamic routes.
    pub layout: Option<DynamicLayout>,
    match_pattern: String,
}

impl Route {
    /// Builds a route, filling unset index and type from the defaults.
    pub fn from_config(
        config: &RouteConfig,
        default_index: &str,
        default_type: &str,
    ) -> Result<Self, ConfigError> {
        let index = config
            .index
            .clone()
            .unwrap_or_else(|| default_index.to_string());
        let doc_type = config
            .doc_type
            .clone()
            .unwrap_or_else(|| default_type.to_string());

        let (layout, match_pattern) = if config.dynamic {
            let layout = DynamicLayout::parse(&config.pattern)?;
            let prefix = config
                .pattern
                .split_once('{')
                .map(|(prefix, _)| prefix)
                .unwrap_or(&config.pattern);
            (Some(layout), format!("{}*", prefix))
        } else {
            (None, config.pattern.clone())
        };

        if layout.as_ref().is_none_or(|l| l.index_segment.is_none()) {
            validate_static_index_name(&index).map_err(|reason| ConfigError::InvalidRoute {
                pattern: config.pattern.clone(),
                message: reason,
            })?;
        }

        Ok(Self {
            pattern: config.pattern.clone(),
            index,
            doc_type,
            layout,
            match_pattern,
        })
    }

    /// The catch-all route.
    pub fn catch_all(default_index: &str, default_type: &str) -> Self {
        Self {
            pattern: "*".to_string(),
            index: default_index.to_string(),
            doc_type: default_type.to_string(),
            layout: None,
            match_pattern: "*".to_string(),
        }
    }

    /// Whether index and type are derived from the path.
    pub fn is_dynamic(&self) -> bool {
        self.layout.is_some()
    }

    /// The pattern paths are matched against.
    pub fn match_pattern(&self) -> &str {
        &self.match_pattern
    }
}

/// Ordered routes plus the matcher that evaluates them.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    matcher: WildcardMatcher,
}

impl RouteTable {
    /// Builds the table from configuration, appending a catch-all route to
    /// the default index when none is configured.
    pub fn build(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let mut routes = config
            .data_routes
            .iter()
            .map(|r| Route::from_config(r, &config.default_index, &config.default_type))
            .map(|r| r.map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        if !routes.iter().any(|r| r.pattern == "*") {
            routes.push(Arc::new(Route::catch_all(
                &config.default_index,
                &config.default_type,
            )));
        }

        Ok(Self {
            routes,
            matcher: WildcardMatcher::new(config.wildcard_cache),
        })
    }

    /// Finds the first route matching `path` directly or as a tag path.
    pub fn resolve(&self, path: &str) -> Result<Arc<Route>, RouteError> {
        let tag_prefix = if path.starts_with('/') {
            TAG_PREFIX.to_string()
        } else {
            format!("{}/", TAG_PREFIX)
        };
        let route = self.routes.iter().find(|route| {
            self.matcher.matches(&route.match_pattern, path)
                || self
                    .matcher
                    .matches(&format!("{}{}", tag_prefix, route.match_pattern), path)
        });

        match route {
            Some(route) => {
                tracing::debug!(path, pattern = %route.pattern, "resolved route");
                Ok(Arc::clone(route))
            }
            None => Err(RouteError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Routes whose index and type are derived from the path.
    pub fn dynamic_routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter().filter(|r| r.is_dynamic())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            matcher: WildcardMatcher::default(),
        }
    }
}
