//! Resource kinds and their attribute schemas
//!
//! Every record published to the metadata store belongs to one
//! [`ResourceKind`]. The kind fixes the legal attribute names, the names of
//! scalar and array references, the natural key and the network path.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("{field} is invalid in {kind}")]
    UnknownAttribute { kind: ResourceKind, field: String },
    #[error("{field} is not a reference of {kind}")]
    UnknownReference { kind: ResourceKind, field: String },
    #[error("{kind} attributes must be a JSON object, got {value}")]
    NotAnObject { kind: ResourceKind, value: String },
    #[error("{kind} objects should specify either their (id) or ({fields}) {attributes}")]
    MissingKey {
        kind: ResourceKind,
        fields: String,
        attributes: String,
    },
    #[error("{kind} is addressed under a parent record, none given")]
    MissingParent { kind: ResourceKind },
    #[error("{kind} is already published and cannot be modified")]
    Published { kind: ResourceKind },
    #[error("invalid value for {field} in {kind}: {reason}")]
    InvalidValue {
        kind: ResourceKind,
        field: String,
        reason: String,
    },
}

/// Field lists for one resource kind
#[derive(Debug)]
pub struct Schema {
    /// Path template; `{id}` is replaced by the parent identity
    pub path: &'static str,
    /// Legal attribute names
    pub attributes: &'static [&'static str],
    /// Legal scalar reference names
    pub scalar_refs: &'static [&'static str],
    /// Legal array reference names
    pub array_refs: &'static [&'static str],
    /// Fields identifying a record within its kind and parent scope
    pub natural_key: &'static [&'static str],
}

impl Schema {
    /// Whether the path embeds a parent identity
    pub fn is_nested(&self) -> bool {
        self.path.contains("{id}")
    }
}

/// Remote resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Sensor,
    Referential,
    TransfoType,
    Transfo,
    Transfotree,
    Project,
    Platform,
    Session,
    Datasource,
    PlatformConfig,
    ForeignpcServer,
    ForeignpcTable,
    ForeignpcView,
}

static SENSOR: Schema = Schema {
    path: "sensor",
    attributes: &[
        "id",
        "name",
        "type",
        "description",
        "model",
        "serial_number",
        "specifications",
    ],
    scalar_refs: &[],
    array_refs: &[],
    natural_key: &["name"],
};

static REFERENTIAL: Schema = Schema {
    path: "referential",
    attributes: &["id", "name", "description", "srid"],
    scalar_refs: &["sensor"],
    array_refs: &[],
    natural_key: &["name", "sensor"],
};

static TRANSFO_TYPE: Schema = Schema {
    path: "transfos/type",
    attributes: &["id", "name", "description", "func_signature"],
    scalar_refs: &[],
    array_refs: &[],
    natural_key: &["name"],
};

static TRANSFO: Schema = Schema {
    path: "transfo",
    attributes: &[
        "id",
        "name",
        "description",
        "parameters",
        "parameters_column",
        "tdate",
        "validity_start",
        "validity_end",
    ],
    scalar_refs: &["source", "target", "transfo_type"],
    array_refs: &[],
    natural_key: &["name", "source", "target"],
};

static TRANSFOTREE: Schema = Schema {
    path: "transfotree",
    attributes: &["id", "name", "owner"],
    scalar_refs: &[],
    array_refs: &["transfos"],
    natural_key: &["name", "transfos"],
};

static PROJECT: Schema = Schema {
    path: "project",
    attributes: &["id", "name", "extent", "timezone", "specifications"],
    scalar_refs: &[],
    array_refs: &[],
    natural_key: &["name"],
};

static PLATFORM: Schema = Schema {
    path: "platform",
    attributes: &["id", "name", "description", "start_time", "end_time"],
    scalar_refs: &[],
    array_refs: &[],
    natural_key: &["name"],
};

static SESSION: Schema = Schema {
    path: "session",
    attributes: &["id", "name", "start_time", "end_time", "specifications"],
    scalar_refs: &["project", "platform"],
    array_refs: &[],
    natural_key: &["name", "project", "platform"],
};

static DATASOURCE: Schema = Schema {
    path: "datasource",
    attributes: &[
        "id",
        "type",
        "uri",
        "bounds",
        "capture_start",
        "capture_end",
        "specifications",
        "extent",
    ],
    scalar_refs: &["session", "referential"],
    array_refs: &[],
    natural_key: &["uri", "session", "referential"],
};

static PLATFORM_CONFIG: Schema = Schema {
    path: "platforms/{id}/config",
    attributes: &["id", "name", "description", "root", "srid", "owner"],
    scalar_refs: &["platform"],
    array_refs: &["transfo_trees"],
    natural_key: &["name"],
};

static FOREIGNPC_SERVER: Schema = Schema {
    path: "foreignpc/server",
    attributes: &["id", "name", "driver", "options"],
    scalar_refs: &[],
    array_refs: &[],
    natural_key: &["name"],
};

static FOREIGNPC_TABLE: Schema = Schema {
    path: "foreignpc/table",
    attributes: &["id", "table", "srid", "options"],
    scalar_refs: &["server"],
    array_refs: &[],
    natural_key: &["table"],
};

static FOREIGNPC_VIEW: Schema = Schema {
    path: "foreignpc/view",
    attributes: &["id", "view", "sbet", "srid"],
    scalar_refs: &["table"],
    array_refs: &[],
    natural_key: &["view"],
};

impl ResourceKind {
    pub const ALL: [ResourceKind; 13] = [
        ResourceKind::Sensor,
        ResourceKind::Referential,
        ResourceKind::TransfoType,
        ResourceKind::Transfo,
        ResourceKind::Transfotree,
        ResourceKind::Project,
        ResourceKind::Platform,
        ResourceKind::Session,
        ResourceKind::Datasource,
        ResourceKind::PlatformConfig,
        ResourceKind::ForeignpcServer,
        ResourceKind::ForeignpcTable,
        ResourceKind::ForeignpcView,
    ];

    pub fn schema(self) -> &'static Schema {
        match self {
            Self::Sensor => &SENSOR,
            Self::Referential => &REFERENTIAL,
            Self::TransfoType => &TRANSFO_TYPE,
            Self::Transfo => &TRANSFO,
            Self::Transfotree => &TRANSFOTREE,
            Self::Project => &PROJECT,
            Self::Platform => &PLATFORM,
            Self::Session => &SESSION,
            Self::Datasource => &DATASOURCE,
            Self::PlatformConfig => &PLATFORM_CONFIG,
            Self::ForeignpcServer => &FOREIGNPC_SERVER,
            Self::ForeignpcTable => &FOREIGNPC_TABLE,
            Self::ForeignpcView => &FOREIGNPC_VIEW,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Referential => "referential",
            Self::TransfoType => "transfo-type",
            Self::Transfo => "transfo",
            Self::Transfotree => "transfotree",
            Self::Project => "project",
            Self::Platform => "platform",
            Self::Session => "session",
            Self::Datasource => "datasource",
            Self::PlatformConfig => "platform-config",
            Self::ForeignpcServer => "foreignpc-server",
            Self::ForeignpcTable => "foreignpc-table",
            Self::ForeignpcView => "foreignpc-view",
        }
    }

    /// Find the kind whose path template is `path` (e.g. `transfos/type`)
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.schema().path == path)
    }

    pub fn natural_key(self) -> &'static [&'static str] {
        self.schema().natural_key
    }

    /// Resolve the network path, filling in the parent identity for nested kinds
    pub fn path(self, parent: Option<i64>) -> Result<ResourcePath, SchemaError> {
        let template = self.schema().path;
        if !self.schema().is_nested() {
            return Ok(ResourcePath(template.to_string()));
        }
        match parent {
            Some(id) => Ok(ResourcePath(template.replace("{id}", &id.to_string()))),
            None => Err(SchemaError::MissingParent { kind: self }),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved, parent-qualified resource path such as `platforms/3/config`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection endpoint relative to the API root, e.g. `transfos/types/`
    pub fn collection(&self) -> String {
        format!("{}s/", self.0)
    }

    /// Item endpoint relative to the API root, e.g. `sensors/4/`
    pub fn item(&self, id: i64) -> String {
        format!("{}s/{}/", self.0, id)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
