//! Result rows and their conversion into caller-facing entities.

use std::sync::Arc;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{AqlError, Result};
use crate::query::fields::{Field, ItemType};
use crate::query::value::Value;

/// One result row: logical fields in projection order with their values.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    columns: Arc<[Field]>,
    values: Vec<Value>,
}

impl ResultRow {
    /// Pairs raw cursor values with the compiled column metadata.
    pub fn new(columns: Arc<[Field]>, values: Vec<Value>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(AqlError::execution(format!(
                "cursor returned {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Value of `field`, if it was projected.
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.columns
            .iter()
            .position(|f| *f == field)
            .map(|index| &self.values[index])
    }

    /// Value of the column named `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        Field::from_name(name).and_then(|field| self.get(field))
    }

    /// Projected fields.
    pub fn columns(&self) -> &[Field] {
        &self.columns
    }

    /// Raw values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// `(field, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.columns.iter().copied().zip(self.values.iter())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn string(&self, field: Field) -> Option<String> {
        self.get(field).and_then(Value::as_str).map(str::to_owned)
    }

    fn int(&self, field: Field) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    fn required_string(&self, field: Field) -> Result<String> {
        self.string(field)
            .ok_or_else(|| AqlError::execution(format!("row has no '{field}' value")))
    }

    fn timestamp(&self, field: Field) -> Result<Option<OffsetDateTime>> {
        self.int(field).map(|ms| millis_to_datetime(field, ms)).transpose()
    }
}

/// Serializes as a JSON-style object keyed by field name.
impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name(), &PlainValue(value))?;
        }
        map.end()
    }
}

struct PlainValue<'a>(&'a Value);

impl Serialize for PlainValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
        }
    }
}

fn millis_to_datetime(field: Field, ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|err| AqlError::backend(format!("'{field}' holds an invalid timestamp"), err))
}

/// Converts result rows into domain objects.
pub trait RowFactory {
    /// Entity produced per row.
    type Output;

    /// Builds one entity from `row`.
    fn create(&self, row: &ResultRow) -> Result<Self::Output>;
}

/// Checksums of an item's binary; folders have none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Checksums {
    /// Calculated sha1.
    pub actual_sha1: Option<String>,
    /// Calculated md5.
    pub actual_md5: Option<String>,
    /// Client-declared sha1.
    pub original_sha1: Option<String>,
    /// Client-declared md5.
    pub original_md5: Option<String>,
    /// Sha256 from the checksum table.
    pub sha256: Option<String>,
}

/// A repository item as returned to callers.
///
/// Fields left out by `include(...)` are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Repository key.
    pub repo: String,
    /// Parent folder path, `.` for the repository root.
    pub path: String,
    /// Item name.
    pub name: String,
    /// File or folder.
    pub item_type: Option<ItemType>,
    /// Depth below the repository root.
    pub depth: Option<i64>,
    /// Binary length in bytes.
    pub size: Option<i64>,
    /// Creation time.
    pub created: Option<OffsetDateTime>,
    /// Creating user.
    pub created_by: Option<String>,
    /// Last modification time.
    pub modified: Option<OffsetDateTime>,
    /// Last modifying user.
    pub modified_by: Option<String>,
    /// Last metadata update time.
    pub updated: Option<OffsetDateTime>,
    /// Binary checksums.
    pub checksums: Checksums,
}

impl Artifact {
    /// `repo/path/name`, skipping a root path.
    pub fn full_path(&self) -> String {
        match self.path.as_str() {
            "" | "." => format!("{}/{}", self.repo, self.name),
            path => format!("{}/{}/{}", self.repo, path.trim_matches('/'), self.name),
        }
    }

    /// Whether the item is a file.
    pub fn is_file(&self) -> bool {
        self.item_type == Some(ItemType::File)
    }
}

/// Builds [`Artifact`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArtifactFactory;

impl RowFactory for ArtifactFactory {
    type Output = Artifact;

    fn create(&self, row: &ResultRow) -> Result<Artifact> {
        let item_type = match row.int(Field::Type) {
            Some(code) => Some(ItemType::from_code(code).ok_or_else(|| {
                AqlError::execution(format!("unknown item type code {code}"))
            })?),
            None => None,
        };
        Ok(Artifact {
            repo: row.required_string(Field::Repo)?,
            path: row.required_string(Field::Path)?,
            name: row.required_string(Field::Name)?,
            item_type,
            depth: row.int(Field::Depth),
            size: row.int(Field::Size),
            created: row.timestamp(Field::Created)?,
            created_by: row.string(Field::CreatedBy),
            modified: row.timestamp(Field::Modified)?,
            modified_by: row.string(Field::ModifiedBy),
            updated: row.timestamp(Field::Updated)?,
            checksums: Checksums {
                actual_sha1: row.string(Field::ActualSha1),
                actual_md5: row.string(Field::ActualMd5),
                original_sha1: row.string(Field::OriginalSha1),
                original_md5: row.string(Field::OriginalMd5),
                sha256: row.string(Field::Sha256),
            },
        })
    }
}
