//! Field resolution: maps textual names to typed query variables.
//!
//! Known names resolve to a [`Field`] bound to a schema column. Any other
//! well-formed name is a dynamic property key, represented as
//! [`Variable::Value`]; its "column" is chosen at run time by the key.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{AqlError, Result};
use crate::query::ast::Comparator;
use crate::query::tables::{SqlTable, TableKind};
use crate::query::value::Value;

/// Prefix that forces a name to resolve as a dynamic property.
pub const PROPERTY_PREFIX: char = '@';

/// Static type attached to a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// Item type code (`0` folder, `1` file).
    ItemType,
    /// Milliseconds since the Unix epoch.
    Date,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::ItemType => write!(f, "item type"),
            FieldType::Date => write!(f, "date"),
        }
    }
}

/// Kind of repository item stored in `nodes.node_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// A directory.
    Folder,
    /// A stored artifact.
    File,
}

impl ItemType {
    /// Numeric code used in the store.
    pub fn code(self) -> i64 {
        match self {
            ItemType::Folder => 0,
            ItemType::File => 1,
        }
    }

    /// Decodes the stored code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ItemType::Folder),
            1 => Some(ItemType::File),
            _ => None,
        }
    }

    /// Parses the textual spelling accepted in queries.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "folder" => Some(ItemType::Folder),
            "file" => Some(ItemType::File),
            _ => None,
        }
    }
}

/// Static fields of the items domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Repository key.
    Repo,
    /// Path of the parent folder.
    Path,
    /// Item name.
    Name,
    /// Item type (file or folder).
    Type,
    /// Depth below the repository root.
    Depth,
    /// Binary length in bytes.
    Size,
    /// Creation time.
    Created,
    /// Creating user.
    CreatedBy,
    /// Last modification time.
    Modified,
    /// Last modifying user.
    ModifiedBy,
    /// Last metadata update time.
    Updated,
    /// Calculated sha1.
    ActualSha1,
    /// Calculated md5.
    ActualMd5,
    /// Client-declared sha1.
    OriginalSha1,
    /// Client-declared md5.
    OriginalMd5,
    /// Sha256 from the checksum table.
    Sha256,
    /// Raw property key column.
    PropertyKey,
    /// Raw property value column.
    PropertyValue,
}

impl Field {
    /// Every field, in projection order.
    pub const ALL: [Field; 18] = [
        Field::Repo,
        Field::Path,
        Field::Name,
        Field::Type,
        Field::Depth,
        Field::Size,
        Field::Created,
        Field::CreatedBy,
        Field::Modified,
        Field::ModifiedBy,
        Field::Updated,
        Field::ActualSha1,
        Field::ActualMd5,
        Field::OriginalSha1,
        Field::OriginalMd5,
        Field::Sha256,
        Field::PropertyKey,
        Field::PropertyValue,
    ];

    /// Fields that identify an item and are always projected.
    pub const IDENTITY: [Field; 3] = [Field::Repo, Field::Path, Field::Name];

    /// Name used in query text and result rows.
    pub fn name(self) -> &'static str {
        match self {
            Field::Repo => "repo",
            Field::Path => "path",
            Field::Name => "name",
            Field::Type => "type",
            Field::Depth => "depth",
            Field::Size => "size",
            Field::Created => "created",
            Field::CreatedBy => "created_by",
            Field::Modified => "modified",
            Field::ModifiedBy => "modified_by",
            Field::Updated => "updated",
            Field::ActualSha1 => "actual_sha1",
            Field::ActualMd5 => "actual_md5",
            Field::OriginalSha1 => "original_sha1",
            Field::OriginalMd5 => "original_md5",
            Field::Sha256 => "sha256",
            Field::PropertyKey => "key",
            Field::PropertyValue => "value",
        }
    }

    /// Looks up a field by its query name.
    pub fn from_name(name: &str) -> Option<Self> {
        Field::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Declared type.
    pub fn field_type(self) -> FieldType {
        match self {
            Field::Type => FieldType::ItemType,
            Field::Depth | Field::Size => FieldType::Integer,
            Field::Created | Field::Modified | Field::Updated => FieldType::Date,
            _ => FieldType::String,
        }
    }

    /// Table that owns the column.
    pub fn table_kind(self) -> TableKind {
        match self {
            Field::Sha256 => TableKind::Binaries,
            Field::PropertyKey | Field::PropertyValue => TableKind::Properties,
            _ => TableKind::Nodes,
        }
    }

    /// Physical column name.
    pub fn column(self) -> &'static str {
        match self {
            Field::Repo => "repo",
            Field::Path => "node_path",
            Field::Name => "node_name",
            Field::Type => "node_type",
            Field::Depth => "depth",
            Field::Size => "bin_length",
            Field::Created => "created",
            Field::CreatedBy => "created_by",
            Field::Modified => "modified",
            Field::ModifiedBy => "modified_by",
            Field::Updated => "updated",
            Field::ActualSha1 => "sha1_actual",
            Field::ActualMd5 => "md5_actual",
            Field::OriginalSha1 => "sha1_original",
            Field::OriginalMd5 => "md5_original",
            Field::Sha256 => "sha256",
            Field::PropertyKey => "prop_key",
            Field::PropertyValue => "prop_value",
        }
    }

    /// Whether the field may be projected or sorted on.
    pub fn is_selectable(self) -> bool {
        self.table_kind() != TableKind::Properties
    }

    /// Whether the column may hold `NULL` (folders carry no checksums).
    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            Field::Size
                | Field::CreatedBy
                | Field::ModifiedBy
                | Field::ActualSha1
                | Field::ActualMd5
                | Field::OriginalSha1
                | Field::OriginalMd5
                | Field::Sha256
                | Field::PropertyValue
        )
    }

    /// Table a criterion on this field reads from, outside any `$join`.
    ///
    /// Property fields return `None`: their table comes from the allocator.
    pub fn fixed_table(self) -> Option<SqlTable> {
        match self.table_kind() {
            TableKind::Nodes => Some(SqlTable::nodes()),
            TableKind::Binaries => Some(SqlTable::binaries()),
            TableKind::Properties => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved query term.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Variable {
    /// Static schema column.
    Field(Field),
    /// Dynamic property key; the value side is always typed as a string.
    Value(String),
}

impl Variable {
    /// Whether the variable is a static field.
    pub fn is_field(&self) -> bool {
        matches!(self, Variable::Field(_))
    }

    /// Static field, if any.
    pub fn as_field(&self) -> Option<Field> {
        match self {
            Variable::Field(field) => Some(*field),
            Variable::Value(_) => None,
        }
    }

    /// Dynamic property key, if any.
    pub fn property_key(&self) -> Option<&str> {
        match self {
            Variable::Field(_) => None,
            Variable::Value(key) => Some(key),
        }
    }

    /// Type literals paired with this variable must have.
    pub fn value_type(&self) -> FieldType {
        match self {
            Variable::Field(field) => field.field_type(),
            Variable::Value(_) => FieldType::String,
        }
    }

    /// Whether criteria on this variable read a property table.
    pub fn reads_properties(&self) -> bool {
        match self {
            Variable::Field(field) => field.table_kind() == TableKind::Properties,
            Variable::Value(_) => true,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Field(field) => write!(f, "{field}"),
            Variable::Value(key) => write!(f, "{PROPERTY_PREFIX}{key}"),
        }
    }
}

/// Resolves a name from key position into a [`Variable`].
pub fn resolve(name: &str) -> Result<Variable> {
    if name.is_empty() {
        return Err(AqlError::illegal("field name cannot be empty"));
    }
    if name.starts_with('$') {
        return Err(AqlError::illegal(format!("unknown operator '{name}'")));
    }
    if let Some(key) = name.strip_prefix(PROPERTY_PREFIX) {
        validate_property_key(key)?;
        return Ok(Variable::Value(key.to_owned()));
    }
    if let Some(field) = Field::from_name(name) {
        return Ok(Variable::Field(field));
    }
    validate_property_key(name)?;
    Ok(Variable::Value(name.to_owned()))
}

/// Resolves a `(key, literal)` pair, typing the literal from the key.
pub fn resolve_pair(key: &str, literal: Value) -> Result<(Variable, Value)> {
    let variable = resolve(key)?;
    let value = coerce_literal(&variable, literal)?;
    Ok((variable, value))
}

/// Resolves a name used in `sort` or `include`, which must be selectable.
pub fn resolve_selectable(name: &str) -> Result<Field> {
    match resolve(name)? {
        Variable::Field(field) if field.is_selectable() => Ok(field),
        Variable::Field(field) => Err(AqlError::illegal(format!(
            "field '{field}' cannot be selected or sorted on"
        ))),
        Variable::Value(key) => Err(AqlError::illegal(format!(
            "property '{key}' cannot be selected or sorted on"
        ))),
    }
}

/// Rejects comparators the variable's type cannot support.
pub fn check_comparator(variable: &Variable, comparator: Comparator) -> Result<()> {
    let ty = variable.value_type();
    if comparator.is_pattern() && ty != FieldType::String {
        return Err(AqlError::illegal(format!(
            "{} cannot be used on {ty} field '{variable}'",
            comparator.symbol()
        )));
    }
    if comparator.is_ordering() && ty == FieldType::ItemType {
        return Err(AqlError::illegal(format!(
            "{} cannot be used on field '{variable}'",
            comparator.symbol()
        )));
    }
    Ok(())
}

fn validate_property_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(AqlError::illegal("property name cannot be empty"));
    }
    let valid = key
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':'));
    if !valid {
        return Err(AqlError::illegal(format!(
            "'{key}' is not a valid field or property name"
        )));
    }
    Ok(())
}

fn coerce_literal(variable: &Variable, literal: Value) -> Result<Value> {
    let mismatch = |literal: &Value| {
        AqlError::illegal(format!(
            "{} literal is not valid for {} field '{variable}'",
            literal.type_name(),
            variable.value_type()
        ))
    };
    match variable.value_type() {
        FieldType::String => match literal {
            Value::String(_) => Ok(literal),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) if !variable.is_field() => {
                Ok(Value::String(literal.to_text()))
            }
            other => Err(mismatch(&other)),
        },
        FieldType::Integer => match literal {
            Value::Int(_) => Ok(literal),
            other => Err(mismatch(&other)),
        },
        FieldType::ItemType => match &literal {
            Value::Int(code) if ItemType::from_code(*code).is_some() => Ok(literal),
            Value::String(name) => ItemType::from_name(name)
                .map(|ty| Value::Int(ty.code()))
                .ok_or_else(|| AqlError::illegal(format!("unknown item type '{name}'"))),
            other => Err(mismatch(other)),
        },
        FieldType::Date => match &literal {
            Value::Int(_) => Ok(literal),
            Value::String(text) => parse_date(text).map(Value::Int),
            other => Err(mismatch(other)),
        },
    }
}

fn parse_date(text: &str) -> Result<i64> {
    let parsed = OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|err| AqlError::illegal(format!("invalid date '{text}': {err}")))?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000)
        .map_err(|_| AqlError::illegal(format!("date '{text}' is out of range")))
}
