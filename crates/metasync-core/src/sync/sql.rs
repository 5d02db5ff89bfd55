//! SQL statement and value types, type mapping, and object naming.
//!
//! The emitted dialect is T-SQL flavored; the downstream store is free to
//! translate. Statements carry their parameters separately so execution
//! stays injection-safe for metadata values.

use uuid::Uuid;

use crate::model::DataType;

/// The shared relationship-fact table.
pub const FACT_TABLE: &str = "relationship_fact";

/// Subject column of the fact table.
pub const FACT_SUBJECT_COLUMN: &str = "subject_id";

/// Object column of the fact table.
pub const FACT_OBJECT_COLUMN: &str = "object_id";

/// Predicate column of the fact table.
pub const FACT_PREDICATE_COLUMN: &str = "predicate";

/// Metadata table for modules.
pub const META_MODULE: &str = "meta_module";

/// Metadata table for resource types.
pub const META_RESOURCE_TYPE: &str = "meta_resource_type";

/// Metadata table for scalar properties.
pub const META_SCALAR_PROPERTY: &str = "meta_scalar_property";

/// Metadata table for navigation properties.
pub const META_NAVIGATION_PROPERTY: &str = "meta_navigation_property";

/// Metadata table for associations.
pub const META_ASSOCIATION: &str = "meta_association";

/// A parameter value for a DML statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// String.
    Str(String),
    /// Uuid.
    Uuid(Uuid),
}

impl SqlValue {
    /// Wrap an optional value, mapping `None` to NULL.
    pub fn opt<T: Into<SqlValue>>(value: Option<T>) -> SqlValue {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Str(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Str(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

/// Whether a statement alters schema or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Schema alteration.
    Ddl,
    /// Data manipulation.
    Dml,
}

/// One ordered statement of a synchronization run.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Statement kind.
    pub kind: StatementKind,
    /// Statement text with `?` placeholders for parameters.
    pub sql: String,
    /// Parameter values in placeholder order.
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    /// A parameterless schema statement.
    pub fn ddl(sql: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Ddl,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A parameterized data statement.
    pub fn dml(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            kind: StatementKind::Dml,
            sql: sql.into(),
            params,
        }
    }
}

/// Render the physical column type for a scalar specification.
pub fn sql_type(
    data_type: DataType,
    length: Option<u32>,
    precision: Option<u8>,
    scale: Option<u8>,
) -> String {
    let sized = |name: &str| match length {
        Some(len) => format!("{}({})", name, len),
        None => format!("{}(MAX)", name),
    };
    match data_type {
        DataType::Binary => sized("VARBINARY"),
        DataType::Boolean => "BIT".to_string(),
        DataType::Byte => "TINYINT".to_string(),
        DataType::DateTime => "DATETIME2".to_string(),
        DataType::Decimal => format!(
            "DECIMAL({},{})",
            precision.unwrap_or(18),
            scale.unwrap_or(0)
        ),
        DataType::Double => "FLOAT".to_string(),
        DataType::Guid => "UNIQUEIDENTIFIER".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INT".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::Single => "REAL".to_string(),
        DataType::String => sized("NVARCHAR"),
    }
}

/// Lowercase a name into a safe SQL identifier fragment.
pub fn sanitize_ident(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 'x');
    }
    out
}

/// Relation view name for an association.
pub fn view_name(association: &str) -> String {
    format!("{}_view", sanitize_ident(association))
}

/// Link (insert) helper procedure name for an association.
pub fn link_proc_name(association: &str) -> String {
    format!("{}_insert", sanitize_ident(association))
}

/// Unlink (delete) helper procedure name for an association.
pub fn unlink_proc_name(association: &str) -> String {
    format!("{}_delete", sanitize_ident(association))
}

/// Unique index name for one end of an association view.
pub fn index_name(association: &str, end: &str) -> String {
    format!("ux_{}_{}", sanitize_ident(association), end)
}

/// Foreign-key constraint name for a column.
pub fn fk_constraint_name(table: &str, column: &str) -> String {
    format!("fk_{}_{}", table, column)
}

/// Qualified procedure name for one CUD operation of a resource type.
pub fn cud_proc_name(namespace: &str, type_name: &str, operation: &str) -> String {
    format!(
        "{}_{}_{}",
        sanitize_ident(namespace),
        sanitize_ident(type_name),
        operation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_rendering() {
        assert_eq!(sql_type(DataType::String, Some(200), None, None), "NVARCHAR(200)");
        assert_eq!(sql_type(DataType::String, None, None, None), "NVARCHAR(MAX)");
        assert_eq!(sql_type(DataType::Decimal, None, Some(18), Some(4)), "DECIMAL(18,4)");
        assert_eq!(sql_type(DataType::Guid, None, None, None), "UNIQUEIDENTIFIER");
        assert_eq!(sql_type(DataType::Int16, None, None, None), "SMALLINT");
    }

    #[test]
    fn test_object_names() {
        assert_eq!(view_name("Shelved In"), "shelved_in_view");
        assert_eq!(link_proc_name("owns"), "owns_insert");
        assert_eq!(unlink_proc_name("owns"), "owns_delete");
        assert_eq!(cud_proc_name("Library", "Book", "create"), "library_book_create");
        assert_eq!(fk_constraint_name("res_data_0001", "owner"), "fk_res_data_0001_owner");
    }

    #[test]
    fn test_sql_value_opt() {
        assert_eq!(SqlValue::opt(Some(3i32)), SqlValue::I32(3));
        assert_eq!(SqlValue::opt::<i32>(None), SqlValue::Null);
    }
}
