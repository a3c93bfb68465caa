//! Database schema model
//!
//! Table and column metadata for type inference, affinity detection, and
//! hierarchy key levels. Physical tables come from configuration; virtual
//! tables are added for CTEs and FROM-clause subqueries during inference.
//! Tables are kept in a `BTreeMap` so every iteration is key-sorted and the
//! emitted IR stays deterministic.

use crate::config::SchemaConfig;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Portable base type: "int", "string", "decimal", "timestamp", ...
    pub base_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub max_length: Option<u32>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, base_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: base_type.into(),
            nullable: true,
            primary_key: false,
            precision: None,
            scale: None,
            max_length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    /// Declaration order is preserved; `SELECT *` expansion depends on it.
    pub columns: Vec<ColumnInfo>,
    /// True for tables synthesized from CTE / subquery analysis.
    pub derived: bool,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            derived: false,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseSchema {
    tables: BTreeMap<String, TableInfo>,
}

impl DatabaseSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SchemaConfig) -> Self {
        let mut schema = Self::new();
        for table in &config.tables {
            let mut info = TableInfo::new(&table.name);
            for col in &table.columns {
                info.columns.push(ColumnInfo {
                    name: col.name.clone(),
                    base_type: base_type_of(&col.column_type).to_string(),
                    nullable: col.nullable && !col.primary_key,
                    primary_key: col.primary_key,
                    precision: col.precision,
                    scale: col.scale,
                    max_length: col.max_length,
                });
            }
            schema.insert(info);
        }
        schema
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn insert(&mut self, table: TableInfo) {
        self.tables.insert(table.name.to_lowercase(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    /// Tables in key-sorted order.
    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }
}

/// Map a SQL type name to the portable base type used in the IR.
pub fn base_type_of(sql_type: &str) -> &'static str {
    let lowered = sql_type.to_lowercase();
    let head = lowered
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("");
    match head {
        "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "serial"
        | "bigserial" | "smallserial" | "tinyint" | "mediumint" => "int",
        "varchar" | "char" | "character" | "text" | "uuid" | "citext" | "enum" => "string",
        "numeric" | "decimal" | "money" => "decimal",
        "real" | "float" | "float4" | "float8" | "double" => "float",
        "bool" | "boolean" => "bool",
        "timestamp" | "timestamptz" | "datetime" => "timestamp",
        "date" => "date",
        "time" | "timetz" => "time",
        "bytea" | "blob" | "binary" | "varbinary" => "bytes",
        _ => "any",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn users_schema() -> DatabaseSchema {
        let yaml = r#"
schema:
  tables:
    - name: users
      columns:
        - { name: id, type: bigint, nullable: false, primary_key: true }
        - { name: name, type: varchar, max_length: 120, nullable: false }
        - { name: email, type: text }
"#;
        let config = Config::from_str_validated(yaml).unwrap();
        DatabaseSchema::from_config(&config.schema)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let schema = users_schema();
        assert!(schema.table("USERS").is_some());
        let users = schema.table("users").unwrap();
        assert!(users.column("ID").is_some());
    }

    #[test]
    fn test_primary_keys() {
        let schema = users_schema();
        assert_eq!(schema.table("users").unwrap().primary_keys(), vec!["id"]);
    }

    #[test]
    fn test_pk_columns_are_never_nullable() {
        let schema = users_schema();
        assert!(!schema.table("users").unwrap().column("id").unwrap().nullable);
    }

    #[test]
    fn test_base_type_mapping() {
        assert_eq!(base_type_of("BIGINT"), "int");
        assert_eq!(base_type_of("varchar(120)"), "string");
        assert_eq!(base_type_of("numeric(10, 2)"), "decimal");
        assert_eq!(base_type_of("timestamptz"), "timestamp");
        assert_eq!(base_type_of("jsonb"), "any");
    }

    #[test]
    fn test_tables_iterate_sorted() {
        let mut schema = DatabaseSchema::new();
        schema.insert(TableInfo::new("zeta"));
        schema.insert(TableInfo::new("alpha"));
        let names: Vec<_> = schema.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
