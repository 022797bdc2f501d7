//! Declarative SQLite schema definitions.
//!
//! Tables are described as const data and rendered into `CREATE TABLE` /
//! `CREATE INDEX` statements. The same description is used to validate the
//! live shape of an existing database through `PRAGMA table_info`, which is
//! how corrupted or foreign schemas are detected before any write happens.

use anyhow::{bail, Result};
use rusqlite::Connection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_sql(s: &str) -> Option<SqlType> {
        match s {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BLOB" => Some(SqlType::Blob),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
pub enum OnDelete {
    NoAction,
    Cascade,
    SetNull,
}

impl OnDelete {
    fn as_sql(self) -> &'static str {
        match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

#[derive(Clone, Copy)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub references: Option<ForeignKey>,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Column {
            name,
            sql_type,
            primary_key: false,
            non_null: false,
            default_value: None,
            references: None,
        }
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn non_null(mut self) -> Self {
        self.non_null = true;
        self
    }

    pub const fn default_value(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }

    pub const fn references(
        mut self,
        table: &'static str,
        column: &'static str,
        on_delete: OnDelete,
    ) -> Self {
        self.references = Some(ForeignKey {
            table,
            column,
            on_delete,
        });
        self
    }

    fn render(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default_value) = self.default_value {
            sql.push_str(&format!(" DEFAULT {default_value}"));
        }
        if let Some(fk) = &self.references {
            sql.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                fk.table,
                fk.column,
                fk.on_delete.as_sql()
            ));
        }
        sql
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    /// Create the table and its indices under its declared name.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        self.create_as(conn, self.name)?;
        self.create_indices(conn)
    }

    /// Create the table shape under an arbitrary name, without indices.
    /// Migration steps use this to build the new-generation table next to
    /// the old one before swapping them.
    pub fn create_as(&self, conn: &Connection, name: &str) -> Result<()> {
        let mut body: Vec<String> = self.columns.iter().map(Column::render).collect();
        for unique in self.unique_constraints {
            body.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        conn.execute(&format!("CREATE TABLE {} ({})", name, body.join(", ")), [])?;
        Ok(())
    }

    pub fn create_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    index_name, self.name, column_name
                ),
                [],
            )?;
        }
        Ok(())
    }

    /// Check the live column shape of this table against the declaration.
    ///
    /// The column list must match exactly: same count, same names in the
    /// same order, same types, same NOT NULL and PRIMARY KEY flags. Any
    /// mismatch means the database was written by an unknown generation of
    /// the schema and must not be trusted.
    pub fn validate_shape(&self, conn: &Connection) -> Result<()> {
        struct LiveColumn {
            name: String,
            sql_type: String,
            non_null: bool,
            primary_key: bool,
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", self.name))?;
        let live: Vec<LiveColumn> = stmt
            .query_map([], |row| {
                Ok(LiveColumn {
                    name: row.get(1)?,
                    sql_type: row.get(2)?,
                    non_null: row.get::<_, i32>(3)? == 1,
                    primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        if live.len() != self.columns.len() {
            bail!(
                "table {} has {} columns, expected {} ({})",
                self.name,
                live.len(),
                self.columns.len(),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in live.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "table {}: expected column {}, found {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if SqlType::from_sql(&actual.sql_type) != Some(expected.sql_type) {
                bail!(
                    "table {} column {}: expected type {}, found {}",
                    self.name,
                    expected.name,
                    expected.sql_type.as_sql(),
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "table {} column {}: NOT NULL mismatch",
                    self.name,
                    expected.name
                );
            }
            if actual.primary_key != expected.primary_key {
                bail!(
                    "table {} column {}: PRIMARY KEY mismatch",
                    self.name,
                    expected.name
                );
            }
        }
        Ok(())
    }
}

/// All tables in the database except SQLite's own bookkeeping tables.
pub fn list_user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(tables)
}

/// Drop every user table, repeating until only engine-internal tables
/// remain. Individual drops may fail while other tables still reference
/// them, so the pass loops as long as it makes progress.
pub fn drop_all_user_tables(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", false)?;
    loop {
        let tables = list_user_tables(conn)?;
        if tables.is_empty() {
            break;
        }
        let mut dropped = 0;
        for table in &tables {
            if conn.execute(&format!("DROP TABLE {table}"), []).is_ok() {
                dropped += 1;
            }
        }
        if dropped == 0 {
            conn.pragma_update(None, "foreign_keys", true)?;
            bail!(
                "unable to drop remaining tables: {}",
                tables.join(", ")
            );
        }
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
