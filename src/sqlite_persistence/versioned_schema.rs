use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Name of the single-row table recording the applied schema version.
pub const SCHEMA_VERSION_TABLE: &str = "schema_version";

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed in
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                is_autoincrement: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::SetDefault => "SET DEFAULT",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    /// Only meaningful on an INTEGER primary key: rowids are never reused.
    pub is_autoincrement: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl<S: AsRef<str>> Column<'_, S> {
    /// Column clause as it appears inside CREATE TABLE.
    fn definition(&self) -> String {
        let mut clauses = vec![format!("{} {}", self.name.as_ref(), self.sql_type.as_sql())];
        if self.is_primary_key {
            clauses.push("PRIMARY KEY".to_string());
            if self.is_autoincrement {
                clauses.push("AUTOINCREMENT".to_string());
            }
        }
        if self.non_null {
            clauses.push("NOT NULL".to_string());
        }
        if self.is_unique {
            clauses.push("UNIQUE".to_string());
        }
        if let Some(default_value) = &self.default_value {
            clauses.push(format!("DEFAULT {}", default_value.as_ref()));
        }
        if let Some(fk) = self.foreign_key {
            clauses.push(format!(
                "REFERENCES {}({}) ON DELETE {}",
                fk.foreign_table,
                fk.foreign_column,
                fk.on_delete.as_sql()
            ));
        }
        clauses.join(" ")
    }
}

/// A column as reported by `PRAGMA table_info`.
struct ColumnInfo {
    name: String,
    declared_type: String,
    non_null: bool,
    default_value: Option<String>,
    is_primary_key: bool,
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                non_null: row.get::<_, i32>(3)? == 1,
                default_value: row.get(4)?,
                is_primary_key: row.get::<_, i32>(5)? > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// SQLite may report a default wrapped in parentheses.
fn bare_default(value: Option<&str>) -> Option<&str> {
    value.map(|v| {
        v.strip_prefix('(')
            .and_then(|v| v.strip_suffix(')'))
            .unwrap_or(v)
    })
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut definitions: Vec<String> = self.columns.iter().map(Column::definition).collect();
        definitions.extend(
            self.unique_constraints
                .iter()
                .map(|columns| format!("UNIQUE ({})", columns.join(", "))),
        );
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, definitions.join(", ")),
            [],
        )?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_name),
                [],
            )?;
        }
        Ok(())
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let actual = table_info(conn, self.name)?;
        if actual.is_empty() {
            bail!("Table {} does not exist", self.name);
        }

        let actual_names: Vec<&str> = actual.iter().map(|c| c.name.as_str()).collect();
        let expected_names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        if actual_names != expected_names {
            bail!(
                "Table {} has columns ({}), expected ({})",
                self.name,
                actual_names.join(", "),
                expected_names.join(", ")
            );
        }

        for (actual, expected) in actual.iter().zip(self.columns.iter()) {
            let expected_type = expected.sql_type.as_sql();
            let mismatch = if !actual.declared_type.eq_ignore_ascii_case(expected_type) {
                Some(format!("type {} instead of {}", actual.declared_type, expected_type))
            } else if actual.non_null != expected.non_null {
                Some(format!("NOT NULL is {}, expected {}", actual.non_null, expected.non_null))
            } else if bare_default(actual.default_value.as_deref())
                != bare_default(expected.default_value)
            {
                Some(format!(
                    "default {:?}, expected {:?}",
                    actual.default_value, expected.default_value
                ))
            } else if actual.is_primary_key != expected.is_primary_key {
                Some(format!(
                    "PRIMARY KEY is {}, expected {}",
                    actual.is_primary_key, expected.is_primary_key
                ))
            } else {
                None
            };
            if let Some(mismatch) = mismatch {
                bail!("Table {} column {}: {}", self.name, expected.name, mismatch);
            }
        }
        Ok(())
    }

    /// Column sets of every UNIQUE index on the table, each sorted.
    fn unique_column_sets(&self, conn: &Connection) -> Result<Vec<Vec<String>>> {
        let mut list_stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_indices = list_stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut column_sets = Vec::new();
        for (index_name, _) in unique_indices.iter().filter(|(_, unique)| *unique == 1) {
            let mut info_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut columns = info_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            columns.sort();
            column_sets.push(columns);
        }
        Ok(column_sets)
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        if self.unique_constraints.is_empty() {
            return Ok(());
        }
        let column_sets = self.unique_column_sets(conn)?;
        for expected in self.unique_constraints {
            let mut wanted: Vec<&str> = expected.to_vec();
            wanted.sort_unstable();
            let present = column_sets.iter().any(|set| {
                set.len() == wanted.len() && set.iter().zip(&wanted).all(|(a, b)| a == b)
            });
            if !present {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        // foreign_key_list columns: id, seq, table, from, to, on_update, on_delete, match
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let actual = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for column in self.columns {
            let Some(fk) = column.foreign_key else {
                continue;
            };
            let expected = format!(
                "REFERENCES {}({}) ON DELETE {}",
                fk.foreign_table,
                fk.foreign_column,
                fk.on_delete.as_sql()
            );
            let found = actual
                .iter()
                .find(|(from, ..)| from == column.name)
                .map(|(_, table, to, on_delete)| {
                    format!("REFERENCES {}({}) ON DELETE {}", table, to, on_delete)
                });
            match found {
                Some(found) if found == expected => {}
                Some(found) => bail!(
                    "Table {} column {} has foreign key mismatch: expected {}, got {}",
                    self.name,
                    column.name,
                    expected,
                    found
                ),
                None => bail!(
                    "Table {} column {} is missing foreign key: expected {}",
                    self.name,
                    column.name,
                    expected
                ),
            }
        }
        Ok(())
    }
}

/// One step of a store's schema history.
///
/// `tables` lists every table that exists at this version. `migration` turns a
/// database at `version - 1` into one at `version`; it is `None` only for the
/// first version.
pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    /// Create every table of this version on an empty database and record the version.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!(
                "CREATE TABLE {} (version INTEGER NOT NULL);",
                SCHEMA_VERSION_TABLE
            ),
            [],
        )?;
        write_schema_version(conn, self.version)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate_columns(conn)?;
            table.validate_indices(conn)?;
            table.validate_foreign_keys(conn)?;
        }
        Ok(())
    }
}

/// Read the applied schema version, `None` if the version table is absent or empty.
pub fn read_schema_version(conn: &Connection) -> Result<Option<usize>> {
    let has_table = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
            params![SCHEMA_VERSION_TABLE],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_table {
        return Ok(None);
    }

    match conn.query_row(
        &format!("SELECT version FROM {} LIMIT 1", SCHEMA_VERSION_TABLE),
        [],
        |r| r.get::<_, i64>(0),
    ) {
        Ok(version) if version >= 0 => Ok(Some(version as usize)),
        Ok(version) => bail!("Invalid schema version {}", version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_schema_version(conn: &Connection, version: usize) -> Result<()> {
    conn.execute(&format!("DELETE FROM {}", SCHEMA_VERSION_TABLE), [])?;
    conn.execute(
        &format!("INSERT INTO {} (version) VALUES (?1)", SCHEMA_VERSION_TABLE),
        params![version as i64],
    )?;
    Ok(())
}
