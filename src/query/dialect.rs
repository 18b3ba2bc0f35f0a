//! SQL flavour differences the compiler has to care about.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// SQLite 3.
    #[default]
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    Mysql,
    /// Oracle 12c and later.
    Oracle,
    /// Microsoft SQL Server 2012 and later.
    SqlServer,
    /// Apache Derby.
    Derby,
}

impl Dialect {
    /// Every supported dialect.
    pub const ALL: [Dialect; 6] = [
        Dialect::Sqlite,
        Dialect::Postgres,
        Dialect::Mysql,
        Dialect::Oracle,
        Dialect::SqlServer,
        Dialect::Derby,
    ];

    /// Configuration spelling.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sql_server",
            Dialect::Derby => "derby",
        }
    }

    /// Whether the database offers read-committed isolation.
    pub fn supports_read_committed(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// `ESCAPE` clause literal for `LIKE`; MySQL string literals treat `\` as
    /// an escape character themselves.
    pub fn like_escape(self) -> &'static str {
        match self {
            Dialect::Mysql => r"'\\'",
            _ => r"'\'",
        }
    }

    /// Renders `text` as an SQL string literal.
    pub fn string_literal(self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('\'');
        for ch in text.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '\\' if self == Dialect::Mysql => out.push_str(r"\\"),
                _ => out.push(ch),
            }
        }
        out.push('\'');
        out
    }

    /// Whether a row cap needs an `ORDER BY` clause to be valid SQL.
    pub fn row_cap_requires_order(self) -> bool {
        matches!(self, Dialect::SqlServer)
    }

    /// Appends the limit/offset clause, if any.
    pub fn write_row_cap(self, sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
        if limit.is_none() && offset.is_none() {
            return;
        }
        match self {
            Dialect::Sqlite | Dialect::Mysql => {
                match (limit, offset) {
                    (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
                    // both require a LIMIT before OFFSET
                    (None, Some(_)) if self == Dialect::Sqlite => sql.push_str(" LIMIT -1"),
                    (None, Some(_)) => sql.push_str(&format!(" LIMIT {}", u64::MAX)),
                    (None, None) => {}
                }
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            Dialect::Postgres => {
                if let Some(limit) = limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            Dialect::Oracle | Dialect::Derby => {
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset} ROWS"));
                }
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH FIRST {limit} ROWS ONLY"));
                }
            }
            Dialect::SqlServer => {
                sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "oracle" => Ok(Dialect::Oracle),
            "sql_server" | "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "derby" => Ok(Dialect::Derby),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}
