use crate::ast::SqlType;
use crate::SqlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgresql,
    #[default]
    Duckdb,
    Mysql,
    Bigquery,
    Snowflake,
    Redshift,
    Spark,
}

impl Dialect {
    pub const ALL: [Dialect; 8] = [
        Dialect::Sqlite,
        Dialect::Postgresql,
        Dialect::Duckdb,
        Dialect::Mysql,
        Dialect::Bigquery,
        Dialect::Snowflake,
        Dialect::Redshift,
        Dialect::Spark,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgresql => "postgresql",
            Dialect::Duckdb => "duckdb",
            Dialect::Mysql => "mysql",
            Dialect::Bigquery => "bigquery",
            Dialect::Snowflake => "snowflake",
            Dialect::Redshift => "redshift",
            Dialect::Spark => "spark",
        }
    }

    fn tag_stem(self) -> &'static str {
        match self {
            Dialect::Sqlite => "Sqlite",
            Dialect::Postgresql => "Postgresql",
            Dialect::Duckdb => "Duckdb",
            Dialect::Mysql => "Mysql",
            Dialect::Bigquery => "Bigquery",
            Dialect::Snowflake => "Snowflake",
            Dialect::Redshift => "Redshift",
            Dialect::Spark => "Spark",
        }
    }

    /// Dispatch tag of elementwise and window translations.
    pub fn column_tag(self) -> String {
        format!("{}Column", self.tag_stem())
    }

    /// Dispatch tag of aggregate translations.
    pub fn agg_tag(self) -> String {
        format!("{}ColumnAgg", self.tag_stem())
    }

    pub fn quote_char(self) -> char {
        match self {
            Dialect::Mysql | Dialect::Bigquery | Dialect::Spark => '`',
            _ => '"',
        }
    }

    /// Backslash is an escape character inside string literals.
    pub fn escapes_backslash(self) -> bool {
        matches!(self, Dialect::Mysql | Dialect::Bigquery | Dialect::Spark)
    }

    /// `INTERVAL 1 MONTH` rather than `INTERVAL '1 month'`.
    pub fn bare_intervals(self) -> bool {
        matches!(self, Dialect::Mysql | Dialect::Bigquery | Dialect::Spark)
    }

    pub fn type_name(self, ty: SqlType) -> &'static str {
        use Dialect::*;
        match (ty, self) {
            (SqlType::Integer, Mysql) => "SIGNED",
            (SqlType::Integer, Bigquery) => "INT64",
            (SqlType::Integer, Spark) => "INT",
            (SqlType::Integer, _) => "INTEGER",
            (SqlType::Float, Postgresql | Snowflake | Redshift) => "DOUBLE PRECISION",
            (SqlType::Float, Bigquery) => "FLOAT64",
            (SqlType::Float, Sqlite) => "REAL",
            (SqlType::Float, _) => "DOUBLE",
            (SqlType::Numeric, Mysql | Spark) => "DECIMAL",
            (SqlType::Numeric, _) => "NUMERIC",
            (SqlType::Text, Mysql) => "CHAR",
            (SqlType::Text, Bigquery | Spark) => "STRING",
            (SqlType::Text, _) => "TEXT",
            (SqlType::Boolean, Bigquery) => "BOOL",
            (SqlType::Boolean, _) => "BOOLEAN",
        }
    }

    /// Quote an identifier when it is not a plain lowercase name.
    pub fn quote_ident(self, ident: &str) -> String {
        let plain = ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && ident.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !RESERVED.contains(&ident);
        if plain {
            return ident.to_string();
        }
        let q = self.quote_char();
        let escaped = ident.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }
}

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "cast", "cross", "current", "default", "desc", "distinct",
    "else", "end", "exists", "false", "from", "full", "group", "having", "in", "inner", "interval", "is", "join",
    "left", "like", "limit", "not", "null", "on", "or", "order", "outer", "over", "partition", "right", "rows",
    "select", "table", "then", "to", "true", "union", "user", "using", "when", "where", "window", "with",
];

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dialect {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "postgres" => return Ok(Dialect::Postgresql),
            "sparksql" => return Ok(Dialect::Spark),
            _ => {}
        }
        Dialect::ALL
            .into_iter()
            .find(|d| d.name() == lower)
            .ok_or_else(|| SqlError::Unsupported(format!("unknown SQL dialect {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialect() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!("DuckDB".parse::<Dialect>().unwrap(), Dialect::Duckdb);
        assert!("oracle".parse::<Dialect>().is_err());
        assert_eq!(Dialect::default(), Dialect::Duckdb);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(Dialect::Duckdb.quote_ident("x_1"), "x_1");
        assert_eq!(Dialect::Duckdb.quote_ident("Name"), "\"Name\"");
        assert_eq!(Dialect::Duckdb.quote_ident("order"), "\"order\"");
        assert_eq!(Dialect::Mysql.quote_ident("my col"), "`my col`");
        assert_eq!(Dialect::Postgresql.quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_tags_and_types() {
        assert_eq!(Dialect::Postgresql.column_tag(), "PostgresqlColumn");
        assert_eq!(Dialect::Duckdb.agg_tag(), "DuckdbColumnAgg");
        assert_eq!(Dialect::Bigquery.type_name(SqlType::Integer), "INT64");
        assert_eq!(Dialect::Postgresql.type_name(SqlType::Float), "DOUBLE PRECISION");
        assert_eq!(serde_json::to_string(&Dialect::Bigquery).unwrap(), "\"bigquery\"");
    }
}
