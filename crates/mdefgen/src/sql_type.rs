//! ODBC SQL type tags and typed literal coercion.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// SQL type tag attached to a column in an MDEF snapshot or a harness
/// result document.
///
/// Tags are written as ODBC names (`SQL_INTEGER`, `SQL_WVARCHAR`, ...).
/// Anything unrecognized is kept verbatim in [`SqlType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Char,
    Varchar,
    LongVarchar,
    WChar,
    WVarchar,
    WLongVarchar,
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Numeric,
    Decimal,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Guid,
    Other(String),
}

impl SqlType {
    /// Parse a type tag. Accepts `SQL_` and `SQL_TYPE_` prefixes and any
    /// letter case. Never fails.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let upper = tag.trim().to_ascii_uppercase();
        let bare = upper
            .strip_prefix("SQL_TYPE_")
            .or_else(|| upper.strip_prefix("SQL_"))
            .unwrap_or(&upper);
        match bare {
            "CHAR" => Self::Char,
            "VARCHAR" => Self::Varchar,
            "LONGVARCHAR" => Self::LongVarchar,
            "WCHAR" => Self::WChar,
            "WVARCHAR" => Self::WVarchar,
            "WLONGVARCHAR" => Self::WLongVarchar,
            "BIT" => Self::Bit,
            "TINYINT" => Self::TinyInt,
            "SMALLINT" => Self::SmallInt,
            "INTEGER" => Self::Integer,
            "BIGINT" => Self::BigInt,
            "REAL" => Self::Real,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            "NUMERIC" => Self::Numeric,
            "DECIMAL" => Self::Decimal,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "BINARY" => Self::Binary,
            "VARBINARY" => Self::VarBinary,
            "LONGVARBINARY" => Self::LongVarBinary,
            "GUID" => Self::Guid,
            _ => Self::Other(tag.trim().to_owned()),
        }
    }

    /// Canonical ODBC tag.
    #[must_use]
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Char => "SQL_CHAR",
            Self::Varchar => "SQL_VARCHAR",
            Self::LongVarchar => "SQL_LONGVARCHAR",
            Self::WChar => "SQL_WCHAR",
            Self::WVarchar => "SQL_WVARCHAR",
            Self::WLongVarchar => "SQL_WLONGVARCHAR",
            Self::Bit => "SQL_BIT",
            Self::TinyInt => "SQL_TINYINT",
            Self::SmallInt => "SQL_SMALLINT",
            Self::Integer => "SQL_INTEGER",
            Self::BigInt => "SQL_BIGINT",
            Self::Real => "SQL_REAL",
            Self::Float => "SQL_FLOAT",
            Self::Double => "SQL_DOUBLE",
            Self::Numeric => "SQL_NUMERIC",
            Self::Decimal => "SQL_DECIMAL",
            Self::Date => "SQL_TYPE_DATE",
            Self::Time => "SQL_TYPE_TIME",
            Self::Timestamp => "SQL_TYPE_TIMESTAMP",
            Self::Binary => "SQL_BINARY",
            Self::VarBinary => "SQL_VARBINARY",
            Self::LongVarBinary => "SQL_LONGVARBINARY",
            Self::Guid => "SQL_GUID",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl Serialize for SqlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for SqlType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// A typed SQL literal ready to be spliced into generated query text.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Boolean(bool),
    Integer(i64),
    Double(f64),
}

impl Literal {
    /// Render the literal as SQL text.
    #[must_use]
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d:?}"),
        }
    }
}

/// Coerce raw result-set text into the literal form its SQL type calls for.
///
/// `WVARCHAR`, `WLONGVARCHAR`, `TIMESTAMP` and every unlisted type become
/// quoted strings; `BIT` becomes a boolean, `INTEGER` an integer and
/// `DOUBLE` a float. Text that does not parse as the numeric or boolean
/// type falls back to the quoted form.
#[must_use]
pub fn coerce(text: &str, sql_type: &SqlType) -> Literal {
    let quoted = || Literal::Text(text.to_owned());
    match sql_type {
        SqlType::Bit => parse_bit(text.trim()).map_or_else(quoted, Literal::Boolean),
        SqlType::Integer => text
            .trim()
            .parse::<i64>()
            .map_or_else(|_| quoted(), Literal::Integer),
        SqlType::Double => match text.trim().parse::<f64>() {
            Ok(d) if d.is_finite() => Literal::Double(d),
            _ => quoted(),
        },
        _ => quoted(),
    }
}

fn parse_bit(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_prefixes_and_case() {
        assert_eq!(SqlType::parse("SQL_INTEGER"), SqlType::Integer);
        assert_eq!(SqlType::parse("integer"), SqlType::Integer);
        assert_eq!(SqlType::parse("SQL_TYPE_TIMESTAMP"), SqlType::Timestamp);
        assert_eq!(SqlType::parse("sql_wvarchar"), SqlType::WVarchar);
        assert_eq!(
            SqlType::parse("SQL_INTERVAL_DAY"),
            SqlType::Other("SQL_INTERVAL_DAY".to_owned())
        );
    }

    #[test]
    fn tag_roundtrips_through_serde() {
        let ty: SqlType = serde_json::from_str("\"SQL_DOUBLE\"").unwrap();
        assert_eq!(ty, SqlType::Double);
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"SQL_DOUBLE\"");
    }

    #[test]
    fn coercion_table() {
        assert_eq!(coerce("abc", &SqlType::WVarchar).to_sql(), "'abc'");
        assert_eq!(coerce("long", &SqlType::WLongVarchar).to_sql(), "'long'");
        assert_eq!(
            coerce("2024-01-01 00:00:00", &SqlType::Timestamp).to_sql(),
            "'2024-01-01 00:00:00'"
        );
        assert_eq!(coerce("1", &SqlType::Bit), Literal::Boolean(true));
        assert_eq!(coerce("false", &SqlType::Bit), Literal::Boolean(false));
        assert_eq!(coerce("42", &SqlType::Integer), Literal::Integer(42));
        assert_eq!(coerce("2.5", &SqlType::Double), Literal::Double(2.5));
        assert_eq!(coerce("x", &SqlType::Varchar).to_sql(), "'x'");
    }

    #[test]
    fn unknown_type_falls_back_to_quoted() {
        let ty = SqlType::parse("SQL_SOMETHING_NEW");
        assert_eq!(coerce("7", &ty), Literal::Text("7".to_owned()));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_quoted() {
        assert_eq!(
            coerce("twelve", &SqlType::Integer),
            Literal::Text("twelve".to_owned())
        );
        assert_eq!(coerce("NaN", &SqlType::Double).to_sql(), "'NaN'");
        assert_eq!(coerce("maybe", &SqlType::Bit).to_sql(), "'maybe'");
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(coerce("O'Brien", &SqlType::WVarchar).to_sql(), "'O''Brien'");
    }

    #[test]
    fn doubles_render_with_decimal_point() {
        assert_eq!(Literal::Double(3.0).to_sql(), "3.0");
        assert_eq!(Literal::Integer(-5).to_sql(), "-5");
        assert_eq!(Literal::Boolean(false).to_sql(), "0");
    }
}
