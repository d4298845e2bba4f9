//! Typed, driver-independent query results
//!
//! Both the MySQL and PostgreSQL connections convert whatever their driver returns into a
//! [`ResultSet`], so that callers never need to know which kind of database produced a row.

use std::fmt::{self, Display};

/// A single column value, as returned by a query
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Interpret this value as a number, if it has a numeric meaning.
    ///
    /// Text is parsed as a float, with the boolean spellings used by PostgreSQL and MySQL (`t`,
    /// `f`, `on`, `off`, `yes`, `no`, `true`, `false`) mapped to `1.0` and `0.0`. Returns `None`
    /// for `NULL` and for text that isn't a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => parse_numeric_text(s),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn parse_numeric_text(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "on" | "yes" => Some(1.0),
        "f" | "false" | "off" | "no" => Some(0.0),
        _ => s.parse::<f64>().ok(),
    }
}

/// Displays the value the way it should appear as a metric label; `NULL` is the empty string.
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map(Value::from).unwrap_or(Value::Null)
    }
}

impl From<mysql_async::Value> for Value {
    fn from(value: mysql_async::Value) -> Self {
        use mysql_async::Value as V;

        match value {
            V::NULL => Value::Null,
            V::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
            V::Int(i) => Value::Int(i),
            V::UInt(u) => i64::try_from(u)
                .map(Value::Int)
                .unwrap_or(Value::Float(u as f64)),
            V::Float(f) => Value::Float(f.into()),
            V::Double(d) => Value::Float(d),
            V::Date(year, month, day, hour, minute, second, _) => Value::Text(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )),
            V::Time(negative, days, hours, minutes, seconds, _) => Value::Text(format!(
                "{}{:02}:{minutes:02}:{seconds:02}",
                if negative { "-" } else { "" },
                days * 24 + u32::from(hours),
            )),
        }
    }
}

/// The full result of running one query: column names in result order, plus rows of values in the
/// same order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Construct a new [`ResultSet`]. Rows shorter than `columns` are padded with `NULL`, and any
    /// extra trailing values are dropped.
    pub fn new<C, S>(columns: C, rows: Vec<Vec<Value>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over the rows of this result set, in the order they were returned by the database
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Returns the first value of the first row, if any
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// A borrowed view of one row of a [`ResultSet`]
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Iterate over `(column name, value)` pairs in result order
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Look up a value by column name, case-insensitively
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Look up a value by position
    pub fn get_index(&self, idx: usize) -> Option<&'a Value> {
        self.values.get(idx)
    }
}

/// One server configuration setting, as reported by the server itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub name: String,
    pub value: String,
    /// Unit the value is expressed in (eg `ms` or `8kB`); always `None` for MySQL
    pub unit: Option<String>,
    pub description: String,
}
