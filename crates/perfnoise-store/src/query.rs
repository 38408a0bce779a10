use rusqlite::Row;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};

use crate::{SUMMARY_TABLE, StoreError};

/// A query result: the requested fields that are present on the record.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryField {
    Id,
    Title,
    NumPushes,
    IsDiff,
    MaxDiff,
    NumNewSegments,
    NumOldSegments,
    RelativeNoise,
    DevStatus,
    DevScore,
    LastUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Real,
    Text,
    Flag,
}

impl SummaryField {
    pub const ALL: &'static [SummaryField] = &[
        Self::Id,
        Self::Title,
        Self::NumPushes,
        Self::IsDiff,
        Self::MaxDiff,
        Self::NumNewSegments,
        Self::NumOldSegments,
        Self::RelativeNoise,
        Self::DevStatus,
        Self::DevScore,
        Self::LastUpdated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::NumPushes => "num_pushes",
            Self::IsDiff => "is_diff",
            Self::MaxDiff => "max_diff",
            Self::NumNewSegments => "num_new_segments",
            Self::NumOldSegments => "num_old_segments",
            Self::RelativeNoise => "relative_noise",
            Self::DevStatus => "dev_status",
            Self::DevScore => "dev_score",
            Self::LastUpdated => "last_updated",
        }
    }

    fn kind(self) -> ColumnKind {
        match self {
            Self::Id
            | Self::NumPushes
            | Self::NumNewSegments
            | Self::NumOldSegments
            | Self::LastUpdated => ColumnKind::Integer,
            Self::MaxDiff | Self::RelativeNoise | Self::DevScore => ColumnKind::Real,
            Self::Title | Self::DevStatus => ColumnKind::Text,
            Self::IsDiff => ColumnKind::Flag,
        }
    }
}

impl std::str::FromStr for SummaryField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == value.trim())
            .ok_or_else(|| format!("unknown summary field '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    In { field: SummaryField, values: Vec<Value> },
    Exists(SummaryField),
    Compare {
        field: SummaryField,
        op: CompareOp,
        value: f64,
    },
    And(Vec<Filter>),
}

impl Filter {
    pub fn id_in(ids: impl IntoIterator<Item = i64>) -> Self {
        Self::In {
            field: SummaryField::Id,
            values: ids.into_iter().map(Value::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SummaryField,
    pub direction: SortDirection,
    pub abs: bool,
}

impl Sort {
    pub fn asc(field: SummaryField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
            abs: false,
        }
    }

    pub fn desc(field: SummaryField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
            abs: false,
        }
    }

    pub fn by_abs(mut self) -> Self {
        self.abs = true;
        self
    }
}

pub(crate) struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

pub(crate) fn compile(
    fields: &[SummaryField],
    filter: &Filter,
    sort: Option<&Sort>,
    limit: usize,
) -> Result<CompiledQuery, StoreError> {
    let columns = fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Vec::new();
    let condition = compile_filter(filter, &mut params)?;

    // Absent values sort last regardless of direction; id breaks ties.
    let order = match sort {
        Some(sort) => {
            let expr = if sort.abs {
                format!("ABS({})", sort.field.as_str())
            } else {
                sort.field.as_str().to_owned()
            };
            let direction = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("({expr}) IS NULL ASC, {expr} {direction}, id ASC")
        }
        None => "id ASC".to_owned(),
    };

    params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    let sql = format!(
        "SELECT {columns} FROM {SUMMARY_TABLE} WHERE {condition} ORDER BY {order} LIMIT ?{}",
        params.len()
    );

    Ok(CompiledQuery { sql, params })
}

fn compile_filter(filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
    let condition = match filter {
        Filter::All => "1 = 1".to_owned(),
        Filter::In { field, values } => {
            params.push(SqlValue::Text(serde_json::to_string(values)?));
            format!(
                "{} IN (SELECT value FROM json_each(?{}))",
                field.as_str(),
                params.len()
            )
        }
        Filter::Exists(field) => format!("{} IS NOT NULL", field.as_str()),
        Filter::Compare { field, op, value } => {
            params.push(SqlValue::Real(*value));
            format!("{} {} ?{}", field.as_str(), op.sql(), params.len())
        }
        Filter::And(filters) => {
            if filters.is_empty() {
                return Ok("1 = 1".to_owned());
            }
            let parts = filters
                .iter()
                .map(|inner| compile_filter(inner, params).map(|sql| format!("({sql})")))
                .collect::<Result<Vec<_>, _>>()?;
            parts.join(" AND ")
        }
    };

    Ok(condition)
}

pub(crate) fn read_document(row: &Row<'_>, fields: &[SummaryField]) -> rusqlite::Result<Document> {
    let mut document = Map::new();
    for (index, field) in fields.iter().enumerate() {
        let value = match field.kind() {
            ColumnKind::Integer => row.get::<_, Option<i64>>(index)?.map(Value::from),
            ColumnKind::Real => row
                .get::<_, Option<f64>>(index)?
                .and_then(Number::from_f64)
                .map(Value::Number),
            ColumnKind::Text => row.get::<_, Option<String>>(index)?.map(Value::String),
            ColumnKind::Flag => row.get::<_, Option<bool>>(index)?.map(Value::Bool),
        };
        if let Some(value) = value {
            document.insert(field.as_str().to_owned(), value);
        }
    }

    Ok(document)
}
