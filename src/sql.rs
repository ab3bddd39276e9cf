use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{RoomPatch, ScheduleRequest, TalkPatch};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertTalk {
        id: Ulid,
        title: String,
        speaker: String,
        subject: String,
        duration_min: u32,
        level: TalkLevel,
        description: Option<String>,
    },
    UpdateTalk {
        id: Ulid,
        patch: TalkPatch,
    },
    /// `UPDATE talks SET status = '…'` — the organizer accept/reject entry
    /// point. Scheduling goes through `INSERT INTO bookings`.
    UpdateTalkStatus {
        id: Ulid,
        status: TalkStatus,
    },
    DeleteTalk {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        talk_id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    },
    BatchInsertBookings {
        bookings: Vec<ScheduleRequest>,
    },
    /// `UPDATE bookings SET …` — reschedule, optionally to another room.
    UpdateBooking {
        id: Ulid,
        room_id: Option<Ulid>,
        start: Ms,
        end: Ms,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectRooms,
    SelectTalks {
        id: Option<Ulid>,
        status: Option<TalkStatus>,
    },
    SelectBookings {
        room_id: Option<Ulid>,
        window: Option<(Ms, Ms)>,
    },
    SelectFreeSlots {
        room_id: Ulid,
        day: i64,
    },
    SelectSlotGrid {
        room_id: Ulid,
        day: i64,
        cell_min: Option<u32>,
    },
    SelectAvailableRooms {
        start: Ms,
        end: Ms,
    },
    SelectConflicts {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("rooms", 3, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                capacity: parse_u32(&values[2])?,
                description: if values.len() >= 4 {
                    parse_string_or_null(&values[3])?
                } else {
                    None
                },
            })
        }
        "talks" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 6 {
                return Err(SqlError::WrongArity("talks", 6, values.len()));
            }
            let level_str = parse_string(&values[5])?;
            let level = TalkLevel::parse(&level_str)
                .ok_or_else(|| SqlError::Parse(format!("unknown level: {level_str}")))?;
            Ok(Command::InsertTalk {
                id: parse_ulid(&values[0])?,
                title: parse_string(&values[1])?,
                speaker: parse_string(&values[2])?,
                subject: parse_string(&values[3])?,
                duration_min: parse_u32(&values[4])?,
                level,
                description: if values.len() >= 7 {
                    parse_string_or_null(&values[6])?
                } else {
                    None
                },
            })
        }
        "bookings" => {
            let all_rows = extract_all_insert_rows(insert)?;
            if all_rows.len() == 1 {
                let values = &all_rows[0];
                if values.len() < 5 {
                    return Err(SqlError::WrongArity("bookings", 5, values.len()));
                }
                Ok(Command::InsertBooking {
                    id: parse_ulid(&values[0])?,
                    talk_id: parse_ulid(&values[1])?,
                    room_id: parse_ulid(&values[2])?,
                    start: parse_i64(&values[3])?,
                    end: parse_i64(&values[4])?,
                })
            } else {
                let mut bookings = Vec::with_capacity(all_rows.len());
                for (i, row) in all_rows.iter().enumerate() {
                    if row.len() < 5 {
                        return Err(SqlError::WrongArity("bookings row", 5, row.len()));
                    }
                    let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                    bookings.push(ScheduleRequest {
                        booking_id: parse_ulid(&row[0]).map_err(row_err)?,
                        talk_id: parse_ulid(&row[1]).map_err(row_err)?,
                        room_id: parse_ulid(&row[2]).map_err(row_err)?,
                        start: parse_i64(&row[3]).map_err(row_err)?,
                        end: parse_i64(&row[4]).map_err(row_err)?,
                    });
                }
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "talks" => Ok(Command::DeleteTalk { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut sets: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty assignment target".into()))?,
            _ => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        sets.push((col, &a.value));
    }
    if sets.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "talks" => {
            if sets.iter().any(|(c, _)| c == "status") {
                if sets.len() > 1 {
                    return Err(SqlError::Unsupported(
                        "status cannot be combined with content updates".into(),
                    ));
                }
                let status_str = parse_string(sets[0].1)?;
                let status = TalkStatus::parse(&status_str)
                    .ok_or_else(|| SqlError::Parse(format!("unknown status: {status_str}")))?;
                return Ok(Command::UpdateTalkStatus { id, status });
            }
            let mut patch = TalkPatch::default();
            for (col, value) in sets {
                match col.as_str() {
                    "title" => patch.title = Some(parse_string(value)?),
                    "subject" => patch.subject = Some(parse_string(value)?),
                    "duration" => patch.duration_min = Some(parse_u32(value)?),
                    "level" => {
                        let s = parse_string(value)?;
                        patch.level = Some(
                            TalkLevel::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("unknown level: {s}")))?,
                        );
                    }
                    "description" => patch.description = Some(parse_string_or_null(value)?),
                    other => {
                        return Err(SqlError::Parse(format!("unknown talks column: {other}")))
                    }
                }
            }
            Ok(Command::UpdateTalk { id, patch })
        }
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (col, value) in sets {
                match col.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "description" => patch.description = Some(parse_string_or_null(value)?),
                    other => {
                        return Err(SqlError::Parse(format!("unknown rooms column: {other}")))
                    }
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "bookings" => {
            let (mut room_id, mut start, mut end) = (None, None, None);
            for (col, value) in sets {
                match col.as_str() {
                    "room_id" => room_id = Some(parse_ulid(value)?),
                    "start" => start = Some(parse_i64(value)?),
                    "end" => end = Some(parse_i64(value)?),
                    other => {
                        return Err(SqlError::Parse(format!("unknown bookings column: {other}")))
                    }
                }
            }
            Ok(Command::UpdateBooking {
                id,
                room_id,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "talks" => {
            let status = match filters.status {
                Some(s) => Some(
                    TalkStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))?,
                ),
                None => None,
            };
            Ok(Command::SelectTalks {
                id: filters.id,
                status,
            })
        }
        "bookings" => {
            let window = match (filters.start_gte, filters.end_lte) {
                (Some(s), Some(e)) => Some((s, e)),
                (None, None) => None,
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
            };
            Ok(Command::SelectBookings {
                room_id: filters.room_id,
                window,
            })
        }
        "free_slots" => Ok(Command::SelectFreeSlots {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
        }),
        "slot_grid" => Ok(Command::SelectSlotGrid {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
            cell_min: filters.cell,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            start: filters.start_gte.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end_lte.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            start: filters.start_gte.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end_lte.ok_or(SqlError::MissingFilter("end"))?,
            exclude: filters.exclude,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Recognized WHERE predicates across the virtual tables. Equality on ids,
/// status, day, cell and exclude; `start >= …` / `"end" <= …` carry query
/// windows, mirroring how a range scan would be written against real tables.
#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    room_id: Option<Ulid>,
    status: Option<String>,
    day: Option<i64>,
    cell: Option<u32>,
    exclude: Option<Ulid>,
    start_gte: Option<Ms>,
    end_lte: Option<Ms>,
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid(right)?),
                Some("room_id") => filters.room_id = Some(parse_ulid(right)?),
                Some("status") => filters.status = Some(parse_string(right)?),
                Some("day") => filters.day = Some(parse_day(right)?),
                Some("cell") => filters.cell = Some(parse_u32(right)?),
                Some("exclude") => filters.exclude = Some(parse_ulid(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start_gte = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end_lte = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// A day is either a UTC epoch-day number or a `'YYYY-MM-DD'` literal.
fn parse_day(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.contains('-')
    {
        return parse_civil_date(s);
    }
    parse_i64(expr)
}

/// `YYYY-MM-DD` → days since the Unix epoch (proleptic Gregorian, UTC).
fn parse_civil_date(s: &str) -> Result<i64, SqlError> {
    let bad = || SqlError::Parse(format!("bad date: {s:?} (expected YYYY-MM-DD)"));
    let mut parts = s.split('-');
    let y: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let m: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let d: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if parts.next().is_some() || !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return Err(bad());
    }
    // Howard Hinnant's days_from_civil.
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Ok(era * 146_097 + doe - 719_468)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
