use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{BookingRequest, RecurrenceRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertPeriod {
        id: PeriodId,
        name: String,
    },
    InsertEmployee {
        employee: Employee,
    },
    InsertConstraint {
        key: ConstraintKey,
        value: i64,
    },
    DeleteConstraint {
        key: ConstraintKey,
    },
    InsertBlockedRange {
        id: Ulid,
        from: Day,
        to: Day,
        reason: String,
    },
    DeleteBlockedRange {
        id: Ulid,
    },
    InsertOverride {
        id: Ulid,
        person: PersonId,
        date: Day,
    },
    DeleteOverride {
        id: Ulid,
    },
    InsertLeaveRequest {
        id: Ulid,
        person: PersonId,
        date: Day,
        category: Category,
        description: String,
        returning: bool,
    },
    ReviewLeaveRequest {
        id: Ulid,
        decision: Decision,
    },
    DeleteLeaveRequest {
        id: Ulid,
    },
    InsertRoomBooking {
        request: BookingRequest,
    },
    InsertRecurringBooking {
        request: RecurrenceRequest,
        returning: bool,
    },
    UpdateRoomBooking {
        id: Ulid,
        start_period: PeriodId,
        end_period: PeriodId,
        description: Option<String>,
    },
    DeleteRoomBooking {
        id: Ulid,
    },
    DeleteRecurringBooking {
        id: Ulid,
    },
    /// Any bookable row by id: booking, series template or leave request.
    DeleteAny {
        id: Ulid,
    },
    SelectLeaveRequests {
        filter: LeaveFilter,
    },
    SelectRoomBookings {
        room_ids: Vec<Ulid>,
        date: Day,
    },
    SelectSeriesBookings {
        template_id: Ulid,
    },
    SelectConflicts {
        room_id: Ulid,
        date: Day,
        start_period: PeriodId,
        end_period: PeriodId,
    },
    SelectQuota {
        person: PersonId,
    },
    SelectRecurringBookings,
    SelectConstraints,
    SelectRooms,
    SelectPeriods,
    SelectEmployees,
    SelectOverrides,
    SelectBlockedRanges,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    parse_statement(stmt)
}

/// Every `;`-separated statement of a simple query, in order.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table whose rows a statement returns, used to describe result columns
/// before parameters are bound. `None` when the statement returns no rows.
pub fn result_table(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Insert(insert) if insert.returning.is_some() => match insert_table_name(insert).ok()?.as_str() {
            "leave_requests" => Some("leave_receipt".into()),
            "recurring_bookings" => Some("series_receipt".into()),
            _ => None,
        },
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            require_arity("rooms", 2, &values)?;
            Ok(Command::InsertRoom {
                id: parse_ulid_expr(&values[0])?,
                name: parse_text(&values[1])?,
            })
        }
        "periods" => {
            require_arity("periods", 2, &values)?;
            Ok(Command::InsertPeriod {
                id: parse_u32(&values[0])?,
                name: parse_text(&values[1])?,
            })
        }
        "employees" => {
            require_arity("employees", 2, &values)?;
            let role_text = parse_text(&values[1])?;
            let role = Role::parse(&role_text).ok_or_else(|| SqlError::Parse(format!("unknown role: {role_text}")))?;
            let quota_override = match values.get(2) {
                Some(expr) => parse_u32_or_null(expr)?.unwrap_or(0),
                None => 0,
            };
            let email = match values.get(3) {
                Some(expr) => parse_text_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertEmployee {
                employee: Employee {
                    id: parse_text(&values[0])?,
                    role,
                    quota_override,
                    email,
                },
            })
        }
        "constraints" => {
            require_arity("constraints", 2, &values)?;
            Ok(Command::InsertConstraint {
                key: parse_constraint_key(&values[0])?,
                value: parse_i64_expr(&values[1])?,
            })
        }
        "blocked_ranges" => {
            require_arity("blocked_ranges", 3, &values)?;
            let reason = match values.get(3) {
                Some(expr) => parse_text_or_null(expr)?.unwrap_or_default(),
                None => String::new(),
            };
            Ok(Command::InsertBlockedRange {
                id: parse_ulid_expr(&values[0])?,
                from: parse_day(&values[1])?,
                to: parse_day(&values[2])?,
                reason,
            })
        }
        "overrides" => {
            require_arity("overrides", 3, &values)?;
            Ok(Command::InsertOverride {
                id: parse_ulid_expr(&values[0])?,
                person: parse_text(&values[1])?,
                date: parse_day(&values[2])?,
            })
        }
        "leave_requests" => {
            require_arity("leave_requests", 4, &values)?;
            let code = parse_i64_expr(&values[3])?;
            let category = u16::try_from(code)
                .map(Category)
                .map_err(|_| SqlError::Parse(format!("{code} out of category range")))?;
            Ok(Command::InsertLeaveRequest {
                id: parse_ulid_expr(&values[0])?,
                person: parse_text(&values[1])?,
                date: parse_day(&values[2])?,
                category,
                description: optional_text(&values, 4)?,
                returning,
            })
        }
        "room_bookings" => {
            require_arity("room_bookings", 6, &values)?;
            Ok(Command::InsertRoomBooking {
                request: BookingRequest {
                    id: parse_ulid_expr(&values[0])?,
                    room_id: parse_ulid_expr(&values[1])?,
                    date: parse_day(&values[2])?,
                    start_period: parse_u32(&values[3])?,
                    end_period: parse_u32(&values[4])?,
                    owner: parse_text(&values[5])?,
                    description: optional_text(&values, 6)?,
                },
            })
        }
        "recurring_bookings" => {
            require_arity("recurring_bookings", 8, &values)?;
            let frequency = match parse_text(&values[7])?.to_lowercase().as_str() {
                "daily" => Frequency::Daily,
                "weekly" => {
                    let days = match values.get(8) {
                        Some(expr) => parse_text_or_null(expr)?.unwrap_or_default(),
                        None => String::new(),
                    };
                    Frequency::Weekly(WeekdaySet::parse(&days))
                }
                other => return Err(SqlError::Parse(format!("unknown frequency: {other}"))),
            };
            Ok(Command::InsertRecurringBooking {
                request: RecurrenceRequest {
                    id: parse_ulid_expr(&values[0])?,
                    room_id: parse_ulid_expr(&values[1])?,
                    occupant: parse_text(&values[2])?,
                    start_period: parse_u32(&values[3])?,
                    end_period: parse_u32(&values[4])?,
                    from: parse_day(&values[5])?,
                    to: parse_day(&values[6])?,
                    frequency,
                    description: optional_text(&values, 9)?,
                },
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    match table.as_str() {
        "leave_requests" => parse_review(assignments, selection),
        "room_bookings" => parse_booking_edit(assignments, selection),
        _ => Err(SqlError::Unsupported(format!("UPDATE on {table}"))),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        AssignmentTarget::Tuple(_) => None,
    }
}

fn parse_review(assignments: &[ast::Assignment], selection: &Option<Expr>) -> Result<Command, SqlError> {
    let id = extract_where_id(selection)?;

    let mut decision = None;
    for assignment in assignments {
        if assignment_column(assignment).as_deref() != Some("status") {
            return Err(SqlError::Unsupported("only status can be updated".into()));
        }
        let status = parse_text(&assignment.value)?;
        decision = Some(match Status::parse(&status.to_lowercase()) {
            Some(Status::Accepted) => Decision::Accept,
            Some(Status::Rejected) => Decision::Reject,
            _ => return Err(SqlError::Parse(format!("status must be accepted or rejected, got {status}"))),
        });
    }

    Ok(Command::ReviewLeaveRequest {
        id,
        decision: decision.ok_or(SqlError::MissingFilter("status"))?,
    })
}

/// `SET start_period = .., end_period = .. [, description = ..] WHERE id = ..`.
/// Day and room are fixed once booked.
fn parse_booking_edit(assignments: &[ast::Assignment], selection: &Option<Expr>) -> Result<Command, SqlError> {
    let id = extract_where_id(selection)?;

    let (mut start_period, mut end_period, mut description) = (None, None, None);
    for assignment in assignments {
        match assignment_column(assignment).as_deref() {
            Some("start_period") => start_period = Some(parse_u32(&assignment.value)?),
            Some("end_period") => end_period = Some(parse_u32(&assignment.value)?),
            Some("description") => description = Some(parse_text(&assignment.value)?),
            Some(other) => return Err(SqlError::Unsupported(format!("room_bookings.{other} cannot be updated"))),
            None => return Err(SqlError::Unsupported("tuple assignment".into())),
        }
    }

    Ok(Command::UpdateRoomBooking {
        id,
        start_period: start_period.ok_or(SqlError::MissingColumn("start_period"))?,
        end_period: end_period.ok_or(SqlError::MissingColumn("end_period"))?,
        description,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    if table == "constraints" {
        let key = extract_where_eq(&delete.selection, "key")?;
        return Ok(Command::DeleteConstraint {
            key: parse_constraint_key(key)?,
        });
    }

    let id = extract_where_id(&delete.selection)?;
    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "blocked_ranges" => Ok(Command::DeleteBlockedRange { id }),
        "overrides" => Ok(Command::DeleteOverride { id }),
        "leave_requests" => Ok(Command::DeleteLeaveRequest { id }),
        "room_bookings" => Ok(Command::DeleteRoomBooking { id }),
        "recurring_bookings" => Ok(Command::DeleteRecurringBooking { id }),
        "bookings" => Ok(Command::DeleteAny { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters collected from a WHERE clause of `col = value` terms joined by AND.
#[derive(Default)]
struct Filters<'a> {
    terms: Vec<(String, &'a Expr)>,
    in_lists: Vec<(String, &'a [Expr])>,
}

impl<'a> Filters<'a> {
    fn collect(expr: &'a Expr, out: &mut Self) {
        match expr {
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                Self::collect(left, out);
                Self::collect(right, out);
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                if let Some(col) = expr_column_name(left) {
                    out.terms.push((col, right.as_ref()));
                }
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                if let Some(col) = expr_column_name(expr) {
                    out.in_lists.push((col, list.as_slice()));
                }
            }
            Expr::Nested(inner) => Self::collect(inner, out),
            _ => {}
        }
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.terms.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        Filters::collect(selection, &mut filters);
    }

    match table.as_str() {
        "leave_requests" => {
            let mut filter = LeaveFilter::default();
            if let Some(e) = filters.get("person") {
                filter.person = Some(parse_text(e)?);
            }
            if let Some(e) = filters.get("date") {
                filter.date = Some(parse_day(e)?);
            }
            if let Some(e) = filters.get("status") {
                let s = parse_text(e)?;
                filter.status = Some(Status::parse(&s.to_lowercase()).ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))?);
            }
            if let Some(e) = filters.get("category") {
                filter.category = Some(Category(parse_u16(e)?));
            }
            Ok(Command::SelectLeaveRequests { filter })
        }
        "room_bookings" => {
            if let Some(e) = filters.get("template_id") {
                return Ok(Command::SelectSeriesBookings {
                    template_id: parse_ulid_expr(e)?,
                });
            }
            let room_ids = match filters.get("room_id") {
                Some(e) => vec![parse_ulid_expr(e)?],
                None => match filters.in_lists.iter().find(|(c, _)| c == "room_id") {
                    Some((_, list)) => list.iter().map(parse_ulid_expr).collect::<Result<_, _>>()?,
                    None => return Err(SqlError::MissingFilter("room_id")),
                },
            };
            Ok(Command::SelectRoomBookings {
                room_ids,
                date: parse_day(filters.require("date")?)?,
            })
        }
        "conflicts" => Ok(Command::SelectConflicts {
            room_id: parse_ulid_expr(filters.require("room_id")?)?,
            date: parse_day(filters.require("date")?)?,
            start_period: parse_u32(filters.require("start_period")?)?,
            end_period: parse_u32(filters.require("end_period")?)?,
        }),
        "quota" => Ok(Command::SelectQuota {
            person: parse_text(filters.require("person")?)?,
        }),
        "recurring_bookings" => Ok(Command::SelectRecurringBookings),
        "constraints" => Ok(Command::SelectConstraints),
        "rooms" => Ok(Command::SelectRooms),
        "periods" => Ok(Command::SelectPeriods),
        "employees" => Ok(Command::SelectEmployees),
        "overrides" => Ok(Command::SelectOverrides),
        "blocked_ranges" => Ok(Command::SelectBlockedRanges),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn require_arity(table: &'static str, min: usize, values: &[Expr]) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_eq<'a>(selection: &'a Option<Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(column) => Ok(right.as_ref()),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    parse_ulid_expr(extract_where_eq(selection, "id")?)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn optional_text(values: &[Expr], idx: usize) -> Result<String, SqlError> {
    match values.get(idx) {
        Some(expr) => Ok(parse_text_or_null(expr)?.unwrap_or_default()),
        None => Ok(String::new()),
    }
}

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_constraint_key(expr: &Expr) -> Result<ConstraintKey, SqlError> {
    let s = parse_text(expr)?;
    ConstraintKey::parse(&s.to_lowercase()).ok_or_else(|| SqlError::Parse(format!("unknown constraint key: {s}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.parse().map_err(|e| SqlError::Parse(format!("bad i64: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_u32(expr)?)),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
}
