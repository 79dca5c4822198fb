use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use fieldops_core::{
    ClientId, DocumentNumber, Invoice, InvoiceId, InvoiceParts, InvoiceStatus, LineItem,
    LineItemInput, MissionId, Quote, QuoteId, QuoteParts, QuoteStatus, UserId,
};

use super::RepositoryError;

pub(crate) const QUOTE_COLUMNS: &str = "id, number, client_id, mission_id, title, description,
    created_at, valid_until, vat_rate, status, direction_validated_at, direction_comment,
    validated_by, client_responded_at, client_comment, invoice_id, version";

pub(crate) const INVOICE_COLUMNS: &str = "id, number, quote_id, client_id, vat_rate,
    amount_excl_tax, amount_incl_tax, status, issued_at, due_at, paid_at, payment_method,
    payment_reference, version";

/// Fixed-width UTC form so that text comparison in SQL matches time order.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp)
}

pub(crate) fn date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub(crate) fn version(value: u32) -> i64 {
    i64::from(value)
}

pub(crate) async fn quote_from_row(
    conn: &mut SqliteConnection,
    row: SqliteRow,
) -> Result<Quote, RepositoryError> {
    let id: String = row.try_get("id")?;
    let status_raw: String = row.try_get("status")?;
    let status = QuoteStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{status_raw}`")))?;
    let lines = load_lines(conn, "quote_line", "quote_id", &id).await?;

    let parts = QuoteParts {
        number: DocumentNumber(row.try_get("number")?),
        client_id: ClientId(row.try_get("client_id")?),
        mission_id: row.try_get::<Option<String>, _>("mission_id")?.map(MissionId),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        valid_until: parse_date("valid_until", row.try_get("valid_until")?)?,
        vat_rate: parse_decimal("vat_rate", row.try_get("vat_rate")?)?,
        lines,
        status,
        direction_validated_at: parse_optional_timestamp(
            "direction_validated_at",
            row.try_get("direction_validated_at")?,
        )?,
        direction_comment: row.try_get("direction_comment")?,
        validated_by: row.try_get::<Option<String>, _>("validated_by")?.map(UserId),
        client_responded_at: parse_optional_timestamp(
            "client_responded_at",
            row.try_get("client_responded_at")?,
        )?,
        client_comment: row.try_get("client_comment")?,
        invoice_id: row.try_get::<Option<String>, _>("invoice_id")?.map(InvoiceId),
        version: parse_u32("version", row.try_get("version")?)?,
        id: QuoteId(id),
    };

    Ok(Quote::restore(parts)?)
}

pub(crate) async fn invoice_from_row(
    conn: &mut SqliteConnection,
    row: SqliteRow,
) -> Result<Invoice, RepositoryError> {
    let id: String = row.try_get("id")?;
    let status_raw: String = row.try_get("status")?;
    let status = InvoiceStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invoice status `{status_raw}`")))?;
    let lines = load_lines(conn, "invoice_line", "invoice_id", &id).await?;

    let parts = InvoiceParts {
        number: DocumentNumber(row.try_get("number")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        client_id: ClientId(row.try_get("client_id")?),
        vat_rate: parse_decimal("vat_rate", row.try_get("vat_rate")?)?,
        lines,
        amount_excl_tax: parse_decimal("amount_excl_tax", row.try_get("amount_excl_tax")?)?,
        amount_incl_tax: parse_decimal("amount_incl_tax", row.try_get("amount_incl_tax")?)?,
        status,
        issued_at: parse_timestamp("issued_at", row.try_get("issued_at")?)?,
        due_at: parse_timestamp("due_at", row.try_get("due_at")?)?,
        paid_at: parse_optional_timestamp("paid_at", row.try_get("paid_at")?)?,
        payment_method: row.try_get("payment_method")?,
        payment_reference: row.try_get("payment_reference")?,
        version: parse_u32("version", row.try_get("version")?)?,
        id: InvoiceId(id),
    };

    Ok(Invoice::restore(parts)?)
}

async fn load_lines(
    conn: &mut SqliteConnection,
    table: &str,
    owner_column: &str,
    owner_id: &str,
) -> Result<Vec<LineItemInput>, RepositoryError> {
    let sql = format!(
        "SELECT designation, quantity, unit_price
         FROM {table}
         WHERE {owner_column} = ?
         ORDER BY line_order ASC"
    );
    let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&mut *conn).await?;

    rows.into_iter()
        .map(|row| -> Result<LineItemInput, RepositoryError> {
            Ok(LineItemInput {
                designation: row.try_get("designation")?,
                quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
                unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
            })
        })
        .collect()
}

/// Replaces the owner's lines. `table` and `owner_column` are compile-time constants.
pub(crate) async fn write_lines(
    conn: &mut SqliteConnection,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    lines: &[LineItem],
) -> Result<(), RepositoryError> {
    sqlx::query(&format!("DELETE FROM {table} WHERE {owner_column} = ?"))
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    let insert = format!(
        "INSERT INTO {table} ({owner_column}, line_order, designation, quantity, unit_price)
         VALUES (?, ?, ?, ?, ?)"
    );
    for line in lines {
        sqlx::query(&insert)
            .bind(owner_id)
            .bind(i64::from(line.order()))
            .bind(line.designation())
            .bind(line.quantity().to_string())
            .bind(line.unit_price().to_string())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|error| error.is_unique_violation())
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
