use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use fieldops_core::{DocumentNumber, NumberingScheme, SequenceKind};

use super::RepositoryError;

/// Bumps and returns the counter for `kind` in the period containing `at`.
///
/// A single upsert statement, so two callers can never observe the same value.
/// Run inside the caller's transaction to make the allocation roll back with it.
pub(crate) async fn allocate(
    conn: &mut SqliteConnection,
    scheme: &NumberingScheme,
    kind: SequenceKind,
    at: DateTime<Utc>,
) -> Result<DocumentNumber, RepositoryError> {
    let period = NumberingScheme::period(at);
    let value: i64 = sqlx::query_scalar(
        "INSERT INTO document_sequence (scheme, period, last_value)
         VALUES (?, ?, 1)
         ON CONFLICT(scheme, period) DO UPDATE SET last_value = last_value + 1
         RETURNING last_value",
    )
    .bind(kind.as_str())
    .bind(period)
    .fetch_one(&mut *conn)
    .await?;

    let value = u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("sequence `{}` returned {value}", kind.as_str()))
    })?;
    Ok(scheme.format(kind, period, value))
}
