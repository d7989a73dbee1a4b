//! Postgres-backed storage.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `BackendError` kinds as follows; the SQLx error is
//! always kept as the nested cause:
//!
//! | SQLx Error | PostgreSQL Error Code | BackendErrorKind |
//! |------------|----------------------|------------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Other` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` |
//! | ColumnDecode / ColumnNotFound / Decode | N/A | `Decode` |
//! | Other | N/A | `Other` |
//!
//! ## Tenant Isolation
//!
//! Every quote and payment query includes `tenant_id` in the WHERE clause, and
//! updates match on `(id, tenant_id)` without ever writing `tenant_id`. The one
//! exception is `entry_state`, which looks a row up by `id` alone so the store
//! can see who owns it before deciding whether a write is allowed.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, PgConnection, PgPool, Postgres, Row};
use tracing::{Span, field, instrument};
use uuid::Uuid;

use strike_core::{Entity, Payment, Quote, RecordId, TenantId, TenantOwned};

use super::{Change, EntryState, PaymentQuery, QuoteQuery, Record, RecordKind, StorageProvider, StorageSession};
use crate::config::DatabaseConfig;
use crate::error::{BackendError, BackendErrorKind};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS strike_quotes (
        id              UUID PRIMARY KEY,
        tenant_id       TEXT NOT NULL,
        invoice_id      TEXT NOT NULL,
        payment_hash    TEXT NOT NULL,
        observed        BOOLEAN NOT NULL DEFAULT FALSE,
        paid            BOOLEAN NOT NULL DEFAULT FALSE,
        paid_convert_to TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS strike_quotes_tenant_invoice_idx ON strike_quotes (tenant_id, invoice_id)",
    "CREATE INDEX IF NOT EXISTS strike_quotes_tenant_hash_idx ON strike_quotes (tenant_id, payment_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS strike_payments (
        id           UUID PRIMARY KEY,
        tenant_id    TEXT NOT NULL,
        payment_hash TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS strike_payments_tenant_created_idx ON strike_payments (tenant_id, created_at DESC)",
];

/// Postgres storage provider.
///
/// Each session holds one pooled connection for its whole lifetime; the
/// connection goes back to the pool when the session is dropped or closed.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Create the quote/payment tables and their indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl StorageProvider for PostgresStorage {
    type Session = PostgresSession;

    async fn open(&self) -> Result<PostgresSession, BackendError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;

        Ok(PostgresSession { conn })
    }
}

/// One pooled connection.
#[derive(Debug)]
pub struct PostgresSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait::async_trait]
impl StorageSession for PostgresSession {
    #[instrument(
        skip(self, query),
        fields(operation = "fetch_quotes", tenant_id = %query.tenant_id, rows = field::Empty)
    )]
    async fn fetch_quotes(&mut self, query: &QuoteQuery) -> Result<Vec<Quote>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                tenant_id,
                invoice_id,
                payment_hash,
                observed,
                paid,
                paid_convert_to
            FROM strike_quotes
            WHERE tenant_id = $1
                AND ($2::boolean IS NULL OR observed = $2)
                AND ($3::boolean IS NULL OR paid = $3)
                AND ($4::boolean IS NULL OR (paid_convert_to IS NOT NULL) = $4)
                AND ($5::text IS NULL OR invoice_id = $5)
                AND ($6::text IS NULL OR payment_hash = $6)
            LIMIT $7::bigint
            "#,
        )
        .bind(query.tenant_id.as_str())
        .bind(query.observed)
        .bind(query.paid)
        .bind(query.has_paid_convert_to)
        .bind(query.invoice_id.as_deref())
        .bind(query.payment_hash.as_deref())
        .bind(query.limit.map(to_i64))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_quotes", e))?;

        Span::current().record("rows", rows.len());
        rows.iter().map(quote_from_row).collect()
    }

    #[instrument(
        skip(self, query),
        fields(
            operation = "fetch_payments",
            tenant_id = %query.tenant_id,
            only_completed = query.only_completed,
            offset = query.offset,
            rows = field::Empty
        )
    )]
    async fn fetch_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                tenant_id,
                payment_hash,
                created_at,
                completed_at
            FROM strike_payments
            WHERE tenant_id = $1
                AND ($2::text IS NULL OR payment_hash = $2)
                AND (NOT $3 OR completed_at IS NOT NULL)
            ORDER BY created_at DESC
            OFFSET $4
            LIMIT $5::bigint
            "#,
        )
        .bind(query.tenant_id.as_str())
        .bind(query.payment_hash.as_deref())
        .bind(query.only_completed)
        .bind(to_i64(query.offset))
        .bind(query.limit.map(to_i64))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_payments", e))?;

        Span::current().record("rows", rows.len());
        rows.iter().map(payment_from_row).collect()
    }

    #[instrument(skip(self, kind, id), fields(kind = kind.as_str(), id = %id))]
    async fn entry_state(&mut self, kind: RecordKind, id: RecordId) -> Result<EntryState, BackendError> {
        let sql = match kind {
            RecordKind::Quote => "SELECT tenant_id FROM strike_quotes WHERE id = $1",
            RecordKind::Payment => "SELECT tenant_id FROM strike_payments WHERE id = $1",
        };

        let row = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("entry_state", e))?;

        match row {
            Some(row) => {
                let tenant: String = row
                    .try_get("tenant_id")
                    .map_err(|e| map_sqlx_error("entry_state", e))?;
                Ok(EntryState::Persisted {
                    tenant_id: TenantId::from(tenant),
                })
            }
            None => Ok(EntryState::New),
        }
    }

    #[instrument(skip(self, changes), fields(operation = "commit", changes = changes.len()))]
    async fn commit(&mut self, changes: Vec<Change>) -> Result<(), BackendError> {
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for change in &changes {
            match change {
                Change::Insert(record) => insert_record(&mut tx, record).await?,
                Change::Update(record) => update_record(&mut tx, record).await?,
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn close(self) -> Result<(), BackendError> {
        // Hand the connection back to the pool right away.
        drop(self.conn);
        Ok(())
    }
}

async fn insert_record(conn: &mut PgConnection, record: &Record) -> Result<(), BackendError> {
    let result = match record {
        Record::Quote(q) => {
            sqlx::query(
                r#"
                INSERT INTO strike_quotes (
                    id,
                    tenant_id,
                    invoice_id,
                    payment_hash,
                    observed,
                    paid,
                    paid_convert_to
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(q.id().as_uuid())
            .bind(q.tenant_id().as_str())
            .bind(&q.invoice_id)
            .bind(&q.payment_hash)
            .bind(q.observed)
            .bind(q.paid)
            .bind(q.paid_convert_to.as_deref())
            .execute(&mut *conn)
            .await
        }
        Record::Payment(p) => {
            sqlx::query(
                r#"
                INSERT INTO strike_payments (
                    id,
                    tenant_id,
                    payment_hash,
                    created_at,
                    completed_at
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(p.id().as_uuid())
            .bind(p.tenant_id().as_str())
            .bind(&p.payment_hash)
            .bind(p.created_at)
            .bind(p.completed_at)
            .execute(&mut *conn)
            .await
        }
    };

    result
        .map(|_| ())
        .map_err(|e| map_sqlx_error("insert_record", e))
}

async fn update_record(conn: &mut PgConnection, record: &Record) -> Result<(), BackendError> {
    let result = match record {
        Record::Quote(q) => {
            sqlx::query(
                r#"
                UPDATE strike_quotes
                SET
                    invoice_id = $3,
                    payment_hash = $4,
                    observed = $5,
                    paid = $6,
                    paid_convert_to = $7
                WHERE id = $1 AND tenant_id = $2
                "#,
            )
            .bind(q.id().as_uuid())
            .bind(q.tenant_id().as_str())
            .bind(&q.invoice_id)
            .bind(&q.payment_hash)
            .bind(q.observed)
            .bind(q.paid)
            .bind(q.paid_convert_to.as_deref())
            .execute(&mut *conn)
            .await
        }
        Record::Payment(p) => {
            sqlx::query(
                r#"
                UPDATE strike_payments
                SET
                    payment_hash = $3,
                    created_at = $4,
                    completed_at = $5
                WHERE id = $1 AND tenant_id = $2
                "#,
            )
            .bind(p.id().as_uuid())
            .bind(p.tenant_id().as_str())
            .bind(&p.payment_hash)
            .bind(p.created_at)
            .bind(p.completed_at)
            .execute(&mut *conn)
            .await
        }
    };

    let done = result.map_err(|e| map_sqlx_error("update_record", e))?;
    if done.rows_affected() == 0 {
        return Err(BackendError::not_found(format!(
            "{} {} not found for tenant {}",
            record.kind().as_str(),
            record.id(),
            record.tenant_id()
        )));
    }
    Ok(())
}

fn quote_from_row(row: &PgRow) -> Result<Quote, BackendError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_quote", e);

    Ok(Quote::restore(
        RecordId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        TenantId::from(row.try_get::<String, _>("tenant_id").map_err(decode)?),
        row.try_get("invoice_id").map_err(decode)?,
        row.try_get("payment_hash").map_err(decode)?,
        row.try_get("observed").map_err(decode)?,
        row.try_get("paid").map_err(decode)?,
        row.try_get("paid_convert_to").map_err(decode)?,
    ))
}

fn payment_from_row(row: &PgRow) -> Result<Payment, BackendError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_payment", e);

    Ok(Payment::restore(
        RecordId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        TenantId::from(row.try_get::<String, _>("tenant_id").map_err(decode)?),
        row.try_get("payment_hash").map_err(decode)?,
        row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at").map_err(decode)?,
    ))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Map SQLx errors to backend errors, keeping the SQLx error as the cause.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> BackendError {
    let kind = match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // Unique violation
            Some("23505") => BackendErrorKind::Conflict,
            _ => BackendErrorKind::Other,
        },
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => BackendErrorKind::Unavailable,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => BackendErrorKind::Decode,
        _ => BackendErrorKind::Other,
    };

    BackendError::with_source(kind, format!("database error in {operation}"), err)
}

#[cfg(test)]
mod tests {
    //! Run against a real database only when `STRIKE_TEST_DATABASE_URL` is set.

    use super::*;

    async fn storage() -> PostgresStorage {
        let url = std::env::var("STRIKE_TEST_DATABASE_URL")
            .expect("STRIKE_TEST_DATABASE_URL must be set for ignored postgres tests");
        let storage = PostgresStorage::connect(&DatabaseConfig::new(url))
            .await
            .expect("connect to test database");
        storage.ensure_schema().await.expect("create schema");
        storage
    }

    fn unique_tenant() -> TenantId {
        TenantId::new(format!("pg-test-{}", RecordId::new()))
    }

    #[test]
    fn sqlx_errors_map_to_backend_kinds() {
        let err = map_sqlx_error("insert_record", sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), BackendErrorKind::Unavailable);
        assert_eq!(err.message(), "database error in insert_record");
        assert!(err.inner_message().is_some());

        let err = map_sqlx_error("decode_quote", sqlx::Error::ColumnNotFound("paid".into()));
        assert_eq!(err.kind(), BackendErrorKind::Decode);
    }

    #[tokio::test]
    #[ignore = "requires STRIKE_TEST_DATABASE_URL"]
    async fn quotes_round_trip_and_filter_by_tenant() {
        let storage = storage().await;
        let tenant = unique_tenant();
        let other = unique_tenant();
        let mut session = storage.open().await.unwrap();

        let mut mine = Quote::new("inv-pg-1", "hash-pg-1");
        mine.assign_tenant(tenant.clone());
        let mut theirs = Quote::new("inv-pg-2", "hash-pg-2");
        theirs.assign_tenant(other.clone());

        session
            .commit(vec![
                Change::Insert(Record::Quote(mine.clone())),
                Change::Insert(Record::Quote(theirs)),
            ])
            .await
            .unwrap();

        let found = session.fetch_quotes(&QuoteQuery::unobserved(tenant.clone())).await.unwrap();
        assert_eq!(found, vec![mine.clone()]);

        assert_eq!(
            session.entry_state(RecordKind::Quote, *mine.id()).await.unwrap(),
            EntryState::Persisted { tenant_id: tenant }
        );
        session.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires STRIKE_TEST_DATABASE_URL"]
    async fn payments_page_newest_first() {
        let storage = storage().await;
        let tenant = unique_tenant();
        let mut session = storage.open().await.unwrap();

        let base = Utc::now();
        let mut changes = Vec::new();
        for (created, completed) in [(3, None), (2, Some(5)), (1, Some(4))] {
            let mut p = Payment::new_at(format!("hash-{created}"), base + chrono::Duration::seconds(created));
            p.assign_tenant(tenant.clone());
            p.completed_at = completed.map(|c| base + chrono::Duration::seconds(c));
            changes.push(Change::Insert(Record::Payment(p)));
        }
        session.commit(changes).await.unwrap();

        let page = session
            .fetch_payments(&PaymentQuery::page(tenant, true, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].payment_hash, "hash-1");
    }

    #[tokio::test]
    #[ignore = "requires STRIKE_TEST_DATABASE_URL"]
    async fn update_of_missing_row_is_not_found() {
        let storage = storage().await;
        let mut session = storage.open().await.unwrap();

        let mut ghost = Quote::new("inv-pg-ghost", "hash-pg-ghost");
        ghost.assign_tenant(unique_tenant());

        let err = session
            .commit(vec![Change::Update(Record::Quote(ghost))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::NotFound);
    }

    #[tokio::test]
    #[ignore = "requires STRIKE_TEST_DATABASE_URL"]
    async fn duplicate_insert_is_a_conflict() {
        let storage = storage().await;
        let mut session = storage.open().await.unwrap();

        let mut p = Payment::new("hash-pg-dup");
        p.assign_tenant(unique_tenant());

        session
            .commit(vec![Change::Insert(Record::Payment(p.clone()))])
            .await
            .unwrap();
        let err = session
            .commit(vec![Change::Insert(Record::Payment(p.clone()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::Conflict);

        let found = session
            .fetch_payments(&PaymentQuery::by_payment_hash(p.tenant_id().clone(), "hash-pg-dup"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
