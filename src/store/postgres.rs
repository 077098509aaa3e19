//! PostgreSQL ledger store.
//!
//! # Atomicity
//!
//! `commit` runs in one database transaction:
//! 1. `UPDATE invoices ... WHERE id = $1 AND version = $2` (row lock + version check)
//! 2. count the stored payments under that lock
//! 3. insert only the appended payments
//!
//! The unique index on `invoice_payments.reference` makes a reused reference
//! fail the insert, which rolls the whole commit back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CommitOutcome, LedgerStore, check_integrity};
use crate::db::DbPool;
use crate::error::StoreError;
use crate::models::invoice::{Invoice, InvoiceRecord, Payment};

const INVOICE_COLUMNS: &str = "id, invoice_number, business_id, customer_name, customer_phone, \
     description, due_date, total_amount, amount_paid, status, confirmed, confirmed_at, \
     view_count, last_opened_at, last_link_sent_at, version, created_at, updated_at";

/// Payment row tagged with its invoice, for batched loads.
#[derive(sqlx::FromRow)]
struct PaymentRow {
    invoice_id: Uuid,
    #[sqlx(flatten)]
    payment: Payment,
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
}

impl PgLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT amount, method, paid_at, reference
            FROM invoice_payments
            WHERE invoice_id = $1
            ORDER BY seq
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn hydrate(&self, record: Option<InvoiceRecord>) -> Result<Option<Invoice>, StoreError> {
        match record {
            Some(record) => {
                let payments = self.load_payments(record.id).await?;
                Ok(Some(Invoice::from_record(record, payments)))
            }
            None => Ok(None),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert(&self, invoice: &Invoice) -> Result<(), StoreError> {
        check_integrity(invoice)?;
        let record = invoice.to_record();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, business_id, customer_name, customer_phone,
                description, due_date, total_amount, amount_paid, status,
                confirmed, confirmed_at, view_count, last_opened_at, last_link_sent_at,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(record.id)
        .bind(&record.invoice_number)
        .bind(record.business_id)
        .bind(&record.customer_name)
        .bind(&record.customer_phone)
        .bind(&record.description)
        .bind(record.due_date)
        .bind(record.total_amount)
        .bind(record.amount_paid)
        .bind(&record.status)
        .bind(record.confirmed)
        .bind(record.confirmed_at)
        .bind(record.view_count)
        .bind(record.last_opened_at)
        .bind(record.last_link_sent_at)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            tx.rollback().await?;
            if is_unique_violation(&err) {
                return Err(StoreError::DuplicateNumber);
            }
            return Err(err.into());
        }

        for (seq, payment) in invoice.payments().iter().enumerate() {
            insert_payment(&mut tx, record.id, seq as i32, payment).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let record = sqlx::query_as::<_, InvoiceRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.hydrate(record).await
    }

    async fn get_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, StoreError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = $1");
        let record = sqlx::query_as::<_, InvoiceRecord>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;

        self.hydrate(record).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Invoice>, StoreError> {
        let invoice_id: Option<Uuid> =
            sqlx::query_scalar("SELECT invoice_id FROM invoice_payments WHERE reference = $1")
                .bind(reference)
                .fetch_optional(&self.pool)
                .await?;

        match invoice_id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn list_for_business(&self, business_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE business_id = $1 ORDER BY created_at DESC"
        );
        let records = sqlx::query_as::<_, InvoiceRecord>(&sql)
            .bind(business_id)
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT invoice_id, amount, method, paid_at, reference
            FROM invoice_payments
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, seq
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut payments: HashMap<Uuid, Vec<Payment>> = HashMap::new();
        for row in rows {
            payments.entry(row.invoice_id).or_default().push(row.payment);
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let list = payments.remove(&record.id).unwrap_or_default();
                Invoice::from_record(record, list)
            })
            .collect())
    }

    async fn commit(&self, invoice: &Invoice) -> Result<CommitOutcome, StoreError> {
        check_integrity(invoice)?;
        let record = invoice.to_record();
        let mut tx = self.pool.begin().await?;

        // Version check and row lock in one statement
        let sql = format!(
            r#"
            UPDATE invoices
            SET customer_name = $3,
                customer_phone = $4,
                description = $5,
                due_date = $6,
                total_amount = $7,
                amount_paid = $8,
                status = $9,
                confirmed = $10,
                confirmed_at = $11,
                updated_at = $12,
                version = version + 1
            WHERE id = $1 AND version = $2
              AND invoice_number = $13 AND business_id = $14
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, InvoiceRecord>(&sql)
            .bind(record.id)
            .bind(record.version)
            .bind(&record.customer_name)
            .bind(&record.customer_phone)
            .bind(&record.description)
            .bind(record.due_date)
            .bind(record.total_amount)
            .bind(record.amount_paid)
            .bind(&record.status)
            .bind(record.confirmed)
            .bind(record.confirmed_at)
            .bind(record.updated_at)
            .bind(&record.invoice_number)
            .bind(record.business_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(CommitOutcome::VersionConflict);
        };

        let stored_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM invoice_payments WHERE invoice_id = $1")
                .bind(record.id)
                .fetch_one(&mut *tx)
                .await?;
        let stored_count = stored_count as usize;

        if stored_count > invoice.payments().len() {
            tx.rollback().await?;
            return Err(StoreError::Integrity(format!(
                "invoice {} payments are append-only",
                record.id
            )));
        }

        for (seq, payment) in invoice.payments().iter().enumerate().skip(stored_count) {
            if let Err(err) = insert_payment(&mut tx, record.id, seq as i32, payment).await {
                tx.rollback().await?;
                return match (err, &payment.reference) {
                    (StoreError::Database(db), Some(reference)) if is_unique_violation(&db) => {
                        Ok(CommitOutcome::DuplicateReference(reference.clone()))
                    }
                    (err, _) => Err(err),
                };
            }
        }

        tx.commit().await?;

        Ok(CommitOutcome::Committed(Invoice::from_record(
            updated,
            invoice.payments().to_vec(),
        )))
    }

    async fn delete(&self, id: Uuid, business_id: Uuid) -> Result<bool, StoreError> {
        // invoice_payments rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1 AND business_id = $2")
            .bind(id)
            .bind(business_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_view(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE invoices SET view_count = view_count + 1, last_opened_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_link_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE invoices SET last_link_sent_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_payment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice_id: Uuid,
    seq: i32,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO invoice_payments (invoice_id, seq, amount, method, paid_at, reference)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(invoice_id)
    .bind(seq)
    .bind(payment.amount)
    .bind(&payment.method)
    .bind(payment.date)
    .bind(&payment.reference)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
