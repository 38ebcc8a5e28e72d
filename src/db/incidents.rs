//! PostgreSQL incident store.
//!
//! The incident document lives in a JSONB column; its audit trail lives in
//! `incident_audit`, which only ever receives inserts. Loading reattaches the
//! audit rows, so the table is the source of truth for history.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::incidents::store::{format_reference, IncidentStore};
use crate::models::{ActorRef, AuditAction, AuditEntry, AuditLog, Incident};

fn db_error(what: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::StorageUnavailable(format!("{}: {}", what, e))
        }
        e => Error::Database(format!("{}: {}", what, e)),
    }
}

#[derive(Clone)]
pub struct PgIncidentStore {
    pool: Arc<PgPool>,
}

impl PgIncidentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Document without its audit log; history is stored row by row
    fn document(incident: &Incident) -> Json<Incident> {
        let mut document = incident.clone();
        document.audit_log = AuditLog::new();
        Json(document)
    }

    async fn insert_audit(
        tx: &mut Transaction<'_, Postgres>,
        incident_id: Uuid,
        entries: &[AuditEntry],
    ) -> Result<()> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO incident_audit (incident_id, seq, actor, action, at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(incident_id)
            .bind(entry.seq as i64)
            .bind(Json(&entry.actor))
            .bind(Json(&entry.action))
            .bind(entry.at)
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to append audit entry"))?;
        }
        Ok(())
    }

    async fn load_audit<'e, E: PgExecutor<'e>>(executor: E, incident_id: Uuid) -> Result<AuditLog> {
        let rows = sqlx::query(
            r#"
            SELECT seq, actor, action, at
            FROM incident_audit
            WHERE incident_id = $1
            ORDER BY seq
            "#,
        )
        .bind(incident_id)
        .fetch_all(executor)
        .await
        .map_err(db_error("Failed to load audit log"))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.try_get("seq").map_err(db_error("Bad audit row"))?;
            let actor: Json<ActorRef> = row.try_get("actor").map_err(db_error("Bad audit row"))?;
            let action: Json<AuditAction> = row.try_get("action").map_err(db_error("Bad audit row"))?;
            let at: DateTime<Utc> = row.try_get("at").map_err(db_error("Bad audit row"))?;
            entries.push(AuditEntry {
                seq: seq as u64,
                actor: actor.0,
                action: action.0,
                at,
            });
        }
        Ok(AuditLog::from_entries(entries))
    }

    async fn hydrate(&self, documents: Vec<Json<Incident>>) -> Result<Vec<Incident>> {
        let mut incidents = Vec::with_capacity(documents.len());
        for Json(mut incident) in documents {
            incident.audit_log = Self::load_audit(&*self.pool, incident.id).await?;
            incidents.push(incident);
        }
        Ok(incidents)
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn insert(&self, incident: &Incident) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO incidents (
                id, reference, institution, location_key, status, archived, reported_at, occurred_at, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(incident.id)
        .bind(&incident.reference)
        .bind(&incident.institution)
        .bind(&incident.location.key)
        .bind(incident.status.to_string())
        .bind(incident.archived)
        .bind(incident.reported_at)
        .bind(incident.occurred_at)
        .bind(Self::document(incident))
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to create incident"))?;

        if inserted.rows_affected() == 0 {
            return Err(Error::Validation(format!("incident {} already exists", incident.id)));
        }
        Self::insert_audit(&mut tx, incident.id, incident.audit_log.entries()).await?;

        tx.commit().await.map_err(db_error("Failed to commit incident"))?;
        debug!("Inserted incident {}", incident.reference);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let document: Option<Json<Incident>> =
            sqlx::query_scalar("SELECT document FROM incidents WHERE id = $1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_error("Failed to get incident by ID"))?;

        match document {
            Some(document) => Ok(self.hydrate(vec![document]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn save(&self, incident: &Incident) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM incidents WHERE id = $1 FOR UPDATE")
            .bind(incident.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to lock incident"))?;
        if locked.is_none() {
            return Err(Error::NotFound(format!("incident {}", incident.id)));
        }

        let stored = Self::load_audit(&mut *tx, incident.id).await?;
        if !incident.audit_log.extends(&stored) {
            warn!("Refusing to rewrite audit history of incident {}", incident.reference);
            return Err(Error::Internal(format!(
                "refusing to rewrite audit history of incident {}",
                incident.id
            )));
        }

        sqlx::query(
            r#"
            UPDATE incidents
            SET status = $2, archived = $3, location_key = $4, occurred_at = $5, document = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(incident.id)
        .bind(incident.status.to_string())
        .bind(incident.archived)
        .bind(&incident.location.key)
        .bind(incident.occurred_at)
        .bind(Self::document(incident))
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update incident"))?;

        Self::insert_audit(&mut tx, incident.id, incident.audit_log.appended_since(&stored)).await?;

        tx.commit().await.map_err(db_error("Failed to commit incident"))?;
        Ok(())
    }

    async fn list(&self, institution: &str) -> Result<Vec<Incident>> {
        let documents: Vec<Json<Incident>> = sqlx::query_scalar(
            r#"
            SELECT document FROM incidents
            WHERE institution = $1
            ORDER BY reported_at, id
            "#,
        )
        .bind(institution)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error("Failed to list incidents"))?;
        self.hydrate(documents).await
    }

    async fn list_at(&self, institution: &str, location_key: &str) -> Result<Vec<Incident>> {
        let documents: Vec<Json<Incident>> = sqlx::query_scalar(
            r#"
            SELECT document FROM incidents
            WHERE institution = $1 AND location_key = $2
            ORDER BY reported_at, id
            "#,
        )
        .bind(institution)
        .bind(location_key)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error("Failed to list incidents at location"))?;
        self.hydrate(documents).await
    }

    async fn all(&self) -> Result<Vec<Incident>> {
        let documents: Vec<Json<Incident>> =
            sqlx::query_scalar("SELECT document FROM incidents ORDER BY reported_at, id")
                .fetch_all(&*self.pool)
                .await
                .map_err(db_error("Failed to list incidents"))?;
        self.hydrate(documents).await
    }

    async fn next_reference(&self, day: NaiveDate) -> Result<String> {
        let sequence: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO incident_references (day, sequence)
            VALUES ($1, 1)
            ON CONFLICT (day) DO UPDATE SET sequence = incident_references.sequence + 1
            RETURNING sequence
            "#,
        )
        .bind(day)
        .fetch_one(&*self.pool)
        .await
        .map_err(db_error("Failed to allocate incident reference"))?;
        Ok(format_reference(day, sequence as u32))
    }
}
