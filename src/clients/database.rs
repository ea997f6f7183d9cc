use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::Store,
    config::Config,
    models::{
        audit::NewNotificationLog,
        dead_letter::{DeadLetterEntry, DeadLetterStats, NewDeadLetter},
        message::{NotificationMessage, OutboundMessage, OutboxEntry},
        request::{NewRequest, PendingPublish, Request, RequestWithTemplate},
        status::RequestStatus,
        template::{Template, TemplateInput},
    },
};

const TEMPLATE_COLUMNS: &str =
    "id, name, description, subject, html_content, variables, created_at, updated_at";

const REQUEST_COLUMNS: &str =
    "id, user_name, user_email, template_id, data, status, created_at, processed_at";

const DEAD_LETTER_COLUMNS: &str = "id, request_id, user_name, user_email, template_id, data, \
     error_message, retry_count, retry_attempted, failed_at";

#[derive(Clone)]
pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_seconds))
            .connect(&config.database_url)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        info!(
            max_connections = config.db_max_connections,
            "PostgreSQL connection established"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow!("Database migration failed: {}", e))?;

        info!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    description: Option<String>,
    subject: String,
    html_content: String,
    variables: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TemplateRow> for Template {
    fn from(row: TemplateRow) -> Self {
        Template {
            id: row.id,
            name: row.name,
            description: row.description,
            subject: row.subject,
            html_content: row.html_content,
            variables: row.variables.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    user_name: String,
    user_email: String,
    template_id: i64,
    data: Json<HashMap<String, serde_json::Value>>,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<RequestRow> for Request {
    fn from(row: RequestRow) -> Self {
        Request {
            id: row.id,
            user_name: row.user_name,
            user_email: row.user_email,
            template_id: row.template_id,
            data: row.data.0,
            status: RequestStatus::from_string(&row.status),
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestWithTemplateRow {
    #[sqlx(flatten)]
    request: RequestRow,
    template_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    request_id: i64,
    payload: Json<NotificationMessage>,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxEntry {
    fn from(row: OutboxRow) -> Self {
        OutboxEntry {
            id: row.id,
            request_id: row.request_id,
            message: row.payload.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: i64,
    request_id: i64,
    user_name: String,
    user_email: String,
    template_id: i64,
    data: Json<HashMap<String, serde_json::Value>>,
    error_message: String,
    retry_count: i32,
    retry_attempted: bool,
    failed_at: DateTime<Utc>,
}

impl From<DeadLetterRow> for DeadLetterEntry {
    fn from(row: DeadLetterRow) -> Self {
        DeadLetterEntry {
            id: row.id,
            request_id: row.request_id,
            user_name: row.user_name,
            user_email: row.user_email,
            template_id: row.template_id,
            data: row.data.0,
            error_message: row.error_message,
            retry_count: row.retry_count,
            retry_attempted: row.retry_attempted,
            failed_at: row.failed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterStatsRow {
    total: i64,
    pending: i64,
    retried: i64,
    oldest_pending_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl Store for DatabaseClient {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch templates: {}", e))?;

        Ok(rows.into_iter().map(Template::from).collect())
    }

    async fn get_template(&self, id: i64) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch template {}: {}", id, e))?;

        Ok(row.map(Template::from))
    }

    async fn create_template(&self, input: &TemplateInput) -> Result<Template> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            r#"
            INSERT INTO templates (name, description, subject, html_content, variables)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.subject)
        .bind(&input.html_content)
        .bind(Json(&input.variables))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create template: {}", e))?;

        Ok(row.into())
    }

    async fn update_template(&self, id: i64, input: &TemplateInput) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            r#"
            UPDATE templates
            SET name = $1, description = $2, subject = $3, html_content = $4,
                variables = $5, updated_at = now()
            WHERE id = $6
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.subject)
        .bind(&input.html_content)
        .bind(Json(&input.variables))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to update template {}: {}", id, e))?;

        Ok(row.map(Template::from))
    }

    async fn delete_template(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to delete template {}: {}", id, e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_requests(
        &self,
        batch: &[NewRequest],
        max_retries: u32,
    ) -> Result<Vec<PendingPublish>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| anyhow!("Failed to open transaction: {}", e))?;

        let mut pending = Vec::with_capacity(batch.len());

        for new_request in batch {
            let row = sqlx::query_as::<_, RequestRow>(&format!(
                r#"
                INSERT INTO requests (user_name, user_email, template_id, data)
                VALUES ($1, $2, $3, $4)
                RETURNING {REQUEST_COLUMNS}
                "#
            ))
            .bind(&new_request.user_name)
            .bind(&new_request.user_email)
            .bind(new_request.template_id)
            .bind(Json(&new_request.data))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to insert request: {}", e))?;

            let request = Request::from(row);
            let outbound =
                OutboundMessage::new(NotificationMessage::for_request(&request, max_retries));

            sqlx::query(
                "INSERT INTO outbox_messages (id, request_id, payload) VALUES ($1, $2, $3)",
            )
            .bind(outbound.message_id)
            .bind(request.id)
            .bind(Json(&outbound.message))
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to insert outbox row: {}", e))?;

            pending.push(PendingPublish { request, outbound });
        }

        tx.commit()
            .await
            .map_err(|e| anyhow!("Failed to commit requests: {}", e))?;

        debug!(count = pending.len(), "Requests persisted with outbox rows");

        Ok(pending)
    }

    async fn list_requests(&self, limit: i64, offset: i64) -> Result<Vec<RequestWithTemplate>> {
        let rows = sqlx::query_as::<_, RequestWithTemplateRow>(
            r#"
            SELECT r.id, r.user_name, r.user_email, r.template_id, r.data, r.status,
                   r.created_at, r.processed_at, t.name AS template_name
            FROM requests r
            LEFT JOIN templates t ON r.template_id = t.id
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch requests: {}", e))?;

        Ok(rows
            .into_iter()
            .map(|row| RequestWithTemplate {
                request: row.request.into(),
                template_name: row.template_name,
            })
            .collect())
    }

    async fn mark_sent(&self, request_id: i64) -> Result<()> {
        sqlx::query("UPDATE requests SET status = $1, processed_at = now() WHERE id = $2")
            .bind(RequestStatus::Sent.as_str())
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to mark request {} as sent: {}", request_id, e))?;

        Ok(())
    }

    async fn mark_failed(&self, request_id: i64) -> Result<()> {
        sqlx::query("UPDATE requests SET status = $1 WHERE id = $2")
            .bind(RequestStatus::Failed.as_str())
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to mark request {} as failed: {}", request_id, e))?;

        Ok(())
    }

    async fn append_log(&self, log: &NewNotificationLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_logs (request_id, status, error_message) VALUES ($1, $2, $3)",
        )
        .bind(log.request_id)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                error = %e,
                request_id = log.request_id,
                "Failed to write notification log"
            );
            anyhow!("Database write failed: {}", e)
        })?;

        debug!(
            request_id = log.request_id,
            status = %log.status,
            "Notification log written"
        );

        Ok(())
    }

    async fn claim_stale_outbox(
        &self,
        limit: i64,
        older_than: Duration,
    ) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_messages SET claimed_at = now()
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE created_at < now() - make_interval(secs => $1)
                  AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $1))
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, request_id, payload, created_at
            "#,
        )
        .bind(older_than.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to claim outbox rows: {}", e))?;

        let mut entries: Vec<OutboxEntry> = rows.into_iter().map(OutboxEntry::from).collect();
        entries.sort_by_key(|entry| entry.created_at);

        Ok(entries)
    }

    async fn clear_outbox(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM outbox_messages WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to clear outbox rows: {}", e))?;

        Ok(())
    }

    async fn insert_dead_letter(&self, entry: &NewDeadLetter) -> Result<DeadLetterEntry> {
        let row = sqlx::query_as::<_, DeadLetterRow>(&format!(
            r#"
            INSERT INTO dead_letter_queue
                (request_id, user_name, user_email, template_id, data, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {DEAD_LETTER_COLUMNS}
            "#
        ))
        .bind(entry.request_id)
        .bind(&entry.user_name)
        .bind(&entry.user_email)
        .bind(entry.template_id)
        .bind(Json(&entry.data))
        .bind(&entry.error_message)
        .bind(entry.retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to insert dead letter: {}", e))?;

        Ok(row.into())
    }

    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_queue \
             ORDER BY failed_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch dead letters: {}", e))?;

        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }

    async fn dead_letter_stats(&self) -> Result<DeadLetterStats> {
        let row = sqlx::query_as::<_, DeadLetterStatsRow>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE NOT retry_attempted) AS pending,
                   COUNT(*) FILTER (WHERE retry_attempted) AS retried,
                   MIN(failed_at) FILTER (WHERE NOT retry_attempted) AS oldest_pending_at
            FROM dead_letter_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to compute dead letter stats: {}", e))?;

        Ok(DeadLetterStats {
            total: row.total,
            pending: row.pending,
            retried: row.retried,
            oldest_pending_at: row.oldest_pending_at,
        })
    }

    async fn get_dead_letter(&self, id: i64) -> Result<Option<DeadLetterEntry>> {
        let row = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch dead letter {}: {}", id, e))?;

        Ok(row.map(DeadLetterEntry::from))
    }

    async fn pending_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_queue \
             WHERE retry_attempted = FALSE ORDER BY failed_at ASC, id ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to select dead letters for replay: {}", e))?;

        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }

    async fn mark_retry_attempted(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE dead_letter_queue SET retry_attempted = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to flag dead letters as retried: {}", e))?;

        Ok(())
    }

    async fn delete_dead_letter(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dead_letter_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to delete dead letter {}: {}", id, e))?;

        Ok(result.rows_affected() > 0)
    }
}
