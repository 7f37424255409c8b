use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use super::to_json_text;
use crate::{
    db::errors::StoreError,
    db_types::{AuditEntry, NewAuditEntry},
};

#[derive(FromRow)]
struct AuditRow {
    id: i64,
    actor_id: Option<i64>,
    action: String,
    resource_type: String,
    resource_id: String,
    metadata: String,
    created_at: DateTime<Utc>,
}

pub async fn append_audit(entry: NewAuditEntry, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(
        r#"
            INSERT INTO audit_logs (actor_id, action, resource_type, resource_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(to_json_text(&entry.metadata)?)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    trace!("🗃️ Audit: {} on {} {}", entry.action, entry.resource_type, entry.resource_id);
    Ok(())
}

pub async fn fetch_audit_log(
    resource_type: &str,
    resource_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<AuditEntry>, StoreError> {
    let rows: Vec<AuditRow> =
        sqlx::query_as("SELECT * FROM audit_logs WHERE resource_type = $1 AND resource_id = $2 ORDER BY id")
            .bind(resource_type)
            .bind(resource_id)
            .fetch_all(conn)
            .await?;
    rows.into_iter()
        .map(|row| -> Result<AuditEntry, StoreError> {
            Ok(AuditEntry {
                id: row.id,
                actor_id: row.actor_id,
                action: row.action,
                resource_type: row.resource_type,
                resource_id: row.resource_id,
                metadata: serde_json::from_str(&row.metadata)?,
                created_at: row.created_at,
            })
        })
        .collect()
}
