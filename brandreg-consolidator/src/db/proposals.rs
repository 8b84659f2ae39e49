//! Consolidation proposal persistence

use brandreg_common::models::{
    ConsolidationProposal, ConsolidationType, ProposalFilter, ProposalStatus, SignalVector,
};
use brandreg_common::{time, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::brands::parse_uuid;

const PROPOSAL_COLUMNS: &str = "id, consolidation_type, confidence, proposed_survivor_id, member_ids, \
     signals, status, created_at, updated_at, resolved_at, resolved_by, resolution_notes, \
     survivor_override_id, record_id";

pub async fn get_proposal<'e, E>(executor: E, id: &str) -> Result<Option<ConsolidationProposal>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM consolidation_proposals WHERE id = ?", PROPOSAL_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(proposal_from_row).transpose()
}

/// Insert a new proposal together with its member index rows
pub async fn insert_proposal(conn: &mut SqliteConnection, proposal: &ConsolidationProposal) -> Result<()> {
    let member_ids = serde_json::to_string(&proposal.member_ids)?;
    let signals = serde_json::to_string(&proposal.signals)?;

    sqlx::query(
        r#"
        INSERT INTO consolidation_proposals (
            id, consolidation_type, confidence, proposed_survivor_id, member_ids, signals,
            status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&proposal.id)
    .bind(proposal.consolidation_type.as_str())
    .bind(proposal.confidence)
    .bind(proposal.proposed_survivor_id.to_string())
    .bind(&member_ids)
    .bind(&signals)
    .bind(proposal.status.as_str())
    .bind(time::to_db(&proposal.created_at))
    .bind(time::to_db(&proposal.updated_at))
    .execute(&mut *conn)
    .await?;

    for member in &proposal.member_ids {
        sqlx::query("INSERT INTO proposal_members (proposal_id, brand_id) VALUES (?, ?)")
            .bind(&proposal.id)
            .bind(member.to_string())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Refresh a PENDING proposal after re-detection; false if it left PENDING meanwhile
pub async fn update_pending(conn: &mut SqliteConnection, proposal: &ConsolidationProposal) -> Result<bool> {
    let signals = serde_json::to_string(&proposal.signals)?;

    let affected = sqlx::query(
        r#"
        UPDATE consolidation_proposals
        SET consolidation_type = ?, confidence = ?, proposed_survivor_id = ?, signals = ?,
            status = ?, updated_at = ?
        WHERE id = ? AND status = 'PENDING'
        "#,
    )
    .bind(proposal.consolidation_type.as_str())
    .bind(proposal.confidence)
    .bind(proposal.proposed_survivor_id.to_string())
    .bind(&signals)
    .bind(proposal.status.as_str())
    .bind(time::to_db(&proposal.updated_at))
    .bind(&proposal.id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Resolution fields written when a proposal leaves its awaiting state
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub status: ProposalStatus,
    pub actor: &'a str,
    pub notes: Option<&'a str>,
    pub survivor_override: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Compare-and-set from `expected` to the resolution status
///
/// Unapplied proposals only: a proposal with a record id never transitions again.
pub async fn claim<'e, E>(
    executor: E,
    id: &str,
    expected: ProposalStatus,
    resolution: &Resolution<'_>,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE consolidation_proposals
        SET status = ?, resolved_at = ?, resolved_by = ?, resolution_notes = ?,
            survivor_override_id = ?, updated_at = ?
        WHERE id = ? AND status = ? AND record_id IS NULL
        "#,
    )
    .bind(resolution.status.as_str())
    .bind(time::to_db(&resolution.at))
    .bind(resolution.actor)
    .bind(resolution.notes)
    .bind(resolution.survivor_override.map(|s| s.to_string()))
    .bind(time::to_db(&resolution.at))
    .bind(id)
    .bind(expected.as_str())
    .execute(executor)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

pub async fn set_record_id(conn: &mut SqliteConnection, id: &str, record_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE consolidation_proposals SET record_id = ? WHERE id = ?")
        .bind(record_id.to_string())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Move an unapplied PENDING or AUTO_APPROVED proposal to STALE
pub async fn mark_stale<'e, E>(executor: E, id: &str, at: &DateTime<Utc>) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE consolidation_proposals SET status = 'STALE', updated_at = ?
        WHERE id = ? AND status IN ('PENDING', 'AUTO_APPROVED') AND record_id IS NULL
        "#,
    )
    .bind(time::to_db(at))
    .bind(id)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Invalidate every other open proposal that references one of `brand_ids`
///
/// Returns the ids moved to STALE.
pub async fn invalidate_sharing(
    conn: &mut SqliteConnection,
    brand_ids: &[Uuid],
    except: &str,
    at: &DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut stale = Vec::new();

    for brand_id in brand_ids {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.id FROM consolidation_proposals p
            JOIN proposal_members m ON m.proposal_id = p.id
            WHERE m.brand_id = ? AND p.id != ?
              AND p.status IN ('PENDING', 'AUTO_APPROVED') AND p.record_id IS NULL
            ORDER BY p.id
            "#,
        )
        .bind(brand_id.to_string())
        .bind(except)
        .fetch_all(&mut *conn)
        .await?;

        for id in ids {
            if mark_stale(&mut *conn, &id, at).await? {
                stale.push(id);
            }
        }
    }

    Ok(stale)
}

/// PENDING proposals for review, highest confidence first
pub async fn list_pending(pool: &SqlitePool, filter: &ProposalFilter) -> Result<Vec<ConsolidationProposal>> {
    list_by_status(pool, ProposalStatus::Pending, filter).await
}

/// AUTO_APPROVED proposals not yet executed, oldest first
pub async fn list_awaiting_execution(pool: &SqlitePool) -> Result<Vec<ConsolidationProposal>> {
    let sql = format!(
        "SELECT {} FROM consolidation_proposals WHERE status = 'AUTO_APPROVED' AND record_id IS NULL \
         ORDER BY created_at, id",
        PROPOSAL_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(proposal_from_row).collect()
}

pub async fn list_by_status(
    pool: &SqlitePool,
    status: ProposalStatus,
    filter: &ProposalFilter,
) -> Result<Vec<ConsolidationProposal>> {
    let sql = format!(
        r#"
        SELECT {} FROM consolidation_proposals
        WHERE status = ?
          AND (? IS NULL OR consolidation_type = ?)
          AND (? IS NULL OR confidence >= ?)
        ORDER BY confidence DESC, created_at, id
        "#,
        PROPOSAL_COLUMNS
    );

    let type_label = filter.consolidation_type.map(|t| t.as_str());
    let rows = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(type_label)
        .bind(type_label)
        .bind(filter.min_confidence)
        .bind(filter.min_confidence)
        .fetch_all(pool)
        .await?;

    rows.iter().map(proposal_from_row).collect()
}

/// Proposal counts per status
pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(ProposalStatus, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM consolidation_proposals GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(status, count)| -> Result<(ProposalStatus, i64)> { Ok((status.parse()?, count)) })
        .collect()
}

fn proposal_from_row(row: &SqliteRow) -> Result<ConsolidationProposal> {
    let consolidation_type: String = row.try_get("consolidation_type")?;
    let consolidation_type: ConsolidationType = consolidation_type.parse()?;
    let status: String = row.try_get("status")?;
    let member_ids: String = row.try_get("member_ids")?;
    let signals: String = row.try_get("signals")?;
    let survivor: String = row.try_get("proposed_survivor_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let survivor_override: Option<String> = row.try_get("survivor_override_id")?;
    let record_id: Option<String> = row.try_get("record_id")?;

    Ok(ConsolidationProposal {
        id: row.try_get("id")?,
        member_ids: serde_json::from_str(&member_ids)?,
        proposed_survivor_id: parse_uuid("proposed_survivor_id", &survivor)?,
        consolidation_type,
        confidence: row.try_get("confidence")?,
        signals: serde_json::from_str::<SignalVector>(&signals)?,
        status: status.parse()?,
        created_at: time::from_db("created_at", &created_at)?,
        updated_at: time::from_db("updated_at", &updated_at)?,
        resolved_at: time::from_db_opt("resolved_at", row.try_get("resolved_at")?)?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
        survivor_override_id: survivor_override
            .map(|s| parse_uuid("survivor_override_id", &s))
            .transpose()?,
        record_id: record_id.map(|r| parse_uuid("record_id", &r)).transpose()?,
    })
}
