//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding search sessions,
//! ranked leads with their provenance blobs, and the execution-session
//! progress records callers poll.
//!
//! **Access rules:**
//! - Pipeline runs: read-write via [`Storage::open`]
//! - Lead history queries: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_shared::{
    ExecutionSession, LeadScoutError, QualifiedLead, Result, SearchMetadata, SearchSession,
    SessionId,
};
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Where a run's results and progress go.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Write the session record and every lead in one transaction.
    async fn persist_run(
        &self,
        session: &SearchSession,
        leads: &[QualifiedLead],
        metadata: &SearchMetadata,
    ) -> Result<()>;

    /// Insert or update a progress record.
    async fn upsert_execution_session(&self, record: &ExecutionSession) -> Result<()>;
}

/// A persisted lead with its rank and provenance.
#[derive(Debug, Clone)]
pub struct StoredLead {
    pub session_id: String,
    /// 1-based position in the ranked output.
    pub rank: u32,
    pub lead: QualifiedLead,
    pub metadata: SearchMetadata,
}

fn db_err(e: libsql::Error) -> LeadScoutError {
    LeadScoutError::Persistence(e.to_string())
}

fn json_err(e: serde_json::Error) -> LeadScoutError {
    LeadScoutError::Persistence(format!("json encoding failed: {e}"))
}

/// Hex SHA-256 of a lead URL, indexed for cross-session lookups.
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeadScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeadScoutError::Persistence(format!(
                "database not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    LeadScoutError::Persistence(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LeadScoutError::Persistence(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run persistence
    // -----------------------------------------------------------------------

    async fn write_run(
        conn: &Connection,
        session: &SearchSession,
        leads: &[QualifiedLead],
        metadata: &SearchMetadata,
    ) -> Result<()> {
        let categories_json = serde_json::to_string(&session.categories).map_err(json_err)?;
        conn.execute(
            "INSERT INTO search_sessions
               (id, account_id, agent_type, categories_json, geography, quota_charge, started_at, finished_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               quota_charge = excluded.quota_charge,
               finished_at = excluded.finished_at,
               status = excluded.status",
            params![
                session.id.to_string(),
                session.account_id.as_str(),
                session.agent_type.as_str(),
                categories_json,
                session.geography.as_str(),
                i64::from(session.quota_charge),
                session.started_at.to_rfc3339(),
                session.finished_at.map(|t| t.to_rfc3339()),
                session.status.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;

        for (i, lead) in leads.iter().enumerate() {
            let blob = SearchMetadata {
                relevance_score: lead.relevance_score,
                ..metadata.clone()
            };
            conn.execute(
                "INSERT INTO leads
                   (id, session_id, rank, source_id, url, url_hash, title, description,
                    compensation_text, posted_text, posted_at, contact_text, location,
                    recency_score, estimated_value, value_confident, quality_score,
                    urgency_json, relevance_score, matched_terms_json, category, search_metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
                 ON CONFLICT(session_id, url) DO UPDATE SET
                   rank = excluded.rank,
                   relevance_score = excluded.relevance_score,
                   search_metadata = excluded.search_metadata",
                params![
                    lead.id.as_str(),
                    session.id.to_string(),
                    (i + 1) as i64,
                    lead.source_id.as_str(),
                    lead.url.as_str(),
                    url_hash(&lead.url),
                    lead.title.as_str(),
                    lead.description.as_str(),
                    lead.compensation_text.as_str(),
                    lead.posted_text.as_str(),
                    lead.posted_at.map(|t| t.to_rfc3339()),
                    lead.contact_text.as_deref(),
                    lead.location.as_deref(),
                    i64::from(lead.recency_score),
                    lead.estimated_value,
                    i64::from(lead.value_confident),
                    lead.quality_score,
                    serde_json::to_string(&lead.urgency_indicators).map_err(json_err)?,
                    lead.relevance_score,
                    serde_json::to_string(&lead.matched_terms).map_err(json_err)?,
                    lead.category.as_str(),
                    serde_json::to_string(&blob).map_err(json_err)?,
                ],
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Get a search session by ID.
    pub async fn get_search_session(&self, id: &SessionId) -> Result<Option<SearchSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, account_id, agent_type, categories_json, geography, quota_charge,
                        started_at, finished_at, status
                 FROM search_sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_search_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Sessions an account started at or after `since`, oldest first.
    pub async fn list_search_sessions_since(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SearchSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, account_id, agent_type, categories_json, geography, quota_charge,
                        started_at, finished_at, status
                 FROM search_sessions WHERE account_id = ?1 ORDER BY started_at",
                params![account_id],
            )
            .await
            .map_err(db_err)?;

        // started_at is compared parsed; stored offsets and precision vary.
        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let session = row_to_search_session(&row)?;
            if session.started_at >= since {
                results.push(session);
            }
        }
        Ok(results)
    }

    /// Leads stored for a session, best-ranked first.
    pub async fn list_leads(&self, session_id: &SessionId) -> Result<Vec<StoredLead>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, session_id, rank, source_id, url, title, description,
                        compensation_text, posted_text, posted_at, contact_text, location,
                        recency_score, estimated_value, value_confident, quality_score,
                        urgency_json, relevance_score, matched_terms_json, category, search_metadata
                 FROM leads WHERE session_id = ?1 ORDER BY rank",
                params![session_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_stored_lead(&row)?);
        }
        Ok(results)
    }

    /// Number of stored leads, across all sessions, with this URL.
    pub async fn count_leads_with_url(&self, url: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM leads WHERE url_hash = ?1",
                params![url_hash(url)],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Get a progress record by tracking id.
    pub async fn get_execution_session(&self, id: &str) -> Result<Option<ExecutionSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, agent_type, status, percent, stage, started_at, updated_at
                 FROM execution_sessions WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(ExecutionSession {
                id: row.get::<String>(0).map_err(db_err)?,
                agent_type: row.get::<String>(1).map_err(db_err)?.parse()?,
                status: row.get::<String>(2).map_err(db_err)?.parse()?,
                percent: row.get::<i64>(3).map_err(db_err)?.clamp(0, 100) as u8,
                stage: row.get::<String>(4).map_err(db_err)?,
                started_at: parse_time(&row.get::<String>(5).map_err(db_err)?)?,
                updated_at: parse_time(&row.get::<String>(6).map_err(db_err)?)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

#[async_trait]
impl LeadStore for Storage {
    #[tracing::instrument(skip_all, fields(session_id = %session.id, leads = leads.len()))]
    async fn persist_run(
        &self,
        session: &SearchSession,
        leads: &[QualifiedLead],
        metadata: &SearchMetadata,
    ) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        match Self::write_run(&tx, session, leads, metadata).await {
            Ok(()) => {
                tx.commit().await.map_err(db_err)?;
                debug!("run persisted");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn upsert_execution_session(&self, record: &ExecutionSession) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO execution_sessions (id, agent_type, status, percent, stage, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   percent = excluded.percent,
                   stage = excluded.stage,
                   updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    record.agent_type.as_str(),
                    record.status.as_str(),
                    i64::from(record.percent),
                    record.stage.as_str(),
                    record.started_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LeadScoutError::Persistence(format!("invalid date: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| LeadScoutError::Persistence(format!("invalid json: {e}")))
}

fn row_to_search_session(row: &libsql::Row) -> Result<SearchSession> {
    Ok(SearchSession {
        id: row
            .get::<String>(0)
            .map_err(db_err)?
            .parse()
            .map_err(|e| LeadScoutError::Persistence(format!("invalid session id: {e}")))?,
        account_id: row.get::<String>(1).map_err(db_err)?,
        agent_type: row.get::<String>(2).map_err(db_err)?.parse()?,
        categories: parse_json(&row.get::<String>(3).map_err(db_err)?)?,
        geography: row.get::<String>(4).map_err(db_err)?,
        quota_charge: row.get::<u32>(5).map_err(db_err)?,
        started_at: parse_time(&row.get::<String>(6).map_err(db_err)?)?,
        finished_at: row
            .get::<String>(7)
            .ok()
            .map(|s| parse_time(&s))
            .transpose()?,
        status: row.get::<String>(8).map_err(db_err)?.parse()?,
    })
}

fn row_to_stored_lead(row: &libsql::Row) -> Result<StoredLead> {
    let lead = QualifiedLead {
        id: row.get::<String>(0).map_err(db_err)?,
        source_id: row.get::<String>(3).map_err(db_err)?,
        url: row.get::<String>(4).map_err(db_err)?,
        title: row.get::<String>(5).map_err(db_err)?,
        description: row.get::<String>(6).map_err(db_err)?,
        compensation_text: row.get::<String>(7).map_err(db_err)?,
        posted_text: row.get::<String>(8).map_err(db_err)?,
        posted_at: row
            .get::<String>(9)
            .ok()
            .map(|s| parse_time(&s))
            .transpose()?,
        contact_text: row.get::<String>(10).ok(),
        location: row.get::<String>(11).ok(),
        recency_score: row.get::<u32>(12).map_err(db_err)?.min(10) as u8,
        estimated_value: row.get::<f64>(13).map_err(db_err)?,
        value_confident: row.get::<i64>(14).map_err(db_err)? != 0,
        quality_score: row.get::<f64>(15).map_err(db_err)?,
        urgency_indicators: parse_json(&row.get::<String>(16).map_err(db_err)?)?,
        relevance_score: row.get::<f64>(17).map_err(db_err)?,
        matched_terms: parse_json(&row.get::<String>(18).map_err(db_err)?)?,
        category: row.get::<String>(19).map_err(db_err)?,
    };

    Ok(StoredLead {
        session_id: row.get::<String>(1).map_err(db_err)?,
        rank: row.get::<u32>(2).map_err(db_err)?,
        lead,
        metadata: parse_json(&row.get::<String>(20).map_err(db_err)?)?,
    })
}
