//! SQLite persistence service
//!
//! Local stand-in for the remote persistence service. One table per level,
//! plus a projects table for the CLI. Dependent rows cascade on delete.

use super::traits::{OpenService, ResourceService, ServiceError, ServiceResult};
use crate::model::{
    Analysis, AnalysisId, Forecast, ForecastId, NewUpload, Project, ProjectId, Sentiment, Summary,
    SummaryId, Upload, UploadId, UploadSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// SQLite-backed resource service
///
/// Thread-safe via internal mutex on the connection. Calls are short and
/// never hold the lock across an await point.
pub struct SqliteService {
    conn: Mutex<Connection>,
}

type UploadRow = (String, String, String, String, bool, String, Option<String>);
type AnalysisRow = (String, String, String, f64, String, f64, String);
type SummaryRow = (String, String, String, String);
type ForecastRow = (String, String, String, u32, String);

impl SqliteService {
    fn init_schema(conn: &Connection) -> ServiceResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                source TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                metadata_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_uploads_project ON uploads(project_id);

            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                upload_id TEXT NOT NULL,
                sentiment TEXT NOT NULL,
                sentiment_score REAL NOT NULL,
                dialect TEXT NOT NULL,
                dialect_confidence REAL NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (upload_id) REFERENCES uploads(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_analyses_upload ON analyses(upload_id);

            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                analysis_id TEXT NOT NULL,
                summary_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_analysis ON summaries(analysis_id);

            CREATE TABLE IF NOT EXISTS forecasts (
                id TEXT PRIMARY KEY,
                analysis_id TEXT NOT NULL,
                forecast_json TEXT NOT NULL,
                forecast_period INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_forecasts_analysis ON forecasts(analysis_id);

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Projects (CLI bookkeeping, outside the service contract) ===

    pub fn save_project(&self, project: &Project) -> ServiceResult<()> {
        self.lock().execute(
            r#"
            INSERT INTO projects (id, name, active) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, active = excluded.active
            "#,
            params![project.id.as_str(), project.name, project.active],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &ProjectId) -> ServiceResult<Option<Project>> {
        let row: Option<(String, String, bool)> = self
            .lock()
            .query_row(
                "SELECT id, name, active FROM projects WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row.map(|(id, name, active)| Project {
            id: ProjectId::from(id),
            name,
            active,
        }))
    }

    pub fn list_projects(&self) -> ServiceResult<Vec<Project>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, active FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Project {
                id: ProjectId::from(row.get::<_, String>(0)?),
                name: row.get(1)?,
                active: row.get(2)?,
            })
        })?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    // === Row decoding ===

    fn parse_time(value: &str) -> ServiceResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ServiceError::Decode(format!("bad timestamp '{}': {}", value, e)))
    }

    fn row_to_upload(row: UploadRow) -> ServiceResult<Upload> {
        let (id, project_id, source, raw_text, processed, created_at, metadata) = row;
        Ok(Upload {
            id: UploadId::from(id),
            project_id: ProjectId::from(project_id),
            source: source.parse::<UploadSource>().map_err(ServiceError::Decode)?,
            raw_text,
            processed,
            created_at: Self::parse_time(&created_at)?,
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        })
    }

    fn row_to_analysis(row: AnalysisRow) -> ServiceResult<Analysis> {
        let (id, upload_id, sentiment, score, dialect, confidence, created_at) = row;
        Ok(Analysis {
            id: AnalysisId::from(id),
            upload_id: UploadId::from(upload_id),
            sentiment: sentiment.parse::<Sentiment>().map_err(ServiceError::Decode)?,
            sentiment_score: score,
            dialect,
            dialect_confidence: confidence,
            created_at: Self::parse_time(&created_at)?,
        })
    }

    fn row_to_summary(row: SummaryRow) -> ServiceResult<Summary> {
        let (id, analysis_id, summary_text, created_at) = row;
        Ok(Summary {
            id: SummaryId::from(id),
            analysis_id: AnalysisId::from(analysis_id),
            summary_text,
            created_at: Self::parse_time(&created_at)?,
        })
    }

    fn row_to_forecast(row: ForecastRow) -> ServiceResult<Forecast> {
        let (id, analysis_id, forecast_json, period, created_at) = row;
        Ok(Forecast {
            id: ForecastId::from(id),
            analysis_id: AnalysisId::from(analysis_id),
            forecast_json: serde_json::from_str(&forecast_json)?,
            forecast_period: period,
            created_at: Self::parse_time(&created_at)?,
        })
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    fn select_uploads(conn: &Connection, sql: &str, key: &str) -> ServiceResult<Vec<Upload>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;
        let mut uploads = Vec::new();
        for row in rows {
            uploads.push(Self::row_to_upload(row?)?);
        }
        Ok(uploads)
    }
}

impl OpenService for SqliteService {
    fn open(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

const UPLOAD_COLUMNS: &str = "id, project_id, source, raw_text, processed, created_at, metadata_json";

#[async_trait]
impl ResourceService for SqliteService {
    async fn list_uploads(&self, project_id: &ProjectId) -> ServiceResult<Vec<Upload>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM uploads WHERE project_id = ?1 ORDER BY created_at, id",
            UPLOAD_COLUMNS
        );
        Self::select_uploads(&conn, &sql, project_id.as_str())
    }

    async fn list_analyses(&self, upload_ids: &[UploadId]) -> ServiceResult<Vec<Analysis>> {
        if upload_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let sql = format!(
            "SELECT id, upload_id, sentiment, sentiment_score, dialect, dialect_confidence, created_at
             FROM analyses WHERE upload_id IN ({}) ORDER BY created_at, id",
            Self::placeholders(upload_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(upload_ids.iter().map(|id| id.as_str())), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;
        let mut analyses = Vec::new();
        for row in rows {
            analyses.push(Self::row_to_analysis(row?)?);
        }
        Ok(analyses)
    }

    async fn list_summaries(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Summary>> {
        if analysis_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let sql = format!(
            "SELECT id, analysis_id, summary_text, created_at
             FROM summaries WHERE analysis_id IN ({}) ORDER BY created_at, id",
            Self::placeholders(analysis_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(analysis_ids.iter().map(|id| id.as_str())), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(Self::row_to_summary(row?)?);
        }
        Ok(summaries)
    }

    async fn list_forecasts(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Forecast>> {
        if analysis_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let sql = format!(
            "SELECT id, analysis_id, forecast_json, forecast_period, created_at
             FROM forecasts WHERE analysis_id IN ({}) ORDER BY created_at, id",
            Self::placeholders(analysis_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(analysis_ids.iter().map(|id| id.as_str())), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?;
        let mut forecasts = Vec::new();
        for row in rows {
            forecasts.push(Self::row_to_forecast(row?)?);
        }
        Ok(forecasts)
    }

    async fn get_upload(&self, id: &UploadId) -> ServiceResult<Option<Upload>> {
        let conn = self.lock();
        let sql = format!("SELECT {} FROM uploads WHERE id = ?1", UPLOAD_COLUMNS);
        Ok(Self::select_uploads(&conn, &sql, id.as_str())?.into_iter().next())
    }

    async fn insert_upload(&self, upload: NewUpload) -> ServiceResult<Upload> {
        let row = upload.into_upload();
        let metadata = row.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.lock().execute(
            r#"
            INSERT INTO uploads (id, project_id, source, raw_text, processed, created_at, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                row.id.as_str(),
                row.project_id.as_str(),
                row.source.as_str(),
                row.raw_text,
                row.processed,
                row.created_at.to_rfc3339(),
                metadata
            ],
        )?;
        Ok(row)
    }

    async fn update_upload(&self, upload: &Upload) -> ServiceResult<()> {
        let metadata = upload.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let rows = self.lock().execute(
            r#"
            UPDATE uploads SET project_id = ?2, source = ?3, raw_text = ?4, processed = ?5,
                               metadata_json = ?6
            WHERE id = ?1
            "#,
            params![
                upload.id.as_str(),
                upload.project_id.as_str(),
                upload.source.as_str(),
                upload.raw_text,
                upload.processed,
                metadata
            ],
        )?;
        if rows == 0 {
            return Err(ServiceError::NotFound(format!("upload {}", upload.id)));
        }
        Ok(())
    }

    async fn delete_upload(&self, id: &UploadId) -> ServiceResult<bool> {
        let rows = self
            .lock()
            .execute("DELETE FROM uploads WHERE id = ?1", params![id.as_str()])?;
        Ok(rows > 0)
    }

    async fn insert_analysis(&self, analysis: &Analysis) -> ServiceResult<()> {
        self.lock().execute(
            r#"
            INSERT INTO analyses (id, upload_id, sentiment, sentiment_score, dialect, dialect_confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                analysis.id.as_str(),
                analysis.upload_id.as_str(),
                analysis.sentiment.as_str(),
                analysis.sentiment_score,
                analysis.dialect,
                analysis.dialect_confidence,
                analysis.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn insert_summary(&self, summary: &Summary) -> ServiceResult<()> {
        self.lock().execute(
            "INSERT INTO summaries (id, analysis_id, summary_text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                summary.id.as_str(),
                summary.analysis_id.as_str(),
                summary.summary_text,
                summary.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn insert_forecast(&self, forecast: &Forecast) -> ServiceResult<()> {
        let json = serde_json::to_string(&forecast.forecast_json)?;
        self.lock().execute(
            r#"
            INSERT INTO forecasts (id, analysis_id, forecast_json, forecast_period, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                forecast.id.as_str(),
                forecast.analysis_id.as_str(),
                json,
                forecast.forecast_period,
                forecast.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForecastPoint, ForecastSeries, HistoricalPoint};
    use chrono::NaiveDate;

    fn create_test_service() -> SqliteService {
        SqliteService::open_in_memory().unwrap()
    }

    fn analysis_for(upload: &Upload) -> Analysis {
        Analysis {
            id: AnalysisId::new(),
            upload_id: upload.id.clone(),
            sentiment: Sentiment::Positive,
            sentiment_score: 0.75,
            dialect: "gulf".into(),
            dialect_confidence: 0.6,
            created_at: Utc::now(),
        }
    }

    fn forecast_for(analysis: &Analysis) -> Forecast {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        Forecast {
            id: ForecastId::new(),
            analysis_id: analysis.id.clone(),
            forecast_json: ForecastSeries {
                historical: vec![HistoricalPoint { date: day, sentiment_score: 0.4 }],
                forecast: vec![ForecastPoint {
                    date: day.succ_opt().unwrap(),
                    sentiment_score: 0.5,
                    is_forecast: true,
                }],
            },
            forecast_period: 7,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upload_round_trip_with_metadata() {
        let service = create_test_service();
        let inserted = service
            .insert_upload(
                NewUpload::new(ProjectId::from("p1"), UploadSource::NewsData, "headline")
                    .with_metadata(serde_json::json!({ "lang": "ar" })),
            )
            .await
            .unwrap();

        let loaded = service.get_upload(&inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded.source, UploadSource::NewsData);
        assert_eq!(loaded.metadata, Some(serde_json::json!({ "lang": "ar" })));
        assert_eq!(loaded.created_at.timestamp(), inserted.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_list_uploads_scoped_to_project() {
        let service = create_test_service();
        for (project, text) in [("p1", "a"), ("p1", "b"), ("p2", "c")] {
            service
                .insert_upload(NewUpload::new(ProjectId::from(project), UploadSource::Manual, text))
                .await
                .unwrap();
        }
        assert_eq!(service.list_uploads(&ProjectId::from("p1")).await.unwrap().len(), 2);
        assert_eq!(service.list_uploads(&ProjectId::from("p3")).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_derived_rows_listed_by_parent_keys() {
        let service = create_test_service();
        let upload = service
            .insert_upload(NewUpload::new(ProjectId::from("p1"), UploadSource::Manual, "a"))
            .await
            .unwrap();
        let analysis = analysis_for(&upload);
        service.insert_analysis(&analysis).await.unwrap();
        service
            .insert_summary(&Summary {
                id: SummaryId::new(),
                analysis_id: analysis.id.clone(),
                summary_text: "mostly upbeat".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let forecast = forecast_for(&analysis);
        service.insert_forecast(&forecast).await.unwrap();

        let analyses = service.list_analyses(&[upload.id.clone()]).await.unwrap();
        assert_eq!(analyses, vec![Analysis { created_at: analyses[0].created_at, ..analysis.clone() }]);

        let ids = vec![analysis.id.clone()];
        assert_eq!(service.list_summaries(&ids).await.unwrap()[0].summary_text, "mostly upbeat");
        let forecasts = service.list_forecasts(&ids).await.unwrap();
        assert_eq!(forecasts[0].forecast_json, forecast.forecast_json);
        assert!(service.list_forecasts(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_upload_cascades() {
        let service = create_test_service();
        let upload = service
            .insert_upload(NewUpload::new(ProjectId::from("p1"), UploadSource::Manual, "a"))
            .await
            .unwrap();
        let analysis = analysis_for(&upload);
        service.insert_analysis(&analysis).await.unwrap();
        service.insert_forecast(&forecast_for(&analysis)).await.unwrap();

        assert!(service.delete_upload(&upload.id).await.unwrap());
        assert!(!service.delete_upload(&upload.id).await.unwrap());
        assert!(service.list_analyses(&[upload.id.clone()]).await.unwrap().is_empty());
        assert!(service.list_forecasts(&[analysis.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_upload_marks_processed() {
        let service = create_test_service();
        let mut upload = service
            .insert_upload(NewUpload::new(ProjectId::from("p1"), UploadSource::Manual, "a"))
            .await
            .unwrap();
        upload.processed = true;
        service.update_upload(&upload).await.unwrap();
        assert!(service.get_upload(&upload.id).await.unwrap().unwrap().processed);

        let ghost = NewUpload::new(ProjectId::from("p1"), UploadSource::Manual, "b").into_upload();
        assert!(matches!(
            service.update_upload(&ghost).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_projects_upsert_and_list() {
        let service = create_test_service();
        let project = Project::new("news desk");
        service.save_project(&project).unwrap();
        service.save_project(&project.clone().deactivated()).unwrap();

        let projects = service.list_projects().unwrap();
        assert_eq!(projects.len(), 1);
        assert!(!projects[0].active);
        assert_eq!(service.get_project(&project.id).unwrap().unwrap().name, "news desk");
    }

    #[test]
    fn test_file_backed_service_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.db");
        let project = Project::new("persisted");
        {
            let service = SqliteService::open(&path).unwrap();
            service.save_project(&project).unwrap();
        }
        let reopened = SqliteService::open(&path).unwrap();
        assert!(reopened.get_project(&project.id).unwrap().is_some());
    }
}
