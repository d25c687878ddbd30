use rusqlite::{ffi, params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::time::Duration;

use crate::detect::{BoundingBox, Detection, PredictionResult, Statistics};
use crate::error::{DetectError, Result};

/// Durable record of past predictions.
///
/// A prediction owns its detections: removing the prediction removes them too.
pub trait PredictionStore: Send {
    /// Persist a prediction and all of its detections atomically.
    fn save(&mut self, prediction: &PredictionResult) -> Result<()>;

    /// Every prediction, newest first (ties broken by id, descending).
    fn get_all(&mut self) -> Result<Vec<PredictionResult>>;

    fn get_by_id(&mut self, id: &str) -> Result<PredictionResult>;

    /// Remove a prediction and its detections. Returns false if `id` was unknown.
    fn delete(&mut self, id: &str) -> Result<bool>;

    fn clear_all(&mut self) -> Result<()>;

    fn statistics(&mut self) -> Result<Statistics>;

    /// Release the underlying handle. Later calls fail with `StoreUninitialized`.
    fn close(&mut self) -> Result<()>;
}

/// Bounded retry for transient SQLite contention.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Run `op`, retrying busy/locked failures with exponential backoff.
pub(crate) fn with_retry<T>(
    policy: RetryPolicy,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if is_transient(&e) && attempt < policy.attempts => {
                log::warn!(
                    "storage busy (attempt {}/{}), retrying in {:?}",
                    attempt,
                    policy.attempts,
                    delay
                );
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

pub struct SqlitePredictionStore {
    conn: Option<Connection>,
    retry: RetryPolicy,
}

impl SqlitePredictionStore {
    /// Open (or create) the database and ensure the schema exists.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        conn.busy_timeout(Duration::from_millis(250))?;
        let mut store = Self {
            conn: Some(conn),
            retry: RetryPolicy::default(),
        };
        store.ensure_schema()?;
        log::info!("prediction store opened at {}", db_path);
        Ok(store)
    }

    fn conn(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(DetectError::StoreUninitialized)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS predictions (
              id TEXT PRIMARY KEY,
              imageUri TEXT NOT NULL,
              timestamp INTEGER NOT NULL,
              modelUsed TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              predictionId TEXT NOT NULL,
              className TEXT NOT NULL,
              confidence REAL NOT NULL,
              x REAL NOT NULL,
              y REAL NOT NULL,
              width REAL NOT NULL,
              height REAL NOT NULL,
              FOREIGN KEY (predictionId) REFERENCES predictions (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_detections_prediction ON detections(predictionId);
            "#,
        )?;
        Ok(())
    }
}

fn insert_prediction(conn: &mut Connection, p: &PredictionResult) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO predictions (id, imageUri, timestamp, modelUsed) VALUES (?1, ?2, ?3, ?4)",
        params![p.id, p.image_uri, p.timestamp_ms, p.model_used],
    )?;
    {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO detections (predictionId, className, confidence, x, y, width, height)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for det in &p.detections {
            let b = det.bounding_box;
            stmt.execute(params![
                p.id,
                det.class_name,
                det.confidence as f64,
                b.x as f64,
                b.y as f64,
                b.width as f64,
                b.height as f64
            ])?;
        }
    }
    tx.commit()
}

fn load_detections(conn: &Connection, prediction_id: &str) -> rusqlite::Result<Vec<Detection>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT className, confidence, x, y, width, height
        FROM detections WHERE predictionId = ?1 ORDER BY id ASC
        "#,
    )?;
    let rows = stmt.query_map(params![prediction_id], |row| {
        Ok(Detection {
            class_name: row.get(0)?,
            confidence: row.get::<_, f64>(1)? as f32,
            bounding_box: BoundingBox {
                x: row.get::<_, f64>(2)? as f32,
                y: row.get::<_, f64>(3)? as f32,
                width: row.get::<_, f64>(4)? as f32,
                height: row.get::<_, f64>(5)? as f32,
            },
        })
    })?;
    rows.collect()
}

fn row_to_prediction(row: &rusqlite::Row<'_>) -> rusqlite::Result<PredictionResult> {
    Ok(PredictionResult {
        id: row.get(0)?,
        image_uri: row.get(1)?,
        timestamp_ms: row.get(2)?,
        model_used: row.get(3)?,
        detections: Vec::new(),
    })
}

impl PredictionStore for SqlitePredictionStore {
    fn save(&mut self, prediction: &PredictionResult) -> Result<()> {
        let retry = self.retry;
        let conn = self.conn()?;
        with_retry(retry, || insert_prediction(conn, prediction))?;
        log::info!(
            "prediction {} saved ({} detection(s))",
            prediction.id,
            prediction.detections.len()
        );
        Ok(())
    }

    fn get_all(&mut self) -> Result<Vec<PredictionResult>> {
        let retry = self.retry;
        let conn = self.conn()?;
        let out = with_retry(retry, || {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT id, imageUri, timestamp, modelUsed FROM predictions
                ORDER BY timestamp DESC, id DESC
                "#,
            )?;
            let mut predictions = stmt
                .query_map([], row_to_prediction)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for p in predictions.iter_mut() {
                p.detections = load_detections(conn, &p.id)?;
            }
            Ok(predictions)
        })?;
        Ok(out)
    }

    fn get_by_id(&mut self, id: &str) -> Result<PredictionResult> {
        let retry = self.retry;
        let conn = self.conn()?;
        let found = with_retry(retry, || {
            let prediction = conn
                .query_row(
                    "SELECT id, imageUri, timestamp, modelUsed FROM predictions WHERE id = ?1",
                    params![id],
                    row_to_prediction,
                )
                .optional()?;
            match prediction {
                Some(mut p) => {
                    p.detections = load_detections(conn, id)?;
                    Ok(Some(p))
                }
                None => Ok(None),
            }
        })?;
        found.ok_or_else(|| DetectError::NotFound(id.to_string()))
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let retry = self.retry;
        let conn = self.conn()?;
        let removed = with_retry(retry, || {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM detections WHERE predictionId = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM predictions WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed)
        })?;
        if removed == 0 {
            log::debug!("prediction {} not present, nothing deleted", id);
            return Ok(false);
        }
        log::info!("prediction {} deleted", id);
        Ok(true)
    }

    fn clear_all(&mut self) -> Result<()> {
        let retry = self.retry;
        let conn = self.conn()?;
        with_retry(retry, || {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM detections", [])?;
            tx.execute("DELETE FROM predictions", [])?;
            tx.commit()
        })?;
        log::info!("all predictions cleared");
        Ok(())
    }

    fn statistics(&mut self) -> Result<Statistics> {
        let retry = self.retry;
        let conn = self.conn()?;
        let stats = with_retry(retry, || {
            let total_predictions: i64 =
                conn.query_row("SELECT COUNT(*) FROM predictions", [], |r| r.get(0))?;
            let (total_detections, average): (i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), AVG(confidence) FROM detections",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            let most_detected_class: Option<String> = conn
                .query_row(
                    r#"
                    SELECT className FROM detections
                    GROUP BY className
                    ORDER BY COUNT(*) DESC, className ASC
                    LIMIT 1
                    "#,
                    [],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(Statistics {
                total_predictions: total_predictions as u64,
                total_detections: total_detections as u64,
                average_confidence: average.unwrap_or(0.0),
                most_detected_class,
            })
        })?;
        Ok(stats)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| DetectError::Storage(e))?;
            log::info!("prediction store closed");
        }
        Ok(())
    }
}

/// Aggregate statistics over a set of predictions.
///
/// Ties for the most detected class resolve to the alphabetically first name.
pub fn compute_statistics(predictions: &[PredictionResult]) -> Statistics {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut confidence_sum = 0f64;
    let mut total_detections = 0u64;
    for p in predictions {
        for d in &p.detections {
            *counts.entry(d.class_name.as_str()).or_default() += 1;
            confidence_sum += d.confidence as f64;
            total_detections += 1;
        }
    }
    let most_detected_class = counts
        .into_iter()
        .max_by(|(a_name, a_count), (b_name, b_count)| {
            a_count.cmp(b_count).then_with(|| b_name.cmp(a_name))
        })
        .map(|(name, _)| name.to_string());

    Statistics {
        total_predictions: predictions.len() as u64,
        total_detections,
        average_confidence: if total_detections == 0 {
            0.0
        } else {
            confidence_sum / total_detections as f64
        },
        most_detected_class,
    }
}

fn duplicate_id_error(id: &str) -> DetectError {
    DetectError::Storage(rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
        Some(format!("UNIQUE constraint failed: predictions.id ({})", id)),
    ))
}

/// Process-local store with the same contract as the SQLite one.
#[derive(Clone, Debug)]
pub struct InMemoryPredictionStore {
    predictions: Vec<PredictionResult>,
    open: bool,
}

impl Default for InMemoryPredictionStore {
    fn default() -> Self {
        Self {
            predictions: Vec::new(),
            open: true,
        }
    }
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(DetectError::StoreUninitialized)
        }
    }
}

impl PredictionStore for InMemoryPredictionStore {
    fn save(&mut self, prediction: &PredictionResult) -> Result<()> {
        self.ensure_open()?;
        if self.predictions.iter().any(|p| p.id == prediction.id) {
            return Err(duplicate_id_error(&prediction.id));
        }
        self.predictions.push(prediction.clone());
        Ok(())
    }

    fn get_all(&mut self) -> Result<Vec<PredictionResult>> {
        self.ensure_open()?;
        let mut out = self.predictions.clone();
        out.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(out)
    }

    fn get_by_id(&mut self, id: &str) -> Result<PredictionResult> {
        self.ensure_open()?;
        self.predictions
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| DetectError::NotFound(id.to_string()))
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        let before = self.predictions.len();
        self.predictions.retain(|p| p.id != id);
        Ok(self.predictions.len() != before)
    }

    fn clear_all(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.predictions.clear();
        Ok(())
    }

    fn statistics(&mut self) -> Result<Statistics> {
        self.ensure_open()?;
        Ok(compute_statistics(&self.predictions))
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
