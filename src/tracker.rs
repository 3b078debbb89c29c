//! Experiment tracking: per-run parameters, metrics and final status.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{TuneError, TuneResult};
use crate::model::{MetricBundle, ParamValue, ParameterSet, RunStatus};
use crate::util::now_utc_string;

/// Handle returned by [`ExperimentTracker::start_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub experiment: String,
    pub run_id: String,
}

/// A run as persisted by the tracker. `status` is `None` while unfinished.
#[derive(Debug, Clone, PartialEq)]
pub struct PastRun {
    pub run_id: String,
    pub params: ParameterSet,
    pub metrics: MetricBundle,
    pub status: Option<RunStatus>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

pub trait ExperimentTracker {
    /// Open (or reopen, superseding earlier data) the run `run_id`.
    fn start_run(&self, experiment: &str, run_id: &str) -> TuneResult<RunHandle>;
    fn log_params(&self, run: &RunHandle, params: &ParameterSet) -> TuneResult<()>;
    fn log_metrics(&self, run: &RunHandle, metrics: &MetricBundle) -> TuneResult<()>;
    fn finish_run(&self, run: &RunHandle, status: RunStatus, error: Option<&str>)
    -> TuneResult<()>;
    fn get_run(&self, experiment: &str, run_id: &str) -> TuneResult<Option<PastRun>>;
    fn list_past_runs(&self, experiment: &str) -> TuneResult<BTreeMap<String, PastRun>>;
}

pub struct SqliteTracker {
    connection: Connection,
}

impl SqliteTracker {
    pub fn open(path: &Path) -> TuneResult<Self> {
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> TuneResult<Self> {
        let connection = Connection::open_in_memory()?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn experiments(&self) -> TuneResult<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT name FROM experiments ORDER BY name")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<String>, rusqlite::Error>>()?)
    }

    fn load_params(&self, experiment: &str, run_id: &str) -> TuneResult<ParameterSet> {
        let mut statement = self.connection.prepare(
            "SELECT name, value_json FROM params WHERE experiment = ?1 AND run_id = ?2 ORDER BY name",
        )?;
        let rows = statement.query_map(params![experiment, run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut pairs = Vec::<(String, ParamValue)>::new();
        for row in rows {
            let (name, raw) = row?;
            let value = serde_json::from_str::<ParamValue>(&raw).map_err(|error| {
                TuneError::RunExecution(format!(
                    "tracker holds unreadable value for `{name}` of run {run_id}: {error}"
                ))
            })?;
            pairs.push((name, value));
        }
        Ok(ParameterSet::from_pairs(pairs))
    }

    fn load_metrics(&self, experiment: &str, run_id: &str) -> TuneResult<MetricBundle> {
        let mut statement = self.connection.prepare(
            "SELECT name, value FROM metrics WHERE experiment = ?1 AND run_id = ?2 ORDER BY name",
        )?;
        let rows = statement.query_map(params![experiment, run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<Result<MetricBundle, rusqlite::Error>>()?)
    }

    fn hydrate(&self, experiment: &str, row: RunRow) -> TuneResult<PastRun> {
        Ok(PastRun {
            params: self.load_params(experiment, &row.run_id)?,
            metrics: self.load_metrics(experiment, &row.run_id)?,
            status: RunStatus::parse(&row.status),
            run_id: row.run_id,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

struct RunRow {
    run_id: String,
    status: String,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

fn read_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        status: row.get(1)?,
        error: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
    })
}

impl ExperimentTracker for SqliteTracker {
    fn start_run(&self, experiment: &str, run_id: &str) -> TuneResult<RunHandle> {
        let now = now_utc_string();
        self.connection.execute(
            "INSERT INTO experiments(name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![experiment, now],
        )?;
        self.connection.execute(
            "DELETE FROM params WHERE experiment = ?1 AND run_id = ?2",
            params![experiment, run_id],
        )?;
        self.connection.execute(
            "DELETE FROM metrics WHERE experiment = ?1 AND run_id = ?2",
            params![experiment, run_id],
        )?;
        self.connection.execute(
            "INSERT INTO runs(experiment, run_id, status, error, started_at, finished_at)
             VALUES (?1, ?2, 'running', NULL, ?3, NULL)
             ON CONFLICT(experiment, run_id) DO UPDATE SET
               status = excluded.status,
               error = NULL,
               started_at = excluded.started_at,
               finished_at = NULL",
            params![experiment, run_id, now],
        )?;

        Ok(RunHandle {
            experiment: experiment.to_string(),
            run_id: run_id.to_string(),
        })
    }

    fn log_params(&self, run: &RunHandle, params: &ParameterSet) -> TuneResult<()> {
        let mut statement = self.connection.prepare(
            "INSERT INTO params(experiment, run_id, name, value_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(experiment, run_id, name) DO UPDATE SET value_json = excluded.value_json",
        )?;
        for (name, value) in params.iter() {
            let raw = serde_json::to_string(value).map_err(|error| {
                TuneError::RunExecution(format!("failed to encode option `{name}`: {error}"))
            })?;
            statement.execute(params![run.experiment, run.run_id, name, raw])?;
        }
        Ok(())
    }

    fn log_metrics(&self, run: &RunHandle, metrics: &MetricBundle) -> TuneResult<()> {
        let mut statement = self.connection.prepare(
            "INSERT INTO metrics(experiment, run_id, name, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(experiment, run_id, name) DO UPDATE SET value = excluded.value",
        )?;
        for (name, value) in metrics.iter() {
            statement.execute(params![run.experiment, run.run_id, name, value])?;
        }
        Ok(())
    }

    fn finish_run(
        &self,
        run: &RunHandle,
        status: RunStatus,
        error: Option<&str>,
    ) -> TuneResult<()> {
        self.connection.execute(
            "UPDATE runs SET status = ?3, error = ?4, finished_at = ?5
             WHERE experiment = ?1 AND run_id = ?2",
            params![
                run.experiment,
                run.run_id,
                status.as_str(),
                error,
                now_utc_string()
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, experiment: &str, run_id: &str) -> TuneResult<Option<PastRun>> {
        let row = self
            .connection
            .query_row(
                "SELECT run_id, status, error, started_at, finished_at
                 FROM runs WHERE experiment = ?1 AND run_id = ?2",
                params![experiment, run_id],
                read_run_row,
            )
            .optional()?;
        row.map(|row| self.hydrate(experiment, row)).transpose()
    }

    fn list_past_runs(&self, experiment: &str) -> TuneResult<BTreeMap<String, PastRun>> {
        let rows = {
            let mut statement = self.connection.prepare(
                "SELECT run_id, status, error, started_at, finished_at
                 FROM runs WHERE experiment = ?1 ORDER BY run_id",
            )?;
            let rows = statement.query_map(params![experiment], read_run_row)?;
            rows.collect::<Result<Vec<RunRow>, rusqlite::Error>>()?
        };

        let mut out = BTreeMap::new();
        for row in rows {
            let past = self.hydrate(experiment, row)?;
            out.insert(past.run_id.clone(), past);
        }
        Ok(out)
    }
}

fn ensure_schema(connection: &Connection) -> TuneResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS experiments (
          name TEXT PRIMARY KEY,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
          experiment TEXT NOT NULL,
          run_id TEXT NOT NULL,
          status TEXT NOT NULL,
          error TEXT,
          started_at TEXT NOT NULL,
          finished_at TEXT,
          PRIMARY KEY(experiment, run_id),
          FOREIGN KEY(experiment) REFERENCES experiments(name)
        );

        CREATE TABLE IF NOT EXISTS params (
          experiment TEXT NOT NULL,
          run_id TEXT NOT NULL,
          name TEXT NOT NULL,
          value_json TEXT NOT NULL,
          PRIMARY KEY(experiment, run_id, name)
        );

        CREATE TABLE IF NOT EXISTS metrics (
          experiment TEXT NOT NULL,
          run_id TEXT NOT NULL,
          name TEXT NOT NULL,
          value REAL NOT NULL,
          PRIMARY KEY(experiment, run_id, name)
        );
        ",
    )?;
    Ok(())
}
