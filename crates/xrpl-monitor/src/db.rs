use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rippled_client::ServerState;
use serde::Serialize;

use crate::error::StoreError;
use crate::monitor::{CurrentState, StateTransition};
use crate::sample::{AggregateSample, Snapshot, StateAccountingEntry};
use crate::tracker::{ValidationCounts, ValidationEvent};

/// A poll that produced no sample. Marks the hole so consumers can tell
/// "no data" apart from "stale data".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollGap {
    pub timestamp_ms: i64,
    /// `fast` or `slow`.
    pub collector: String,
    /// `unreachable`, `timeout` or `malformed`.
    pub kind: String,
    pub detail: String,
}

/// Static-ish facts about the node, refreshed by the slow collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub build_version: Option<String>,
    pub pubkey_validator: Option<String>,
    pub node_size: Option<String>,
    pub complete_ledgers: Option<String>,
    pub updated_at_ms: i64,
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub snapshots: usize,
    pub aggregates: usize,
    pub validation_events: usize,
    pub poll_gaps: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.snapshots + self.aggregates + self.validation_events + self.poll_gaps
    }
}

/// Columns introduced after the first schema; stores created before them are
/// upgraded in place on open.
const ADDED_COLUMNS: &[(&str, &str)] = &[
    ("snapshots", "peers_insane INTEGER"),
    ("snapshots", "state_duration_secs REAL"),
    ("snapshots", "base_fee_xrp REAL"),
    ("snapshots", "reserve_base_xrp REAL"),
    ("snapshots", "reserve_inc_xrp REAL"),
    ("aggregates", "transaction_rate REAL"),
    ("aggregates", "initial_sync_secs REAL"),
    ("aggregates", "peer_disconnects INTEGER"),
    ("aggregates", "peer_disconnects_resources INTEGER"),
];

/// SQLite-backed durable store.
///
/// Writes go through a single connection behind a mutex. Readers open their
/// own read-only connection (see [`Database::reader`]) so a scrape never
/// waits on the collectors' lock, and WAL lets them see the last commit.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            busy_timeout,
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        // WAL keeps readers off the writer's back; NORMAL is durable enough under WAL.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                state INTEGER NOT NULL CHECK (state BETWEEN 0 AND 6),
                ledger_seq INTEGER,
                ledger_hash TEXT,
                ledger_age_secs INTEGER,
                peers_total INTEGER NOT NULL,
                peers_inbound INTEGER,
                peers_outbound INTEGER,
                peer_latency_p90_ms INTEGER,
                load_factor REAL NOT NULL,
                validation_quorum INTEGER,
                proposers INTEGER,
                converge_time_secs REAL,
                uptime_secs INTEGER,
                peers_insane INTEGER,
                state_duration_secs REAL,
                base_fee_xrp REAL,
                reserve_base_xrp REAL,
                reserve_inc_xrp REAL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON snapshots(timestamp_ms);

            CREATE TABLE IF NOT EXISTS aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_used_bytes INTEGER NOT NULL,
                memory_total_bytes INTEGER NOT NULL,
                disk_used_bytes INTEGER,
                io_latency_ms INTEGER,
                queue_depth INTEGER,
                open_ledger_size INTEGER,
                job_queue_overflow INTEGER,
                transaction_rate REAL,
                initial_sync_secs REAL,
                peer_disconnects INTEGER,
                peer_disconnects_resources INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_aggregates_ts ON aggregates(timestamp_ms);

            CREATE TABLE IF NOT EXISTS validation_events (
                ledger_seq INTEGER PRIMARY KEY,
                agreed INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_validation_events_ts ON validation_events(timestamp_ms);

            CREATE TABLE IF NOT EXISTS state_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                from_state INTEGER NOT NULL,
                to_state INTEGER NOT NULL,
                duration_in_from_ms INTEGER NOT NULL,
                ledger_seq INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_state_transitions_ts ON state_transitions(timestamp_ms);

            CREATE TABLE IF NOT EXISTS current_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state INTEGER NOT NULL,
                entered_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS poll_gaps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                collector TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_poll_gaps_ts ON poll_gaps(collector, timestamp_ms);

            CREATE TABLE IF NOT EXISTS node_info (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                build_version TEXT,
                pubkey_validator TEXT,
                node_size TEXT,
                complete_ledgers TEXT,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS state_accounting (
                state INTEGER PRIMARY KEY CHECK (state BETWEEN 0 AND 6),
                duration_secs REAL NOT NULL,
                transitions INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;

        for &(table, column) in ADDED_COLUMNS {
            match conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column}"), []) {
                Ok(_) => tracing::info!(table, column, "Added column to existing store"),
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Open a fresh read-only connection for one batch of queries.
    pub fn reader(&self) -> Result<StoreReader, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(StoreReader { conn })
    }

    pub fn insert_snapshot(&self, s: &Snapshot) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO snapshots (
                timestamp_ms, state, ledger_seq, ledger_hash, ledger_age_secs,
                peers_total, peers_inbound, peers_outbound, peer_latency_p90_ms,
                load_factor, validation_quorum, proposers, converge_time_secs, uptime_secs,
                peers_insane, state_duration_secs, base_fee_xrp, reserve_base_xrp, reserve_inc_xrp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                s.timestamp_ms,
                s.state.code(),
                s.ledger_seq,
                s.ledger_hash,
                s.ledger_age_secs,
                s.peers_total,
                s.peers_inbound,
                s.peers_outbound,
                s.peer_latency_p90_ms,
                s.load_factor,
                s.validation_quorum,
                s.proposers,
                s.converge_time_secs,
                s.uptime_secs.map(to_sql_int),
                s.peers_insane,
                s.state_duration_secs,
                s.base_fee_xrp,
                s.reserve_base_xrp,
                s.reserve_inc_xrp,
            ],
        )?;
        Ok(())
    }

    pub fn insert_aggregate(&self, a: &AggregateSample) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO aggregates (
                timestamp_ms, cpu_percent, memory_used_bytes, memory_total_bytes,
                disk_used_bytes, io_latency_ms, queue_depth, open_ledger_size, job_queue_overflow,
                transaction_rate, initial_sync_secs, peer_disconnects, peer_disconnects_resources
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                a.timestamp_ms,
                a.cpu_percent,
                to_sql_int(a.memory_used_bytes),
                to_sql_int(a.memory_total_bytes),
                a.disk_used_bytes.map(to_sql_int),
                a.io_latency_ms,
                a.queue_depth,
                a.open_ledger_size,
                a.job_queue_overflow.map(to_sql_int),
                a.transaction_rate,
                a.initial_sync_secs,
                a.peer_disconnects.map(to_sql_int),
                a.peer_disconnects_resources.map(to_sql_int),
            ],
        )?;
        Ok(())
    }

    /// Returns `false` when the ledger already has an event.
    pub fn insert_validation_event(&self, e: &ValidationEvent) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO validation_events (ledger_seq, agreed, timestamp_ms) VALUES (?1, ?2, ?3)",
            params![e.ledger_seq, e.agreed, e.timestamp_ms],
        )?;
        Ok(inserted == 1)
    }

    pub fn insert_poll_gap(&self, gap: &PollGap) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO poll_gaps (timestamp_ms, collector, kind, detail) VALUES (?1, ?2, ?3, ?4)",
            params![gap.timestamp_ms, gap.collector, gap.kind, gap.detail],
        )?;
        Ok(())
    }

    /// Persist a state change: append the transition (if any) and replace the
    /// current-state row in one transaction.
    pub fn record_state(
        &self,
        transition: Option<&StateTransition>,
        current: &CurrentState,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(t) = transition {
            tx.execute(
                r#"
                INSERT INTO state_transitions (timestamp_ms, from_state, to_state, duration_in_from_ms, ledger_seq)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![t.timestamp_ms, t.from.code(), t.to.code(), t.duration_in_from_ms, t.ledger_seq],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO current_state (id, state, entered_at_ms) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET state = excluded.state, entered_at_ms = excluded.entered_at_ms
            "#,
            params![current.state.code(), current.entered_at_ms],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn upsert_node_info(&self, info: &NodeInfo) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO node_info (id, build_version, pubkey_validator, node_size, complete_ledgers, updated_at_ms)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                build_version = excluded.build_version,
                pubkey_validator = excluded.pubkey_validator,
                node_size = excluded.node_size,
                complete_ledgers = excluded.complete_ledgers,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                info.build_version,
                info.pubkey_validator,
                info.node_size,
                info.complete_ledgers,
                info.updated_at_ms
            ],
        )?;
        Ok(())
    }

    /// Replace the per-state accounting with the latest reading. An empty
    /// reading leaves the stored rows alone.
    pub fn replace_state_accounting(
        &self,
        entries: &[StateAccountingEntry],
        updated_at_ms: i64,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM state_accounting", [])?;
        for e in entries {
            tx.execute(
                "INSERT INTO state_accounting (state, duration_secs, transitions, updated_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![e.state.code(), e.duration_secs, to_sql_int(e.transitions), updated_at_ms],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete bulk rows older than `cutoff_ms`. Transitions and the current
    /// state are history and are kept.
    pub fn prune_older_than(&self, cutoff_ms: i64) -> Result<PruneReport, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let report = PruneReport {
            snapshots: tx.execute("DELETE FROM snapshots WHERE timestamp_ms < ?1", params![cutoff_ms])?,
            aggregates: tx.execute("DELETE FROM aggregates WHERE timestamp_ms < ?1", params![cutoff_ms])?,
            validation_events: tx.execute(
                "DELETE FROM validation_events WHERE timestamp_ms < ?1",
                params![cutoff_ms],
            )?,
            poll_gaps: tx.execute("DELETE FROM poll_gaps WHERE timestamp_ms < ?1", params![cutoff_ms])?,
        };
        tx.commit()?;
        Ok(report)
    }

    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        queries::latest_snapshot(&*self.lock()?)
    }

    pub fn count_snapshots_since(&self, since_ms: i64) -> Result<u64, StoreError> {
        queries::count_snapshots_since(&*self.lock()?, since_ms)
    }

    pub fn current_state(&self) -> Result<Option<CurrentState>, StoreError> {
        queries::current_state(&*self.lock()?)
    }

    pub fn validation_events_since(&self, since_ms: i64) -> Result<Vec<ValidationEvent>, StoreError> {
        queries::validation_events_since(&*self.lock()?, since_ms)
    }

    pub fn recent_transitions(&self, limit: u32) -> Result<Vec<StateTransition>, StoreError> {
        queries::recent_transitions(&*self.lock()?, limit)
    }

    pub fn poll_gaps_since(&self, since_ms: i64) -> Result<Vec<PollGap>, StoreError> {
        queries::poll_gaps_since(&*self.lock()?, since_ms)
    }
}

/// Read-only view used by the exporter and health checks.
pub struct StoreReader {
    conn: Connection,
}

impl StoreReader {
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        queries::latest_snapshot(&self.conn)
    }

    pub fn latest_aggregate(&self) -> Result<Option<AggregateSample>, StoreError> {
        queries::latest_aggregate(&self.conn)
    }

    pub fn current_state(&self) -> Result<Option<CurrentState>, StoreError> {
        queries::current_state(&self.conn)
    }

    pub fn validation_counts_since(&self, since_ms: i64) -> Result<ValidationCounts, StoreError> {
        queries::validation_counts_since(&self.conn, since_ms)
    }

    pub fn last_poll_gap(&self, collector: &str) -> Result<Option<PollGap>, StoreError> {
        queries::last_poll_gap(&self.conn, collector)
    }

    pub fn node_info(&self) -> Result<Option<NodeInfo>, StoreError> {
        queries::node_info(&self.conn)
    }

    pub fn count_snapshots_since(&self, since_ms: i64) -> Result<u64, StoreError> {
        queries::count_snapshots_since(&self.conn, since_ms)
    }

    pub fn state_accounting(&self) -> Result<Vec<StateAccountingEntry>, StoreError> {
        queries::state_accounting(&self.conn)
    }
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn state_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<ServerState> {
    let code: i64 = row.get(idx)?;
    ServerState::from_code(code).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, code))
}

mod queries {
    use super::*;

    pub fn latest_snapshot(conn: &Connection) -> Result<Option<Snapshot>, StoreError> {
        let snapshot = conn
            .query_row(
                r#"
                SELECT timestamp_ms, state, ledger_seq, ledger_hash, ledger_age_secs,
                       peers_total, peers_inbound, peers_outbound, peer_latency_p90_ms,
                       load_factor, validation_quorum, proposers, converge_time_secs, uptime_secs,
                       peers_insane, state_duration_secs, base_fee_xrp, reserve_base_xrp, reserve_inc_xrp
                FROM snapshots
                ORDER BY timestamp_ms DESC, id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok(Snapshot {
                        timestamp_ms: row.get(0)?,
                        state: state_from_row(row, 1)?,
                        ledger_seq: row.get(2)?,
                        ledger_hash: row.get(3)?,
                        ledger_age_secs: row.get(4)?,
                        peers_total: row.get(5)?,
                        peers_inbound: row.get(6)?,
                        peers_outbound: row.get(7)?,
                        peer_latency_p90_ms: row.get(8)?,
                        load_factor: row.get(9)?,
                        validation_quorum: row.get(10)?,
                        proposers: row.get(11)?,
                        converge_time_secs: row.get(12)?,
                        uptime_secs: row.get::<_, Option<i64>>(13)?.map(|v| v.max(0) as u64),
                        peers_insane: row.get(14)?,
                        state_duration_secs: row.get(15)?,
                        base_fee_xrp: row.get(16)?,
                        reserve_base_xrp: row.get(17)?,
                        reserve_inc_xrp: row.get(18)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn latest_aggregate(conn: &Connection) -> Result<Option<AggregateSample>, StoreError> {
        let sample = conn
            .query_row(
                r#"
                SELECT timestamp_ms, cpu_percent, memory_used_bytes, memory_total_bytes,
                       disk_used_bytes, io_latency_ms, queue_depth, open_ledger_size, job_queue_overflow,
                       transaction_rate, initial_sync_secs, peer_disconnects, peer_disconnects_resources
                FROM aggregates
                ORDER BY timestamp_ms DESC, id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok(AggregateSample {
                        timestamp_ms: row.get(0)?,
                        cpu_percent: row.get(1)?,
                        memory_used_bytes: row.get::<_, i64>(2)?.max(0) as u64,
                        memory_total_bytes: row.get::<_, i64>(3)?.max(0) as u64,
                        disk_used_bytes: row.get::<_, Option<i64>>(4)?.map(|v| v.max(0) as u64),
                        io_latency_ms: row.get(5)?,
                        queue_depth: row.get(6)?,
                        open_ledger_size: row.get(7)?,
                        job_queue_overflow: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
                        transaction_rate: row.get(9)?,
                        initial_sync_secs: row.get(10)?,
                        peer_disconnects: row.get::<_, Option<i64>>(11)?.map(|v| v.max(0) as u64),
                        peer_disconnects_resources: row.get::<_, Option<i64>>(12)?.map(|v| v.max(0) as u64),
                    })
                },
            )
            .optional()?;
        Ok(sample)
    }

    pub fn count_snapshots_since(conn: &Connection, since_ms: i64) -> Result<u64, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE timestamp_ms >= ?1",
            params![since_ms],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn current_state(conn: &Connection) -> Result<Option<CurrentState>, StoreError> {
        let current = conn
            .query_row(
                "SELECT state, entered_at_ms FROM current_state WHERE id = 1",
                [],
                |row| {
                    Ok(CurrentState {
                        state: state_from_row(row, 0)?,
                        entered_at_ms: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(current)
    }

    pub fn validation_counts_since(conn: &Connection, since_ms: i64) -> Result<ValidationCounts, StoreError> {
        let (agreed, missed): (i64, i64) = conn.query_row(
            r#"
            SELECT COALESCE(SUM(agreed), 0), COALESCE(SUM(1 - agreed), 0)
            FROM validation_events
            WHERE timestamp_ms >= ?1
            "#,
            params![since_ms],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ValidationCounts {
            agreed: agreed.max(0) as u64,
            missed: missed.max(0) as u64,
        })
    }

    pub fn validation_events_since(conn: &Connection, since_ms: i64) -> Result<Vec<ValidationEvent>, StoreError> {
        let mut stmt = conn.prepare(
            r#"
            SELECT ledger_seq, agreed, timestamp_ms
            FROM validation_events
            WHERE timestamp_ms >= ?1
            ORDER BY ledger_seq ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![since_ms], |row| {
                Ok(ValidationEvent {
                    ledger_seq: row.get(0)?,
                    agreed: row.get(1)?,
                    timestamp_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn recent_transitions(conn: &Connection, limit: u32) -> Result<Vec<StateTransition>, StoreError> {
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp_ms, from_state, to_state, duration_in_from_ms, ledger_seq
            FROM state_transitions
            ORDER BY timestamp_ms DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let transitions = stmt
            .query_map(params![limit.clamp(1, 1000)], |row| {
                Ok(StateTransition {
                    timestamp_ms: row.get(0)?,
                    from: state_from_row(row, 1)?,
                    to: state_from_row(row, 2)?,
                    duration_in_from_ms: row.get(3)?,
                    ledger_seq: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transitions)
    }

    fn poll_gap_from_row(row: &Row<'_>) -> rusqlite::Result<PollGap> {
        Ok(PollGap {
            timestamp_ms: row.get(0)?,
            collector: row.get(1)?,
            kind: row.get(2)?,
            detail: row.get(3)?,
        })
    }

    pub fn last_poll_gap(conn: &Connection, collector: &str) -> Result<Option<PollGap>, StoreError> {
        let gap = conn
            .query_row(
                r#"
                SELECT timestamp_ms, collector, kind, detail
                FROM poll_gaps
                WHERE collector = ?1
                ORDER BY timestamp_ms DESC, id DESC
                LIMIT 1
                "#,
                params![collector],
                poll_gap_from_row,
            )
            .optional()?;
        Ok(gap)
    }

    pub fn poll_gaps_since(conn: &Connection, since_ms: i64) -> Result<Vec<PollGap>, StoreError> {
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp_ms, collector, kind, detail
            FROM poll_gaps
            WHERE timestamp_ms >= ?1
            ORDER BY timestamp_ms ASC, id ASC
            "#,
        )?;
        let gaps = stmt
            .query_map(params![since_ms], poll_gap_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(gaps)
    }

    pub fn state_accounting(conn: &Connection) -> Result<Vec<StateAccountingEntry>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT state, duration_secs, transitions FROM state_accounting ORDER BY state ASC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(StateAccountingEntry {
                    state: state_from_row(row, 0)?,
                    duration_secs: row.get(1)?,
                    transitions: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn node_info(conn: &Connection) -> Result<Option<NodeInfo>, StoreError> {
        let info = conn
            .query_row(
                r#"
                SELECT build_version, pubkey_validator, node_size, complete_ledgers, updated_at_ms
                FROM node_info WHERE id = 1
                "#,
                [],
                |row| {
                    Ok(NodeInfo {
                        build_version: row.get(0)?,
                        pubkey_validator: row.get(1)?,
                        node_size: row.get(2)?,
                        complete_ledgers: row.get(3)?,
                        updated_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }
}
