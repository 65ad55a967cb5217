//! Fakes for the database and alert seams, shared by the unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::alert::AlertSink;
use crate::config::ConnectionConfig;
use crate::session::{Connector, Row, Session};

pub fn test_connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".into(),
        port: 3306,
        user: "root".into(),
        password: "secret".into(),
        database: "metrics".into(),
    }
}

#[derive(Default)]
struct FakeState {
    opened: usize,
    closed: usize,
    databases: Vec<String>,
    executed: Vec<String>,
    queried: Vec<String>,
}

/// In-memory stand-in for MySQL.
///
/// Statements containing any `fail_on` needle fail; queries containing a
/// `with_rows` needle return those rows. ADD PARTITION statements that
/// succeed are remembered so later partition lookups see them.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
    unreachable: bool,
    ping_fails: bool,
    fail_on: Vec<String>,
    rows: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    query_fails: bool,
    track_partitions: bool,
    delay: Option<std::time::Duration>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            unreachable: true,
            ..Self::default()
        })
    }

    fn edit(self: Arc<Self>, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut me = Arc::try_unwrap(self).unwrap_or_else(|shared| (*shared).clone());
        f(&mut me);
        Arc::new(me)
    }

    pub fn failing_ping(self: Arc<Self>) -> Arc<Self> {
        self.edit(|c| c.ping_fails = true)
    }

    pub fn fail_on(self: Arc<Self>, needle: &str) -> Arc<Self> {
        let needle = needle.to_string();
        self.edit(|c| c.fail_on.push(needle))
    }

    pub fn failing_queries(self: Arc<Self>) -> Arc<Self> {
        self.edit(|c| c.query_fails = true)
    }

    pub fn with_rows(self: Arc<Self>, needle: &str, rows: Vec<Row>) -> Arc<Self> {
        self.rows.lock().unwrap().insert(needle.to_string(), rows);
        self
    }

    /// Successful ADD PARTITION statements become the new maximum partition.
    pub fn tracking_partitions(self: Arc<Self>) -> Arc<Self> {
        self.edit(|c| c.track_partitions = true)
    }

    pub fn with_delay(self: Arc<Self>, delay: std::time::Duration) -> Arc<Self> {
        self.edit(|c| c.delay = Some(delay))
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.lock().unwrap().databases.clone()
    }

    /// Every non-query statement attempted, failed ones included.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn queried(&self) -> Vec<String> {
        self.state.lock().unwrap().queried.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, sqlx::Error> {
        if self.unreachable {
            return Err(sqlx::Error::Protocol("connection refused".into()));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.opened += 1;
            state.databases.push(config.database.clone());
        }
        Ok(Box::new(FakeSession {
            owner: self.clone(),
        }))
    }
}

struct FakeSession {
    owner: FakeConnector,
}

fn partition_name(sql: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    let at = upper.find("(PARTITION ")? + "(PARTITION ".len();
    sql[at..].split_whitespace().next().map(str::to_string)
}

#[async_trait]
impl Session for FakeSession {
    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        if self.owner.ping_fails {
            return Err(sqlx::Error::Protocol("server has gone away".into()));
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        if let Some(delay) = self.owner.delay {
            tokio::time::sleep(delay).await;
        }
        self.owner.state.lock().unwrap().executed.push(sql.to_string());
        if let Some(needle) = self.owner.fail_on.iter().find(|n| sql.contains(n.as_str())) {
            return Err(sqlx::Error::Protocol(format!("near '{needle}': syntax error")));
        }
        if self.owner.track_partitions {
            if let Some(name) = partition_name(sql) {
                let row = Row::new(vec![
                    ("PARTITION_NAME".into(), name),
                    ("PARTITION_EXPRESSION".into(), "`ts`".into()),
                    ("CREATE_TIME".into(), "2024-03-15 03:00:00".into()),
                ]);
                self.owner
                    .rows
                    .lock()
                    .unwrap()
                    .insert("information_schema.partitions".into(), vec![row]);
            }
        }
        Ok(0)
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<Row>, sqlx::Error> {
        self.owner.state.lock().unwrap().queried.push(sql.to_string());
        if self.owner.query_fails {
            return Err(sqlx::Error::Protocol("lost connection during query".into()));
        }
        let rows = self.owner.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.owner.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Records every notification.
#[derive(Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, context: &str, error: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((context.to_string(), error.to_string()));
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log lines emitted on this thread while the value is alive.
pub struct CapturedLogs {
    buf: SharedBuf,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.0.lock().unwrap()).into_owned()
    }

    pub fn lines_containing(&self, needle: &str) -> usize {
        self.contents().lines().filter(|l| l.contains(needle)).count()
    }
}

/// Route `tracing` output of the current thread into a buffer. Works with the
/// default single-threaded `#[tokio::test]` runtime.
pub fn capture_logs() -> CapturedLogs {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    CapturedLogs {
        buf,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
