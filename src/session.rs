//! One MySQL connection per job firing.
//!
//! A firing opens a [`SessionHandle`] through [`Executor::open`], runs its
//! statements, and closes it. Nothing is pooled and no handle outlives the
//! firing that opened it; dropping a handle without `close` still tears the
//! socket down.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Column, ConnectOptions, Connection, Row as _};

use crate::alert::AlertSink;
use crate::config::ConnectionConfig;
use crate::error::{ExecError, Result};

/// A result row: column name to value, in select-list order.
///
/// Values are the raw text bytes MySQL sent. SQL NULL becomes an empty
/// string, so NULL and `''` cannot be told apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    /// Case-insensitive lookup, since information_schema column case varies by server.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }
}

/// A live database connection.
#[async_trait]
pub trait Session: Send {
    async fn ping(&mut self) -> std::result::Result<(), sqlx::Error>;
    async fn execute(&mut self, sql: &str) -> std::result::Result<u64, sqlx::Error>;
    async fn fetch_rows(&mut self, sql: &str) -> std::result::Result<Vec<Row>, sqlx::Error>;
    async fn close(self: Box<Self>) -> std::result::Result<(), sqlx::Error>;
}

/// Opens sessions. The production implementation is [`MySqlConnector`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> std::result::Result<Box<dyn Session>, sqlx::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

/// Options for a session that keeps the server's own `time_zone` and
/// `sql_mode`. `UNIX_TIMESTAMP("...")` in partition DDL is evaluated in the
/// session time zone, and `||` must keep meaning OR in operator SQL.
pub fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .timezone(None::<String>)
        .pipes_as_concat(false)
        .no_engine_substitution(false)
        .disable_statement_logging()
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> std::result::Result<Box<dyn Session>, sqlx::Error> {
        let conn = connect_options(config).connect().await?;
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl Session for MySqlSession {
    async fn ping(&mut self) -> std::result::Result<(), sqlx::Error> {
        self.conn.ping().await
    }

    // Text protocol: DDL such as ALTER TABLE ... ADD PARTITION is not always
    // accepted as a prepared statement.
    async fn execute(&mut self, sql: &str) -> std::result::Result<u64, sqlx::Error> {
        let done = sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(done.rows_affected())
    }

    async fn fetch_rows(&mut self, sql: &str) -> std::result::Result<Vec<Row>, sqlx::Error> {
        let rows = sqlx::Executor::fetch_all(&mut self.conn, sqlx::raw_sql(sql)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut columns = Vec::with_capacity(row.columns().len());
            for (idx, column) in row.columns().iter().enumerate() {
                let value = match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes.unwrap_or_default()).into_owned(),
                    Err(e) => {
                        tracing::warn!("scan column {} failed: {e}", column.name());
                        String::new()
                    }
                };
                columns.push((column.name().to_string(), value));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), sqlx::Error> {
        let MySqlSession { conn } = *self;
        conn.close().await
    }
}

/// Collapse newlines so a statement fits on one log line.
pub fn one_line(sql: &str) -> String {
    sql.replace('\n', " ")
}

/// Opens sessions and reports their failures to the alert sink.
#[derive(Clone)]
pub struct Executor {
    connector: Arc<dyn Connector>,
    alerts: Arc<dyn AlertSink>,
}

impl Executor {
    pub fn new(connector: Arc<dyn Connector>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { connector, alerts }
    }

    /// Connect and ping. On failure nothing else may be done with this config
    /// for the current firing.
    pub async fn open(&self, config: &ConnectionConfig) -> Result<SessionHandle> {
        let connected = match self.connector.connect(config).await {
            Ok(mut session) => match session.ping().await {
                Ok(()) => Ok(session),
                Err(e) => {
                    // Best effort; the ping already says the link is gone.
                    let _ = session.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match connected {
            Ok(inner) => {
                tracing::debug!("connected to mysql {config}");
                Ok(SessionHandle {
                    inner,
                    alerts: self.alerts.clone(),
                })
            }
            Err(source) => {
                let err = ExecError::ConnectFailed {
                    target: config.to_string(),
                    source,
                };
                tracing::error!("{err}");
                self.alerts
                    .notify("Connect to mysql failed", &err.to_string())
                    .await;
                Err(err)
            }
        }
    }
}

/// An open session owned by exactly one job firing.
pub struct SessionHandle {
    inner: Box<dyn Session>,
    alerts: Arc<dyn AlertSink>,
}

impl SessionHandle {
    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    /// Run a non-query statement. A failure is logged and alerted here; the
    /// returned error is informational and callers keep going.
    pub async fn exec_statement(&mut self, sql: &str) -> Result<u64> {
        self.exec_statement_in(sql, None).await
    }

    /// Like [`exec_statement`](Self::exec_statement); `origin` (usually a file
    /// name) is appended to the alert context as `<sql>(<origin>)`.
    pub async fn exec_statement_in(&mut self, sql: &str, origin: Option<&str>) -> Result<u64> {
        let line = one_line(sql);
        tracing::info!("execute SQL: {line}");
        match self.inner.execute(sql).await {
            Ok(affected) => Ok(affected),
            Err(source) => {
                let context = match origin {
                    Some(origin) => format!("{line}({origin})"),
                    None => line.clone(),
                };
                tracing::error!("execute SQL [{context}] failed, error: {source}");
                self.alerts.notify(&context, &source.to_string()).await;
                Err(ExecError::StatementFailed { sql: line, source })
            }
        }
    }

    /// Run a query and scan every row as text.
    pub async fn exec_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let line = one_line(sql);
        tracing::info!("execute SQL: {line}");
        match self.inner.fetch_rows(sql).await {
            Ok(rows) => Ok(rows),
            Err(source) => {
                tracing::error!("execute SQL [{line}] failed, error: {source}");
                self.alerts.notify(&line, &source.to_string()).await;
                Err(ExecError::QueryFailed { sql: line, source })
            }
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.inner.close().await {
            tracing::warn!("closing mysql session failed: {e}");
        }
    }
}
