use std::fmt;
use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;
use crate::partition::Granularity;
use crate::scheduler::CronSchedule;

/// Command line / environment configuration.
///
/// Every flag can also be set through its `MYSQL_CRON_*` variable, and a `.env`
/// file in the working directory is loaded before parsing.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mysql-cron",
    about = "A crontab tool for MySQL",
    after_help = "Example:\n  mysql-cron --host 10.0.0.5 --user root --crontab '0 */5 * * * *' --files t.sql"
)]
pub struct Cli {
    /// MySQL host
    #[arg(long, default_value = "127.0.0.1", env = "MYSQL_CRON_HOST")]
    pub host: String,

    /// MySQL port
    #[arg(long, default_value_t = 3306, env = "MYSQL_CRON_PORT")]
    pub port: u16,

    /// MySQL user
    #[arg(long, default_value = "root", env = "MYSQL_CRON_USER")]
    pub user: String,

    /// Password for user
    #[arg(long, default_value = "", env = "MYSQL_CRON_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Default database; also used for partition tables given without one
    #[arg(long, default_value = "default", env = "MYSQL_CRON_DATABASE")]
    pub database: String,

    /// SQL to run, several statements joined by `;`: "select 1;select 1"
    #[arg(long, env = "MYSQL_CRON_QUERIES")]
    pub queries: Option<String>,

    /// SQL files to execute: 1.sql,2.sql
    #[arg(long, env = "MYSQL_CRON_FILES")]
    pub files: Option<String>,

    /// Cron expression (seconds first) for the SQL batch
    #[arg(long, default_value = "0 */5 * * * *", env = "MYSQL_CRON_CRONTAB")]
    pub crontab: String,

    /// Partitioned tables to maintain: db1.t1,t2
    #[arg(long, env = "MYSQL_CRON_PTTABLE")]
    pub pttable: Option<String>,

    /// Prefix of partition names
    #[arg(long, default_value = "p", env = "MYSQL_CRON_PTPREFIX")]
    pub ptprefix: String,

    /// Partition granularity: year, month or day
    #[arg(long, default_value = "month", env = "MYSQL_CRON_PTINTERVAL")]
    pub ptinterval: String,

    /// Overrides the cron expression of the partition jobs
    #[arg(long, env = "MYSQL_CRON_PTCRONTAB")]
    pub ptcrontab: Option<String>,

    /// Webhook receiving failure notifications
    #[arg(long, env = "MYSQL_CRON_WEBHOOK")]
    pub webhook: Option<String>,

    /// Mobiles to mention in notifications: 158xxxx,136xxxx
    #[arg(long, default_value = "@all", env = "MYSQL_CRON_MENTION")]
    pub mention: String,

    /// Service name prepended to notifications
    #[arg(long, default_value = "", env = "MYSQL_CRON_SERVICE")]
    pub service: String,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "MYSQL_CRON_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Do not run the SQL batch once at startup
    #[arg(long, default_value_t = false, env = "MYSQL_CRON_SKIP_INITIAL_RUN")]
    pub skip_initial_run: bool,
}

/// Parameters for opening one MySQL session. Never held as a live handle.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionConfig {
    /// Same server and credentials, different default schema.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// A table whose partitions are rolled forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTarget {
    pub database: String,
    pub table: String,
}

impl PartitionTarget {
    /// Resolve `db.table` or a bare `table` (which lands in `default_db`).
    pub fn parse(raw: &str, default_db: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let (database, table) = match raw.split_once('.') {
            Some((db, tb)) => (db.trim(), tb.trim()),
            None => (default_db, raw),
        };
        if database.is_empty() || table.is_empty() || table.contains('.') {
            return Err(ConfigError::InvalidTable(raw.to_string()));
        }
        Ok(Self {
            database: database.to_string(),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for PartitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Where the batch job's SQL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSource {
    /// A `;`-joined blob given on the command line.
    Inline(String),
    /// A file read fresh on every run.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PartitionSettings {
    pub targets: Vec<PartitionTarget>,
    pub prefix: String,
    pub granularity: Granularity,
    pub schedule: CronSchedule,
}

#[derive(Debug, Clone, Default)]
pub struct AlertSettings {
    pub webhook: Option<reqwest::Url>,
    pub mentions: Vec<String>,
    pub service: Option<String>,
}

/// Validated configuration the rest of the process runs on.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub batch_schedule: CronSchedule,
    pub sources: Vec<SqlSource>,
    pub partitions: Option<PartitionSettings>,
    pub alert: AlertSettings,
    pub log_file: Option<PathBuf>,
    pub initial_run: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let sources = match (non_empty(&self.queries), non_empty(&self.files)) {
            (None, None) => return Err(ConfigError::MissingSqlSource),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSqlSources),
            (Some(queries), None) => vec![SqlSource::Inline(queries.to_string())],
            (None, Some(files)) => files
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| SqlSource::File(PathBuf::from(f)))
                .collect(),
        };

        let batch_schedule = CronSchedule::parse(&self.crontab)?;

        let partitions = match non_empty(&self.pttable) {
            Some(tables) => {
                let granularity: Granularity = self.ptinterval.parse()?;
                let schedule = match non_empty(&self.ptcrontab) {
                    Some(expr) => CronSchedule::parse(expr)?,
                    None => CronSchedule::parse(granularity.default_schedule())?,
                };
                let targets = tables
                    .split(',')
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| PartitionTarget::parse(t, &self.database))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(PartitionSettings {
                    targets,
                    prefix: self.ptprefix.clone(),
                    granularity,
                    schedule,
                })
            }
            None => None,
        };

        let webhook = match non_empty(&self.webhook) {
            Some(url) => Some(reqwest::Url::parse(url).map_err(|e| {
                ConfigError::InvalidWebhook {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        let mentions = self
            .mention
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        let service = Some(self.service.trim().to_string()).filter(|s| !s.is_empty());

        Ok(Settings {
            connection: ConnectionConfig {
                host: self.host,
                port: self.port,
                user: self.user,
                password: self.password,
                database: self.database,
            },
            batch_schedule,
            sources,
            partitions,
            alert: AlertSettings {
                webhook,
                mentions,
                service,
            },
            log_file: self.log_file,
            initial_run: !self.skip_initial_run,
        })
    }
}
