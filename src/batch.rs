use crate::config::{ConnectionConfig, SqlSource};
use crate::error::{ExecError, Result};
use crate::session::{Executor, SessionHandle, one_line};

/// Fragments shorter than this once spaces and newlines are removed are noise
/// left over from splitting, e.g. the empty tail after a final `;`.
const MIN_STATEMENT_LEN: usize = 3;

/// Split a SQL blob on `;` and keep the fragments worth sending.
pub fn split_statements(blob: &str) -> Vec<&str> {
    blob.split(';')
        .filter(|fragment| {
            let blanks = fragment.bytes().filter(|b| *b == b' ' || *b == b'\n').count();
            fragment.len() - blanks >= MIN_STATEMENT_LEN
        })
        .collect()
}

/// What one batch run did. A batch always completes; failures are counted.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub executed: Vec<String>,
    pub failures: Vec<ExecError>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.executed.len()
            - self
                .failures
                .iter()
                .filter(|f| matches!(f, ExecError::StatementFailed { .. }))
                .count()
    }
}

async fn run_blob(
    session: &mut SessionHandle,
    blob: &str,
    origin: Option<&str>,
    report: &mut BatchReport,
) {
    for statement in split_statements(blob) {
        report.executed.push(one_line(statement));
        if let Err(e) = session.exec_statement_in(statement, origin).await {
            report.failures.push(e);
        }
    }
}

/// Run every source in order against one session. A statement failure never
/// stops the batch; an unreadable file skips only that file.
pub async fn run_batch(
    session: &mut SessionHandle,
    sources: &[SqlSource],
    report: &mut BatchReport,
) {
    for source in sources {
        match source {
            SqlSource::Inline(blob) => run_blob(session, blob, None, report).await,
            SqlSource::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    tracing::debug!("running {}", path.display());
                    let before = report.failures.len();
                    let origin = path.display().to_string();
                    run_blob(session, &content, Some(&origin), report).await;
                    let failed = report.failures.len() - before;
                    if failed > 0 {
                        tracing::warn!("{failed} statement(s) in {} failed", path.display());
                    }
                }
                Err(source) => {
                    tracing::warn!("read {} failed, error: {source}", path.display());
                    session
                        .alerts()
                        .notify(&path.display().to_string(), &source.to_string())
                        .await;
                    report.failures.push(ExecError::FileReadFailed {
                        path: path.clone(),
                        source,
                    });
                }
            },
        }
    }
}

impl Executor {
    /// Open a session, run the configured SQL, release the session.
    ///
    /// Only a connect failure is returned as an error.
    pub async fn run_sql_batch(
        &self,
        config: &ConnectionConfig,
        sources: &[SqlSource],
    ) -> Result<BatchReport> {
        let mut session = self.open(config).await?;
        let mut report = BatchReport::default();
        run_batch(&mut session, sources, &mut report).await;
        session.close().await;
        tracing::info!(
            "batch finished: {} statement(s), {} failure(s)",
            report.executed.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
