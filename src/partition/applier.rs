use crate::config::{ConnectionConfig, PartitionTarget};
use crate::error::{ExecError, Result};
use crate::partition::PartitionPlan;
use crate::session::Executor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    Added { name: String },
    /// The table already has `existing`, which is not older than the plan.
    AlreadyPresent { existing: String },
    /// The DDL was sent and rejected; the next tick tries again.
    AddFailed { name: String },
}

/// Escape for a single-quoted MySQL string literal.
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn max_partition_query(target: &PartitionTarget) -> String {
    format!(
        "SELECT PARTITION_NAME, PARTITION_EXPRESSION, CREATE_TIME FROM information_schema.partitions \
         WHERE table_schema = '{}' AND table_name = '{}' ORDER BY PARTITION_NAME DESC LIMIT 1",
        quote(&target.database),
        quote(&target.table)
    )
}

impl Executor {
    /// Add `plan` to `target` unless the table already has a partition at
    /// least as new. Connect and metadata failures abort this call only.
    pub async fn maintain_partition(
        &self,
        config: &ConnectionConfig,
        target: &PartitionTarget,
        plan: &PartitionPlan,
    ) -> Result<PartitionOutcome> {
        let mut session = self.open(config).await?;

        let rows = match session.exec_query(&max_partition_query(target)).await {
            Ok(rows) => rows,
            Err(e) => {
                session.close().await;
                let err = ExecError::MetadataQueryFailed {
                    target: target.to_string(),
                    source: Box::new(e),
                };
                tracing::error!("{err}");
                return Err(err);
            }
        };

        // No row (or NULL) means no partition yet; "" sorts before any plan.
        let newest = rows.first();
        let existing = newest
            .and_then(|r| r.get("PARTITION_NAME"))
            .unwrap_or_default()
            .to_string();
        tracing::info!(
            "max partition is {existing:?} (created {}) for {target}",
            newest.and_then(|r| r.get("CREATE_TIME")).unwrap_or("-")
        );

        let outcome = if existing.as_str() < plan.name.as_str() {
            tracing::info!("ready to add partition {} for {target}", plan.name);
            match session.exec_statement(&plan.add_partition_ddl(&target.table)).await {
                Ok(_) => {
                    tracing::info!("add partition {} successful for {target}", plan.name);
                    PartitionOutcome::Added {
                        name: plan.name.clone(),
                    }
                }
                Err(e) => {
                    tracing::warn!("add partition {} failed for {target}: {e}", plan.name);
                    PartitionOutcome::AddFailed {
                        name: plan.name.clone(),
                    }
                }
            }
        } else {
            tracing::info!("{target} already have partition {}, skip add", plan.name);
            PartitionOutcome::AlreadyPresent { existing }
        };

        session.close().await;
        Ok(outcome)
    }
}
