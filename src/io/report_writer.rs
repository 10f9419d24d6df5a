//! Sink stage: outcome statistics and the CSV report.

use crate::domain::Domain;
use crate::pipeline::OutcomeStats;
use crate::worker::Stage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows collected before a blocking write.
const WRITE_BATCH: usize = 512;

/// Counts every consumed domain by outcome and writes the selected ones
/// to a CSV report (`name,popularity`, no header).
///
/// Selected rows are collected in memory and written on the blocking pool a
/// batch at a time. After a failed write the report is abandoned and later
/// rows no longer count as reported.
pub struct ReportWriter {
    path: PathBuf,
    report_outcomes: Vec<String>,
    outcomes: Arc<OutcomeStats>,
    writer: Option<csv::Writer<File>>,
    pending: Vec<(String, u64)>,
}

impl ReportWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        report_outcomes: Vec<String>,
        outcomes: Arc<OutcomeStats>,
    ) -> Self {
        Self {
            path: path.into(),
            report_outcomes,
            outcomes,
            writer: None,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `domain` belongs in the report.
    pub fn item_filter(&self, domain: &Domain) -> bool {
        self.report_outcomes.iter().any(|o| *o == domain.outcome)
    }

    pub fn outcomes(&self) -> &Arc<OutcomeStats> {
        &self.outcomes
    }

    /// Write the pending rows, then flush the file if `flush` is set.
    async fn write_pending(&mut self, flush: bool) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let rows = std::mem::take(&mut self.pending);
        let writer = tokio::task::spawn_blocking(move || write_rows(writer, &rows, flush))
            .await
            .map_err(|e| anyhow::anyhow!("Write task panicked: {}", e))?
            .with_context(|| format!("Failed to write report {}", self.path.display()))?;
        self.writer = Some(writer);
        Ok(())
    }
}

fn write_rows(
    mut writer: csv::Writer<File>,
    rows: &[(String, u64)],
    flush: bool,
) -> Result<csv::Writer<File>> {
    for (name, popularity) in rows {
        writer.write_record([name.as_str(), popularity.to_string().as_str()])?;
    }
    if flush {
        writer.flush()?;
    }
    Ok(writer)
}

#[async_trait]
impl Stage for ReportWriter {
    type Input = Domain;
    type Output = ();

    fn name(&self) -> &str {
        "CSVWriter"
    }

    fn entity(&self) -> String {
        self.path.display().to_string()
    }

    fn item_unit(&self) -> &str {
        "domains"
    }

    async fn setup(&mut self) -> Result<()> {
        let path = self.path.clone();
        let writer = tokio::task::spawn_blocking(move || {
            csv::WriterBuilder::new().has_headers(false).from_path(&path)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Create task panicked: {}", e))?
        .with_context(|| format!("Failed to create report {}", self.path.display()))?;
        self.writer = Some(writer);
        Ok(())
    }

    async fn process(&mut self, item: Domain) -> Option<()> {
        self.outcomes.record(&item.outcome);
        if !self.item_filter(&item) || self.writer.is_none() {
            return None;
        }

        self.pending.push((item.name, item.popularity));
        if self.pending.len() >= WRITE_BATCH {
            if let Err(e) = self.write_pending(false).await {
                tracing::warn!("{:#}", e);
            }
        }
        Some(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.write_pending(true).await?;
        self.writer = None;
        Ok(())
    }
}
