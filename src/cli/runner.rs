//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::CdcConfig;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::source::{FixtureSource, SourceCollaborators};
use crate::state::{FileStateStore, StateStore, SyncIdentity};
use crate::stream::MessageStream;
use crate::types::Message;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Check => self.check().await,
            Commands::Plan => self.plan().await,
            Commands::Read { tables, dry_run } => self.read(tables.as_deref(), *dry_run).await,
            Commands::State => self.state().await,
        }
    }

    /// Load the sync configuration
    fn load_config(&self) -> Result<CdcConfig> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use --config)"))?;
        CdcConfig::from_file(path)
    }

    /// Load the source definition
    fn load_source(&self) -> Result<Arc<FixtureSource>> {
        let path = self
            .cli
            .source
            .as_ref()
            .ok_or_else(|| Error::config("Source file not specified (use --source)"))?;
        Ok(Arc::new(FixtureSource::from_file(path)?))
    }

    fn store(&self) -> Arc<dyn StateStore> {
        Arc::new(FileStateStore::new(&self.cli.state_dir))
    }

    fn orchestrator(&self, config: CdcConfig) -> Result<Orchestrator> {
        let source = self.load_source()?;
        Ok(Orchestrator::new(
            config,
            SourceCollaborators::from_source(source),
            self.store(),
        ))
    }

    /// Check configuration, slot and checkpoint
    async fn check(&self) -> Result<()> {
        let orchestrator = self.orchestrator(self.load_config()?)?;

        self.output_message(&Message::info(format!(
            "Checking replication slot {}",
            orchestrator.config().replication_slot
        )))?;

        let status = match orchestrator.check().await {
            Ok(report) if report.success => json!({
                "status": "SUCCEEDED",
                "message": format!(
                    "Slot {} confirmed at {}",
                    report.slot, report.confirmed_flushed
                ),
                "report": report,
            }),
            Ok(report) => json!({
                "status": "FAILED",
                "message": report.message.clone().unwrap_or_default(),
                "report": report,
            }),
            Err(e) => json!({
                "status": "FAILED",
                "message": format!("Check failed: {e}"),
            }),
        };

        self.output_message(&json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": status,
        }))
    }

    /// Print the plan for a run; planning never commits or advances the log
    async fn plan(&self) -> Result<()> {
        let config = self.load_config()?;
        let plan = self.orchestrator(config)?.plan().await?;
        self.output_message(&json!({
            "type": "PLAN",
            "plan": plan,
        }))
    }

    /// Run a sync
    async fn read(&self, tables: Option<&str>, dry_run: bool) -> Result<()> {
        let mut config = self.load_config()?;
        if let Some(tables) = tables {
            config = config.with_tables(
                tables
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty()),
            );
        }
        if dry_run {
            config = config.with_dry_run(true);
        }

        let output = self.orchestrator(config)?.run().await?;
        info!(
            "Starting {} with {} stage(s)",
            output.plan.handoff,
            output.plan.stages.len()
        );

        let mut messages = output.stream.into_message_stream();
        let written = self.write_messages(&mut messages).await;
        let closed = messages.close().await;

        let records = written?;
        closed?;
        info!("Read {} record(s)", records);
        Ok(())
    }

    /// Print every message, returning the number of records
    async fn write_messages(&self, messages: &mut MessageStream) -> Result<usize> {
        let mut records = 0usize;
        while let Some(message) = messages.next().await {
            let message = message?;
            if message.is_record() {
                records += 1;
            }
            self.output_message(&message)?;
        }
        Ok(records)
    }

    /// Print the saved state
    async fn state(&self) -> Result<()> {
        let config = self.load_config()?;
        let identity = SyncIdentity::new(&config.connection_id, &config.replication_slot);
        match self.store().load(&identity).await? {
            Some(state) => self.output_message(&Message::State(state)),
            None => self.output_message(&Message::info(format!(
                "No saved state for connection '{}' slot '{}'",
                identity.connection_id, identity.slot
            ))),
        }
    }

    /// Output a message
    fn output_message<T: Serialize>(&self, msg: &T) -> Result<()> {
        let line = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(msg)?,
            OutputFormat::Pretty => serde_json::to_string_pretty(msg)?,
        };
        println!("{line}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{LogPosition, PositionMarker};
    use crate::types::TableId;
    use clap::Parser;
    use std::path::Path;
    use tempfile::tempdir;

    const SOURCE: &str = r#"
slot:
  name: airbyte_slot
  confirmed_flushed: "0/64"
current_position: "0/3E8"
tables:
  - table: public.users
    rows_per_page: 1
    rows:
      - {id: 1}
      - {id: 2}
      - {id: 3}
"#;

    fn runner(dir: &Path, config: &str, command: &[&str]) -> Runner {
        let config_path = dir.join("sync.yaml");
        let source_path = dir.join("source.yaml");
        std::fs::write(&config_path, config).unwrap();
        std::fs::write(&source_path, SOURCE).unwrap();

        let mut args = vec![
            "solidafy-cdc".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
            "--source".to_string(),
            source_path.display().to_string(),
            "--state-dir".to_string(),
            dir.join("state").display().to_string(),
        ];
        args.extend(command.iter().map(ToString::to_string));
        Runner::new(Cli::parse_from(args))
    }

    #[tokio::test]
    async fn test_plan_accepts_while_reading_commits() {
        let dir = tempdir().unwrap();
        let runner = runner(
            dir.path(),
            "connection_id: conn\nreplication_slot: airbyte_slot\npublication: airbyte_pub\nlsn_commit_behaviour: while_reading_data\ntables: [public.users]\n",
            &["plan"],
        );

        runner.plan().await.unwrap();
        let saved = runner
            .store()
            .load(&SyncIdentity::new("conn", "airbyte_slot"))
            .await
            .unwrap();
        assert!(saved.is_none());
    }

    #[tokio::test]
    async fn test_read_stopped_early_saves_delivered_state() {
        let dir = tempdir().unwrap();
        let runner = runner(
            dir.path(),
            "connection_id: conn\nreplication_slot: airbyte_slot\npublication: airbyte_pub\nstate_checkpoint_interval: 1\ntables: [public.users]\n",
            &["read"],
        );

        let output = runner
            .orchestrator(runner.load_config().unwrap())
            .unwrap()
            .run()
            .await
            .unwrap();
        let mut messages = output.stream.into_message_stream();
        // record, state, record
        for _ in 0..3 {
            messages.next().await.unwrap().unwrap();
        }
        messages.close().await.unwrap();

        let saved = runner
            .store()
            .load(&SyncIdentity::new("conn", "airbyte_slot"))
            .await
            .unwrap()
            .unwrap();
        // the second record's checkpoint was never handed out
        assert_eq!(saved.last_known_log_position, LogPosition::from_u64(0x3E8));
        assert_eq!(
            saved
                .table_state(&TableId::new("public", "users"))
                .resume_progress()
                .map(|p| p.marker),
            Some(PositionMarker::new(0, 1))
        );
    }
}
