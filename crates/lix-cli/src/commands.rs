use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use lix_projection::domains::all_tables;
use lix_projection::{EngineConfig, ExtensionReport, ProjectionEngine};
use lix_store::InMemoryStore;
use lix_types::LedgerExtension;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::*;

/// Dispatch a parsed command line to its handler.
pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Project(args) => cmd_project(args, &cli.format).await,
        Command::Schema => cmd_schema(),
        Command::Config(args) => cmd_config(args),
    }
}

/// Input file shape: a batch of extensions or a single one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerInput {
    Batch { extensions: Vec<LedgerExtension> },
    Single(LedgerExtension),
}

impl LedgerInput {
    fn into_extensions(self) -> Vec<LedgerExtension> {
        match self {
            Self::Batch { extensions } => extensions,
            Self::Single(extension) => vec![extension],
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_input(text: &str) -> anyhow::Result<Vec<LedgerExtension>> {
    let input: LedgerInput = serde_json::from_str(text).context("parsing ledger input")?;
    Ok(input.into_extensions())
}

async fn cmd_project(args: ProjectArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let extensions = parse_input(&text)?;
    info!(input = %args.input.display(), extensions = extensions.len(), "ledger input loaded");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let engine = ProjectionEngine::new(InMemoryStore::new(), config);
    let mut reports = Vec::with_capacity(extensions.len());
    for (index, extension) in extensions.iter().enumerate() {
        let report = engine
            .extend(extension, &cancel)
            .await
            .with_context(|| format!("extension #{index}"))?;
        if matches!(format, OutputFormat::Text) {
            print_report(index, &report);
        }
        reports.push(report);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            let rows: u64 = reports.iter().map(ExtensionReport::total_rows).sum();
            println!(
                "{} {} extensions, {} rows",
                "✓".green().bold(),
                reports.len(),
                rows.to_string().bold()
            );
        }
    }
    Ok(())
}

fn print_report(index: usize, report: &ExtensionReport) {
    let versions = match report.state_versions {
        Some((first, last)) => format!("{first}..={last}"),
        None => "-".to_string(),
    };
    println!(
        "{} extension #{} (state versions {}): {} events, {} entities, {} ids",
        "✓".green(),
        index,
        versions.yellow(),
        report.events,
        report.entities_resolved,
        report.ids_allocated
    );
    for (table, rows) in &report.rows_written {
        println!("  {:<52} {}", table.cyan(), rows);
    }
    for stage in &report.stages {
        println!("  {:<52} {:.2} ms", stage.name.dimmed(), stage.elapsed_ms);
    }
}

fn cmd_schema() -> anyhow::Result<()> {
    for table in all_tables() {
        println!("{}", table.create_statement());
        println!("-- {}\n", table.copy_statement().dimmed());
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn single_extension_input() {
        let text = r#"{"transactions": [{"state_version": 1, "events": []}]}"#;
        let extensions = parse_input(text).unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].state_version_range(), Some((1, 1)));
    }

    #[test]
    fn batch_input() {
        let text = r#"{"extensions": [
            {"transactions": [{"state_version": 1}]},
            {"transactions": [{"state_version": 2, "events": [
                {"entity": "account_a", "substate": {"type": "default_deposit_rule", "rule": "accept"}}
            ]}]}
        ]}"#;
        let extensions = parse_input(text).unwrap();
        assert_eq!(extensions.len(), 2);
        assert_eq!(extensions[1].event_count(), 1);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stage_timings = false\n[domains]\nmetadata = false").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert!(!config.stage_timings);
        assert!(!config.domains.metadata);
        assert!(config.domains.role_assignment);
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());
    }

    #[tokio::test]
    async fn project_command_runs_input_file() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        write!(
            input,
            r#"{{"transactions": [{{"state_version": 3, "events": [
                {{"entity": "account_a", "substate": {{"type": "metadata_entry", "key": "name", "value": "6869"}}}}
            ]}}]}}"#
        )
        .unwrap();

        let args = ProjectArgs {
            input: input.path().to_path_buf(),
            config: None,
        };
        cmd_project(args, &OutputFormat::Json).await.unwrap();
    }
}
