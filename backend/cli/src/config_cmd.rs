//! `config` subcommand: show or edit the persisted settings.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, CommandFactory};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use fastocr_config::{redact, AppSettings, ConfigStore};

use crate::terminal_output::{self as out, paint, render_table, DIM};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the current settings
    #[arg(long)]
    pub show: bool,

    /// Print the API key unmasked (with --show)
    #[arg(long)]
    pub show_key: bool,

    /// Prompt for each setting; Enter keeps the current value
    #[arg(long)]
    pub update: bool,

    /// Set one key, e.g. --set rabbitmq_port 5673 (repeatable)
    #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"], action = ArgAction::Append)]
    pub set: Vec<Vec<String>>,
}

pub async fn run(config_file: &Path, args: ConfigArgs) -> Result<()> {
    if !args.show && !args.update && args.set.is_empty() {
        let mut cmd = crate::Cli::command();
        if let Some(sub) = cmd.find_subcommand_mut("config") {
            sub.print_help()?;
        }
        return Ok(());
    }

    let store = ConfigStore::open(config_file).await;

    if !args.set.is_empty() {
        let patch = set_patch(&args.set)?;
        let settings = store.update(&patch).await?;
        out::note_success(&format!(
            "Updated {} setting(s) in {}",
            args.set.len(),
            store.path().display()
        ));
        print_settings(&settings, args.show_key);
    }

    if args.update {
        let patch = prompt_patch(&store.get()).await?;
        if patch.as_object().is_some_and(Map::is_empty) {
            out::note_info("No changes");
        } else {
            let settings = store.update(&patch).await?;
            out::note_success(&format!("Settings saved to {}", store.path().display()));
            print_settings(&settings, args.show_key);
        }
    }

    if args.show && args.set.is_empty() && !args.update {
        out::note_info(&format!("Settings file: {}", store.path().display()));
        print_settings(&store.get(), args.show_key);
    }
    Ok(())
}

/// Build a settings patch from `--set KEY VALUE` pairs. Values stay strings;
/// the settings layer parses numeric keys.
fn set_patch(pairs: &[Vec<String>]) -> Result<Value> {
    let mut patch = Map::new();
    for pair in pairs {
        let [key, value] = pair.as_slice() else {
            anyhow::bail!("--set takes a key and a value");
        };
        if !AppSettings::KEYS.contains(&key.as_str()) {
            anyhow::bail!(
                "Unknown setting '{key}'. Known settings: {}",
                AppSettings::KEYS.join(", ")
            );
        }
        patch.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(Value::Object(patch))
}

fn settings_rows(settings: &AppSettings, show_key: bool) -> Vec<Vec<String>> {
    let value = serde_json::to_value(settings).unwrap_or(Value::Null);
    let value = if show_key { value } else { redact(&value) };
    AppSettings::KEYS
        .iter()
        .map(|key| {
            let shown = match value.get(*key) {
                Some(Value::String(s)) if s.is_empty() && *key == "api_key" => paint(DIM, "(not set)"),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            vec![key.to_string(), shown]
        })
        .collect()
}

fn print_settings(settings: &AppSettings, show_key: bool) {
    print!("{}", render_table(&["Key", "Value"], &settings_rows(settings, show_key)));
}

/// Ask for every key in turn. Only keys given a new value end up in the patch.
async fn prompt_patch(current: &AppSettings) -> Result<Value> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut patch = Map::new();

    for row in settings_rows(current, false) {
        let [key, shown] = row.as_slice() else { continue };
        let hint = if key == "api_key" { "[hidden]".to_string() } else { shown.clone() };
        stdout
            .write_all(format!("{key} ({hint}): ").as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = stdin.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();
        if !line.is_empty() {
            patch.insert(key.clone(), Value::String(line.to_string()));
        }
    }
    Ok(Value::Object(patch))
}
