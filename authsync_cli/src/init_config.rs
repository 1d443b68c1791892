use std::{fs, io::Write, path::Path};

use anyhow::{Context, bail};
use authsync_node::AuthSyncConfig;
use clap::Subcommand;
use toml_edit::{DocumentMut, Item, Table, Value};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the config file from the default template if it doesn't exist
    Init,
    /// Prints the value at a dotted key, e.g. sockets.manager.port
    Get { key: String },
    /// Sets the value at a dotted key, keeping the rest of the file as written
    Set { key: String, value: String },
}

impl CmdConfig {
    pub fn run(self, config_file: &Path) -> anyhow::Result<()> {
        match self {
            Self::Init => {
                AuthSyncConfig::load_or_init(config_file)?;
                info!("config file at {config_file:?}");
            }
            Self::Get { key } => {
                let config = AuthSyncConfig::load_or_init(config_file)?;
                match config.lookup(&key)? {
                    Some(toml::Value::String(s)) => println!("{s}"),
                    Some(toml::Value::Table(table)) => print!("{}", toml::to_string(&table)?),
                    Some(value) => println!("{value}"),
                    None => bail!("no config key {key:?}"),
                }
            }
            Self::Set { key, value } => {
                AuthSyncConfig::load_or_init(config_file)?;
                let text = fs::read_to_string(config_file)?;
                let updated = set_dotted(&text, &key, &value)?;
                toml::from_str::<AuthSyncConfig>(&updated)
                    .with_context(|| format!("{value:?} is not a valid value for {key}"))?;

                info!("writing to config file {config_file:?}");
                let tmp_path = config_file.with_extension("tmp");
                let mut tmp = fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?;
                tmp.write_all(updated.as_bytes())?;
                tmp.sync_all()?;
                fs::rename(&tmp_path, config_file)?;
            }
        }
        Ok(())
    }
}

/// Sets `key` in the TOML document `text`, creating missing tables.
///
/// `value` is read as a TOML literal when it parses as one (`5556`, `true`)
/// and as a plain string otherwise.
fn set_dotted(text: &str, key: &str, value: &str) -> anyhow::Result<String> {
    let mut doc = text
        .parse::<DocumentMut>()
        .context("could not parse config file")?;
    let mut segments: Vec<&str> = key.split('.').collect();
    let last = match segments.pop() {
        Some(last) if !last.is_empty() => last,
        _ => bail!("empty config key"),
    };

    let mut table = doc.as_table_mut();
    for segment in segments {
        table = table
            .entry(segment)
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .with_context(|| format!("{segment:?} in {key:?} is not a table"))?;
    }
    let value = value
        .parse::<Value>()
        .unwrap_or_else(|_| Value::from(value));
    table.insert(last, Item::Value(value));
    Ok(doc.to_string())
}
