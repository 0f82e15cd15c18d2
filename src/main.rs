use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use vibevault::config::{load_config, VaultConfig, DEFAULT_LOG_LEVEL};
use vibevault::error_codes::{error_envelope, exit_code_for, find_coded_error};
use vibevault::ingest::{
    backup_file_name, backup_json, export_sources, ingest_entries, ingest_upload, parse_backup,
    read_directory_entries, source_export_dir_name, store_imported,
};
use vibevault::isolation::IsolationPolicy;
use vibevault::normalize::{format_display_name, is_standalone_document, Normalizer};
use vibevault::platform::{Platform, TerminalPlatform};
use vibevault::records::{sort_for_display, GameUpdate, JsonRecordStore, RecordStore};
use vibevault::resource::FileResourceHost;
use vibevault::session::{PlaybackEnvironment, PlaybackSession, SessionOptions};

#[derive(Debug, Parser)]
#[command(name = "vibevault")]
#[command(about = "Local library and sandboxed player for small HTML and React games")]
struct Cli {
    /// Path to vault.yaml (defaults to the user config directory).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    /// Report failures on stderr as a JSON error envelope.
    #[arg(long = "json-errors", global = true, default_value_t = false)]
    json_errors: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Normalize one file into a standalone HTML document.
    Normalize {
        file: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Add files to the library.
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    List {
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },
    Show {
        id: String,
    },
    Rename {
        id: String,
        name: String,
    },
    Delete {
        id: String,
    },
    /// Remove every game from the library.
    Clear {
        #[arg(long = "yes", default_value_t = false)]
        yes: bool,
    },
    /// Import a JSON backup or every game file under a directory.
    Import {
        source: PathBuf,
    },
    /// Write a JSON backup of the whole library.
    Backup {
        output: Option<PathBuf>,
    },
    /// Write each game as a plain HTML file under a dated folder in `dir`.
    Export {
        dir: PathBuf,
    },
    /// Materialize a game and drive its session from stdin: r, f, q.
    Play {
        id: String,
        #[arg(long = "once", default_value_t = false)]
        once: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntry<'a> {
    id: &'a str,
    name: &'a str,
    added_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_played: Option<i64>,
    standalone: bool,
    bytes: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&error, json_errors);
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let launch_cwd = env::current_dir().context("failed to resolve current directory")?;
    let config = load_config(cli.config.as_deref(), &launch_cwd);
    init_logging(
        config
            .as_ref()
            .map(VaultConfig::log_directive)
            .unwrap_or(DEFAULT_LOG_LEVEL),
    );
    let config = config?;
    tracing::debug!(
        config = %config.config_path.display(),
        library = %config.library_path.display(),
        "loaded vault config"
    );

    let store = JsonRecordStore::new(&config.library_path);
    match cli.command {
        Commands::Normalize { file, output } => run_normalize(&config, &file, output.as_deref()),
        Commands::Add { files } => run_add(&config, &store, &files),
        Commands::List { json } => run_list(&store, json),
        Commands::Show { id } => run_show(&store, &id),
        Commands::Rename { id, name } => run_rename(&store, &id, &name),
        Commands::Delete { id } => run_delete(&store, &id),
        Commands::Clear { yes } => run_clear(&store, yes),
        Commands::Import { source } => run_import(&config, &store, &source),
        Commands::Backup { output } => run_backup(&store, output, &launch_cwd),
        Commands::Export { dir } => run_export(&store, &dir),
        Commands::Play { id, once } => run_play(config, store, &id, once),
    }
}

fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn report_error(error: &anyhow::Error, json: bool) {
    if json {
        match serde_json::to_string(&error_envelope(error)) {
            Ok(text) => eprintln!("{text}"),
            Err(_) => eprintln!("error: {:#}", error),
        }
        return;
    }
    match find_coded_error(error) {
        Some(coded) => eprintln!("error[{}]: {:#}", coded.code, error),
        None => eprintln!("error: {:#}", error),
    }
}

fn normalizer_for(config: &VaultConfig) -> Normalizer {
    Normalizer::with_placeholder_titles(config.placeholder_titles.iter().cloned())
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("path has no file name: {}", path.display()))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn run_normalize(config: &VaultConfig, file: &Path, output: Option<&Path>) -> Result<()> {
    let raw = read_source(file)?;
    let normalized = normalizer_for(config).normalize(&raw, &file_name_of(file)?);
    match output {
        Some(path) => {
            fs::write(path, &normalized.html)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Wrote {} ({}: {})",
                path.display(),
                normalized.kind.as_str(),
                normalized.title
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(normalized.html.as_bytes())
                .context("failed to write normalized document")?;
        }
    }
    Ok(())
}

fn run_add(config: &VaultConfig, store: &JsonRecordStore, files: &[PathBuf]) -> Result<()> {
    let normalizer = normalizer_for(config);
    let platform = TerminalPlatform;
    let mut records = Vec::with_capacity(files.len());
    for file in files {
        let raw = read_source(file)?;
        records.push(ingest_upload(
            &normalizer,
            &platform,
            &raw,
            &file_name_of(file)?,
        ));
    }
    store.save_all(&records)?;
    for record in &records {
        println!("{}\t{}", record.id, record.name);
    }
    Ok(())
}

fn run_list(store: &JsonRecordStore, json: bool) -> Result<()> {
    let mut records = store.load_all()?;
    sort_for_display(&mut records);

    if json {
        let entries = records
            .iter()
            .map(|record| ListEntry {
                id: &record.id,
                name: &record.name,
                added_at: record.added_at,
                last_played: record.last_played,
                standalone: is_standalone_document(&record.content),
                bytes: record.content.len(),
            })
            .collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("failed to serialize game list")?
        );
        return Ok(());
    }

    if records.is_empty() {
        println!("No games in library.");
        return Ok(());
    }
    for record in &records {
        println!(
            "{}\t{}\t{}",
            record.id,
            format_display_name(&record.name),
            format_timestamp(record.last_played.unwrap_or(record.added_at))
        );
    }
    Ok(())
}

fn run_show(store: &JsonRecordStore, id: &str) -> Result<()> {
    let record = store.get(id)?;
    println!("id:          {}", record.id);
    println!("name:        {}", format_display_name(&record.name));
    println!("added:       {}", format_timestamp(record.added_at));
    println!(
        "last played: {}",
        record
            .last_played
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_owned())
    );
    if let Some(folder) = &record.folder_id {
        println!("folder:      {folder}");
    }
    println!(
        "content:     {} bytes{}",
        record.content.len(),
        if is_standalone_document(&record.content) {
            ""
        } else {
            " (component source)"
        }
    );
    Ok(())
}

fn run_rename(store: &JsonRecordStore, id: &str, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("game name cannot be empty");
    }
    let record = store.apply_update(id, &GameUpdate::rename(name))?;
    println!("Renamed {} to {}", record.id, record.name);
    Ok(())
}

fn run_delete(store: &JsonRecordStore, id: &str) -> Result<()> {
    let record = store.get(id)?;
    store.delete(&record.id)?;
    println!("Deleted {} ({})", record.id, record.name);
    Ok(())
}

fn run_clear(store: &JsonRecordStore, yes: bool) -> Result<()> {
    let count = store.load_all()?.len();
    if count == 0 {
        println!("Library is already empty.");
        return Ok(());
    }
    if !yes && !TerminalPlatform.confirm(&format!("Delete all {count} games?")) {
        println!("Aborted.");
        return Ok(());
    }
    store.clear()?;
    println!("Deleted {count} games.");
    Ok(())
}

fn run_import(config: &VaultConfig, store: &JsonRecordStore, source: &Path) -> Result<()> {
    let platform = TerminalPlatform;
    let records = if source.is_dir() {
        let entries = read_directory_entries(source)?;
        ingest_entries(&normalizer_for(config), &platform, entries)
    } else {
        parse_backup(&read_source(source)?, &platform)
            .with_context(|| format!("failed to import backup {}", source.display()))?
    };
    let saved = store_imported(store, &platform, &records, &source.display().to_string())?;
    if saved > 0 {
        println!("Imported {saved} games.");
    }
    Ok(())
}

fn run_backup(store: &JsonRecordStore, output: Option<PathBuf>, launch_cwd: &Path) -> Result<()> {
    let records = store.load_all()?;
    let path = output.unwrap_or_else(|| launch_cwd.join(backup_file_name(Utc::now())));
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, backup_json(&records)?)
        .with_context(|| format!("failed to write backup {}", path.display()))?;
    println!("Backed up {} games to {}", records.len(), path.display());
    Ok(())
}

fn run_export(store: &JsonRecordStore, dir: &Path) -> Result<()> {
    let records = store.load_all()?;
    let target = dir.join(source_export_dir_name(Utc::now()));
    let written = export_sources(&records, &target)?;
    println!("Exported {} games to {}", written.len(), target.display());
    Ok(())
}

fn run_play(config: VaultConfig, store: JsonRecordStore, id: &str, once: bool) -> Result<()> {
    let store = Arc::new(store);
    let record = store.get(id)?;
    let host = Arc::new(FileResourceHost::new(&config.cache_dir)?);
    let env = PlaybackEnvironment::new(host, Arc::new(TerminalPlatform), store).with_options(
        SessionOptions {
            confirm_restart: config.confirm_restart,
            policy: IsolationPolicy::default(),
        },
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let session = PlaybackSession::launch(record, env).await?;
        print_frame(&session)?;
        if once {
            session.close();
            return Ok(());
        }

        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            eprint!("[r]estart [f]ullscreen [q]uit > ");
            let _ = io::stderr().flush();
            line.clear();
            let read = stdin
                .lock()
                .read_line(&mut line)
                .context("failed to read command")?;
            if read == 0 {
                break;
            }
            match line.trim() {
                "r" => match session.restart().await? {
                    Some(_) => print_frame(&session)?,
                    None => println!("Restart cancelled."),
                },
                "f" => println!("fullscreen: {}", session.toggle_fullscreen()),
                "q" => break,
                "" => {}
                other => eprintln!("unknown command '{other}'"),
            }
        }
        session.close();
        Ok(())
    })
}

fn print_frame(session: &PlaybackSession) -> Result<()> {
    if let Some(target) = session.load_target() {
        println!("load target: {target}");
    }
    if let Some(markup) = session.frame_markup() {
        println!("{}", markup?);
    }
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
