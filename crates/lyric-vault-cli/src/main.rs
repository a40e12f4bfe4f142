use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lyric_vault_api::VaultConfig;
use lyric_vault_core::{ArtefactId, NewArtefact, SecretKey, VaultError};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "lv")]
#[command(about = "Lyric Vault CLI")]
#[command(version)]
struct Cli {
    /// Directory holding the store, key file and thumbnails
    #[arg(long, global = true, env = "LYRIC_VAULT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Store file (defaults to <data-dir>/lyrics.jsonl)
    #[arg(long, global = true, env = "LYRIC_VAULT_STORE")]
    store: Option<PathBuf>,

    /// Hex key file (defaults to <data-dir>/secret.key)
    #[arg(long, global = true, env = "LYRIC_VAULT_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Thumbnail directory (defaults to <data-dir>/thumbnails)
    #[arg(long, global = true, env = "LYRIC_VAULT_THUMBNAIL_ROOT")]
    thumbnail_root: Option<PathBuf>,

    /// Log operations at info level on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a new encrypted artefact
    Create(CreateArgs),
    /// Decrypt and list every artefact
    Read(CallerArgs),
    /// Replace title and content of an artefact
    Update(UpdateArgs),
    /// Remove an artefact
    Delete(DeleteArgs),
    /// Store a new artefact together with a thumbnail of an image
    CreateWithThumbnail(CreateWithThumbnailArgs),
    /// Check every checksum and decryption without failing fast
    Verify(CallerArgs),
    /// Write a fresh random key file
    Keygen(KeygenArgs),
}

#[derive(Debug, Args)]
struct CallerArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    role: String,
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    content: String,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    id: ArtefactId,
    #[arg(long)]
    title: String,
    #[arg(long)]
    content: String,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    id: ArtefactId,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Args)]
struct CreateWithThumbnailArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    content: String,
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    category: String,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Args)]
struct KeygenArgs {
    /// Replace an existing key file; artefacts sealed with the old key become unreadable
    #[arg(long, default_value_t = false)]
    force: bool,
}

impl Cli {
    fn config(&self) -> VaultConfig {
        let defaults = VaultConfig::from_data_dir(&self.data_dir);
        VaultConfig {
            store_path: self.store.clone().unwrap_or(defaults.store_path),
            key_file: self.key_file.clone().unwrap_or(defaults.key_file),
            thumbnail_root: self.thumbnail_root.clone().unwrap_or(defaults.thumbnail_root),
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "lyric_vault=info" } else { "lyric_vault=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<VaultError>() {
            Some(vault_err) => {
                emit_json(serde_json::json!({
                    "error": {
                        "code": vault_err.code(),
                        "message": vault_err.to_string()
                    }
                }))?;
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.config();
    match &cli.command {
        Command::Create(args) => run_create(&config, args),
        Command::Read(args) => run_read(&config, args),
        Command::Update(args) => run_update(&config, args),
        Command::Delete(args) => run_delete(&config, args),
        Command::CreateWithThumbnail(args) => run_create_with_thumbnail(&config, args),
        Command::Verify(args) => run_verify(&config, args),
        Command::Keygen(args) => run_keygen(&config, args),
    }
}

fn run_create(config: &VaultConfig, args: &CreateArgs) -> Result<()> {
    let mut service = config.open_service()?;
    let id = service.create(
        &NewArtefact::new(&args.title, &args.content),
        &args.caller.user,
        &args.caller.role,
    )?;
    emit_json(serde_json::json!({ "id": id }))
}

fn run_read(config: &VaultConfig, args: &CallerArgs) -> Result<()> {
    let service = config.open_service()?;
    let artefacts = service.read(&args.user, &args.role)?;
    emit_json(serde_json::json!({
        "count": artefacts.len(),
        "artefacts": artefacts
    }))
}

fn run_update(config: &VaultConfig, args: &UpdateArgs) -> Result<()> {
    let mut service = config.open_service()?;
    let record = service.update(
        args.id,
        &NewArtefact::new(&args.title, &args.content),
        &args.caller.user,
        &args.caller.role,
    )?;
    let mut value = serde_json::to_value(&record)?;
    if let Value::Object(object) = &mut value {
        // The sealed token is of no use to a caller.
        object.remove("content");
    }
    emit_json(value)
}

fn run_delete(config: &VaultConfig, args: &DeleteArgs) -> Result<()> {
    let mut service = config.open_service()?;
    service.delete(args.id, &args.caller.user, &args.caller.role)?;
    emit_json(serde_json::json!({ "deleted": args.id }))
}

fn run_create_with_thumbnail(config: &VaultConfig, args: &CreateWithThumbnailArgs) -> Result<()> {
    let mut service = config.open_service()?;
    let sink = config.thumbnail_sink();
    let created = service.create_with_thumbnail(
        &sink,
        &NewArtefact::new(&args.title, &args.content),
        &args.image,
        &args.category,
        &args.caller.user,
        &args.caller.role,
    )?;
    emit_json(serde_json::json!({
        "id": created.id,
        "thumbnail": created.thumbnail
    }))
}

fn run_verify(config: &VaultConfig, args: &CallerArgs) -> Result<()> {
    let service = config.open_service()?;
    let report = service.verify(&args.user, &args.role)?;
    emit_json(serde_json::json!({
        "clean": report.is_clean(),
        "checked": report.checked,
        "checksum_mismatches": report.checksum_mismatches,
        "undecryptable": report.undecryptable
    }))
}

fn run_keygen(config: &VaultConfig, args: &KeygenArgs) -> Result<()> {
    SecretKey::generate().write_to(&config.key_file, args.force)?;
    tracing::info!(key_file = %config.key_file.display(), "key file written");
    emit_json(serde_json::json!({
        "key_file": config.key_file,
        "status": "created"
    }))
}
