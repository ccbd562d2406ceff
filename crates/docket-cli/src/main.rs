use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docket_api::{CaseIndexApi, PresignUploadRequest};
use docket_core::{upload_key, validate_case_id, validate_upload_filename, DateExtractor};
use docket_store::{FsObjectStore, ObjectStore};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Parser)]
#[command(name = "docket")]
#[command(about = "Docket case-document catalog CLI")]
struct Cli {
    #[arg(long, default_value = "./docket_data")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mint a fresh case identifier.
    CreateCase,
    /// Issue a time-limited upload link for one document.
    Presign(PresignArgs),
    /// Store a local file directly under a case's raw prefix.
    Upload(UploadArgs),
    /// List a case's raw documents in stable order.
    ListFiles(CaseArgs),
    /// Rebuild the case manifest and print a download link.
    BuildIndex(CaseArgs),
    /// Report the date a filename's name patterns yield, if any.
    ExtractDate(ExtractDateArgs),
}

#[derive(Debug, Args)]
struct PresignArgs {
    case_id: String,
    filename: String,
    #[arg(long)]
    content_type: Option<String>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    case_id: String,
    file: PathBuf,
    #[arg(long)]
    content_type: Option<String>,
}

#[derive(Debug, Args)]
struct CaseArgs {
    case_id: String,
}

#[derive(Debug, Args)]
struct ExtractDateArgs {
    filename: String,
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

fn open_api(root: &Path) -> Result<CaseIndexApi<FsObjectStore>> {
    Ok(CaseIndexApi::new(FsObjectStore::open(root)?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::CreateCase => run_create_case(&open_api(&cli.root)?),
        Command::Presign(args) => run_presign(&open_api(&cli.root)?, args),
        Command::Upload(args) => run_upload(&open_api(&cli.root)?, &args),
        Command::ListFiles(args) => run_list_files(&open_api(&cli.root)?, &args),
        Command::BuildIndex(args) => run_build_index(&open_api(&cli.root)?, &args),
        Command::ExtractDate(args) => run_extract_date(&args),
    }
}

fn run_create_case(api: &CaseIndexApi<FsObjectStore>) -> Result<()> {
    let result = api.create_case();
    emit_json(serde_json::to_value(result).context("failed to serialize case result")?)
}

fn run_presign(api: &CaseIndexApi<FsObjectStore>, args: PresignArgs) -> Result<()> {
    let result = api.presign_upload(
        &args.case_id,
        PresignUploadRequest { filename: args.filename, content_type: args.content_type },
    )?;
    emit_json(serde_json::to_value(result).context("failed to serialize presign result")?)
}

fn run_upload(api: &CaseIndexApi<FsObjectStore>, args: &UploadArgs) -> Result<()> {
    validate_case_id(&args.case_id)?;
    let filename = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("upload path has no filename")?;
    validate_upload_filename(&filename)?;

    let bytes = fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let key = upload_key(&args.case_id, &filename);
    let content_type =
        args.content_type.clone().unwrap_or_else(|| DEFAULT_UPLOAD_CONTENT_TYPE.to_string());
    api.store().put(&key, &bytes, &content_type)?;

    emit_json(serde_json::json!({
        "case_id": args.case_id,
        "key": key,
        "size_bytes": bytes.len(),
        "content_type": content_type,
    }))
}

fn run_list_files(api: &CaseIndexApi<FsObjectStore>, args: &CaseArgs) -> Result<()> {
    let result = api.list_files(&args.case_id)?;
    emit_json(serde_json::to_value(result).context("failed to serialize listing")?)
}

fn run_build_index(api: &CaseIndexApi<FsObjectStore>, args: &CaseArgs) -> Result<()> {
    let result = api.build_index(&args.case_id)?;
    emit_json(serde_json::to_value(result).context("failed to serialize index result")?)
}

fn run_extract_date(args: &ExtractDateArgs) -> Result<()> {
    let extractor = DateExtractor::new();
    match extractor.extract(&args.filename) {
        Some(date) => emit_json(serde_json::json!({
            "filename": args.filename,
            "matched": true,
            "date": format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()),
        })),
        None => emit_json(serde_json::json!({
            "filename": args.filename,
            "matched": false,
        })),
    }
}
