use log::{debug, info};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;
use snafu::prelude::*;

use sheetform::forms::responses::RecordRef;
use sheetform::forms::service::FormService;
use sheetform::forms::*;

mod args;

use args::{Args, Command};

fn print_json<T: Serialize>(value: &T) -> FormsResult<()> {
    let pretty = serde_json::to_string_pretty(value)
        .map_err(|source| FormsError::WritingJson { source })?;
    println!("{}", pretty);
    Ok(())
}

/// `City=Lahore` -> (`City`, `Lahore`). Only the first `=` separates.
fn parse_values(raw: &[String]) -> FormsResult<BTreeMap<String, String>> {
    let mut res: BTreeMap<String, String> = BTreeMap::new();
    for item in raw.iter() {
        let (k, v) = match item.split_once('=') {
            Some(kv) => kv,
            None => whatever!("Expected field=value, got {:?}", item),
        };
        ensure_whatever!(!k.trim().is_empty(), "Empty field name in {:?}", item);
        res.insert(k.trim().to_string(), v.to_string());
    }
    Ok(res)
}

fn run_command(service: &FormService, command: &Command) -> FormsResult<()> {
    match command {
        Command::BuildSchema {
            input,
            sheet,
            title,
            reference,
        } => {
            let schema =
                service.build_schema(Path::new(input), sheet.as_deref(), title.as_deref())?;
            print_json(&schema)?;
            if let Some(reference) = reference {
                check_against_reference(&schema, Path::new(reference))?;
            }
        }
        Command::Forms => {
            let schemas = service.schemas()?;
            debug!("run_command: {} forms", schemas.len());
            print_json(&schemas)?;
        }
        Command::ShowForm { form } => {
            print_json(&service.schema(&SchemaId(form.clone()))?)?;
        }
        Command::LoadRoster { form, members } => {
            let load = service.load_roster(&SchemaId(form.clone()), Path::new(members))?;
            print_json(&load)?;
        }
        Command::Submit {
            form,
            identity,
            values,
        } => {
            let sub = service.submit(&SchemaId(form.clone()), identity, parse_values(values)?)?;
            print_json(&sub)?;
        }
        Command::List {
            form,
            identity,
            latest_first,
        } => {
            let id = SchemaId(form.clone());
            let records = match (identity, latest_first) {
                (Some(who), _) => service.list_by_identity(&id, who)?,
                (None, true) => service.list_latest_first(&id)?,
                (None, false) => service.list_by_form(&id)?,
            };
            print_json(&records)?;
        }
        Command::Progress { form } => {
            let p = service.progress(&SchemaId(form.clone()))?;
            println!("{}/{} ({:.0}%)", p.filled, p.total, p.fraction() * 100.0);
        }
        Command::Pending { form } => {
            print_json(&service.pending(&SchemaId(form.clone()))?)?;
        }
        Command::Update { record, values } => {
            let rref: RecordRef = record.parse()?;
            print_json(&service.update(&rref, parse_values(values)?)?)?;
        }
        Command::Delete { record } => {
            let rref: RecordRef = record.parse()?;
            print_json(&service.delete(&rref)?)?;
        }
        Command::Export { form, out } => {
            let id = SchemaId(form.clone());
            let count = match out.as_deref() {
                None | Some("stdout") => service.export(&id, io::stdout().lock())?,
                Some(path) => {
                    let file = fs::File::create(path).map_err(|source| FormsError::Io {
                        source,
                        path: path.to_string(),
                    })?;
                    service.export(&id, file)?
                }
            };
            info!("run_command: exported {} responses of form {}", count, id);
        }
    }
    Ok(())
}

fn run(args: &Args) -> FormsResult<()> {
    let service = open_service(
        args.config.as_deref().map(Path::new),
        args.data_dir.as_ref().map(PathBuf::from),
    )?;
    run_command(&service, &args.command)
}

fn main() {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    debug!("main: args: {:?}", args);

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
