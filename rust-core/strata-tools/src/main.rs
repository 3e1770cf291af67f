// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! strata: inspect, verify and dump records files.
//!
//! - `describe`: list chunks with their sizes and record counts
//! - `verify`: read every record and report damaged regions
//! - `cat`: print records, optionally from a saved position

mod inspect;
mod output;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use strata_records::{
    FieldProjection, RecordPosition, RecordReader, RecordReaderOptions, RecordsResult,
};
use tracing_subscriber::EnvFilter;

use output::{OutputFormat, RecordEncoding};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "strata", version = VERSION, about = "Inspect strata records files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the chunks of a file.
    Describe {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Read every record and report regions that had to be skipped.
    Verify {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Print records, one per line.
    Cat {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = RecordEncoding::Text)]
        encoding: RecordEncoding,
        /// Start at this position ("chunk_begin/record_index").
        #[arg(long)]
        from: Option<RecordPosition>,
        /// Stop after this many records.
        #[arg(long)]
        limit: Option<usize>,
        /// Keep only these top-level fields of transposed chunks.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<u32>,
        /// Prefix each record with its position.
        #[arg(long)]
        positions: bool,
        /// Skip damaged regions instead of stopping.
        #[arg(long)]
        skip_damage: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Describe { file, format } => describe(&file, format),
        Command::Verify { file, format } => verify(&file, format),
        Command::Cat {
            file,
            encoding,
            from,
            limit,
            fields,
            positions,
            skip_damage,
        } => {
            let projection = if fields.is_empty() {
                FieldProjection::All
            } else {
                FieldProjection::fields(fields)
            };
            let options = CatOptions {
                encoding,
                from,
                limit,
                projection,
                positions,
                skip_damage,
            };
            cat(&file, options)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn describe(path: &Path, format: OutputFormat) -> RecordsResult<ExitCode> {
    let description = inspect::describe(&mut File::open(path)?)?;
    println!("{}", output::format_description(&description, format));
    Ok(if description.damage.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn verify(path: &Path, format: OutputFormat) -> RecordsResult<ExitCode> {
    let verification = inspect::verify(File::open(path)?)?;
    println!("{}", output::format_verification(&verification, format));
    if verification.is_clean() {
        if format == OutputFormat::Table {
            println!("{}", "OK".green().bold());
        }
        Ok(ExitCode::SUCCESS)
    } else {
        if format == OutputFormat::Table {
            println!("{}", "DAMAGED".red().bold());
        }
        Ok(ExitCode::FAILURE)
    }
}

struct CatOptions {
    encoding: RecordEncoding,
    from: Option<RecordPosition>,
    limit: Option<usize>,
    projection: FieldProjection,
    positions: bool,
    skip_damage: bool,
}

fn cat(path: &Path, options: CatOptions) -> RecordsResult<ExitCode> {
    let reader_options = RecordReaderOptions::new().set_field_projection(options.projection);
    let mut reader = RecordReader::with_options(File::open(path)?, reader_options);
    if let Some(position) = options.from {
        reader.seek(position)?;
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut printed = 0;
    let mut damaged = false;
    while options.limit.map_or(true, |limit| printed < limit) {
        let position = reader.pos();
        match reader.read_record() {
            Ok(Some(record)) => {
                let line = output::format_record(&record, options.encoding);
                if options.positions {
                    writeln!(out, "{position}\t{line}")?;
                } else {
                    writeln!(out, "{line}")?;
                }
                printed += 1;
            }
            Ok(None) => break,
            Err(e) if e.is_data_loss() && options.skip_damage => {
                damaged = true;
                match reader.recover()? {
                    Some(region) => eprintln!("{} skipped {region}", "warning:".yellow().bold()),
                    None => {
                        eprintln!("{} {e}", "warning:".yellow().bold());
                        break;
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
    out.flush()?;
    Ok(if damaged {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
