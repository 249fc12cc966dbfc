#![forbid(unsafe_code)]

//! Prints what the index derives from item names, one JSON object per name.
//! Names come from the arguments or, when none are given, from stdin.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use drive_index::names::{FileTypeClassification, NameDisplay, classify_file_type, describe_name};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "describe_name", about = "Show how the index displays item names")]
#[command(version)]
struct Cli {
    /// Treat the names as folders
    #[arg(short, long)]
    folder: bool,

    /// Pretty-print the JSON output
    #[arg(short, long)]
    pretty: bool,

    /// Names to describe
    names: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Described<'a> {
    name: &'a str,
    display: NameDisplay,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<FileTypeClassification>,
}

fn describe(name: &str, is_folder: bool) -> Described<'_> {
    Described {
        name,
        display: describe_name(name, is_folder),
        classification: (!is_folder)
            .then(|| classify_file_type(name))
            .filter(FileTypeClassification::is_classified),
    }
}

fn write_described(out: &mut impl Write, described: &Described<'_>, pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, described)?;
    } else {
        serde_json::to_writer(&mut *out, described)?;
    }
    writeln!(out)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !cli.names.is_empty() {
        for name in &cli.names {
            write_described(&mut out, &describe(name, cli.folder), cli.pretty)?;
        }
        return Ok(());
    }

    for line in io::stdin().lock().lines() {
        let line = line.context("reading names from stdin")?;
        if line.is_empty() {
            continue;
        }
        write_described(&mut out, &describe(&line, cli.folder), cli.pretty)?;
    }
    Ok(())
}
