// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Roomgraph Inspect - load, verify and generate saved documents.
//!
//! # Commands
//!
//! - `verify <file> [--auto-fix] [--strict]` - Load a JSON document and verify every root
//! - `demo [--out <file>]` - Build a small floor (slab, opening, room) and save it

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roomgraph_model::{Document, ModelConfig, SplitCurve};
use tracing::info;

#[derive(Parser)]
#[command(name = "roomgraph-inspect", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify every ownership tree in a saved document.
    Verify {
        file: PathBuf,
        /// Repair edges whose primary co-edge or partner links drifted.
        #[arg(long)]
        auto_fix: bool,
        /// Treat violations as errors instead of warnings.
        #[arg(long)]
        strict: bool,
    },
    /// Write a small sample document.
    Demo {
        /// Output path; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,roomgraph_model=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Verify {
            file,
            auto_fix,
            strict,
        } => verify(&file, auto_fix, strict),
        Command::Demo { out } => demo(out),
    }
}

fn verify(file: &Path, auto_fix: bool, strict: bool) -> Result<ExitCode> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let mut config = ModelConfig::from_env();
    if strict {
        config = config.strict();
    }
    let mut doc = Document::from_json_with_config(&json, config)
        .with_context(|| format!("loading {}", file.display()))?;
    info!(entities = doc.entity_count(), "document loaded");

    let mut failed = 0usize;
    for root in doc.roots() {
        let label = doc.describe(root);
        if doc.verify(root, auto_fix) {
            println!("ok      {label}");
        } else {
            failed += 1;
            println!("FAILED  {label}");
            for violation in doc.collect_violations(root) {
                println!("        {violation}");
            }
        }
    }

    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(failed, "verification failed");
        Ok(ExitCode::FAILURE)
    }
}

fn demo(out: Option<PathBuf>) -> Result<ExitCode> {
    let mut doc = Document::with_config(ModelConfig::from_env());

    doc.with_transaction("build floor", |doc| {
        let outline = doc.loop_from_points(&[
            [0.0, 0.0, 0.0],
            [8.0, 0.0, 0.0],
            [8.0, 6.0, 0.0],
            [0.0, 6.0, 0.0],
        ])?;
        let slab = doc.create_slab(outline, 0.0, 0.25)?;

        let hole = doc.loop_from_points(&[
            [1.0, 1.0, 0.0],
            [2.0, 1.0, 0.0],
            [2.0, 2.0, 0.0],
            [1.0, 2.0, 0.0],
        ])?;
        let opening = doc.create_opening(hole)?;
        doc.add_opening(slab, opening)?;

        let path = doc.loop_from_points(&[
            [0.0, 0.0, 0.25],
            [8.0, 0.0, 0.25],
            [8.0, 6.0, 0.25],
            [0.0, 6.0, 0.25],
        ])?;
        let room = doc.create_room_region(path)?;
        doc.set_split_curves(
            room,
            vec![SplitCurve {
                start: [4.0, 0.0],
                end: [4.0, 6.0],
            }],
        )?;
        Ok(())
    })
    .context("building demo floor")?;

    let json = doc.to_json()?;
    match out {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), entities = doc.entity_count(), "demo written");
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}
