// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::cli::args::Cli;

pub fn completion_main(cli: &CompletionCli) -> Result<()> {
    let mut writer: Box<dyn Write> = match &cli.output {
        Some(p) => Box::new(
            File::create(p).with_context(|| format!("Failed to open for writing: {p:?}"))?,
        ),
        None => Box::new(io::stdout()),
    };

    clap_complete::generate(
        cli.shell,
        &mut Cli::command(),
        env!("CARGO_PKG_NAME"),
        &mut writer,
    );

    writer.flush().context("Failed to flush completions")?;

    Ok(())
}

/// Generate shell tab completion configs.
#[derive(Debug, Parser)]
pub struct CompletionCli {
    /// The shell to generate completions for.
    #[arg(short, long, value_name = "SHELL", value_parser)]
    pub shell: Shell,

    /// Write to a file instead of stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,
}
