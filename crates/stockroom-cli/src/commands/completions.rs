use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut buffer = Vec::new();
    match shell {
        CompletionShell::Bash => write_completions(shells::Bash, &mut buffer),
        CompletionShell::Zsh => write_completions(shells::Zsh, &mut buffer),
        CompletionShell::Fish => write_completions(shells::Fish, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }
    Ok(())
}

pub fn write_completions<G: Generator>(generator: G, buffer: &mut Vec<u8>) {
    let mut command = Cli::command();
    generate(generator, &mut command, "stockroom", buffer);
}
