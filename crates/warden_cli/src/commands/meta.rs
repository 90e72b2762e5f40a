//! Shell completions and man pages generated from the clap definition.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;

use crate::Cli;

const BIN_NAME: &str = "warden";

fn write_completions(shell: clap_complete::Shell, out: &mut impl Write) {
    clap_complete::generate(shell, &mut Cli::command(), BIN_NAME, out);
}

fn write_man_page(out: &mut impl Write) -> std::io::Result<()> {
    clap_mangen::Man::new(Cli::command()).render(out)
}

pub(crate) fn handle_completions(shell: clap_complete::Shell) -> Result<(), Box<dyn Error>> {
    let mut stdout = std::io::stdout().lock();
    write_completions(shell, &mut stdout);
    stdout.flush()?;
    Ok(())
}

/// One page per subcommand into `output`, or the top-level page on stdout.
pub(crate) fn handle_man(output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let Some(dir) = output else {
        let mut stdout = std::io::stdout().lock();
        write_man_page(&mut stdout)?;
        stdout.flush()?;
        return Ok(());
    };

    std::fs::create_dir_all(&dir)?;
    clap_mangen::generate_to(Cli::command(), &dir)?;
    eprintln!("Generated man pages in: {}", dir.display());
    Ok(())
}
