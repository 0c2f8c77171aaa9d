//! Shell completion scripts

use std::io::Write;

use clap::CommandFactory;
use clap_complete::{Shell, generate};

/// Write the completion script for `shell` to `out`.
pub fn completions(shell: Shell, out: &mut impl Write) {
    let mut cmd = crate::Cli::command();
    let bin = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin, out);
}
