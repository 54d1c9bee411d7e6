//! REPL - interactive VBScript console
//!
//! Lines accumulate until the daemon judges the buffer complete, then the
//! whole buffer is executed. A blank line forces submission of an open
//! block.

use anyhow::Result;
use ivbs_common::controller::Route;
use ivbs_common::magic::MagicCommand;
use ivbs_shared::completeness::Completeness;
use ivbs_shared::rpc::{ExecutePayload, ExecuteResult, ExecuteStatus};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};

use crate::rpc_client::RpcClient;

/// Lines typed so far for the current snippet
#[derive(Debug, Default, Clone)]
pub struct InputBuffer {
    text: String,
}

impl InputBuffer {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Every line keeps its newline, so a blank line leaves the buffer
    /// ending in an empty last line.
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line.trim_end_matches(['\r', '\n']));
        self.text.push('\n');
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Snippet to execute, without trailing newlines
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        text.trim_end_matches('\n').to_string()
    }
}

pub fn input_prompt(count: u64) -> String {
    format!("In [{}]: ", count)
}

/// Continuation prompt aligned with the input prompt, plus the indent hint
pub fn continuation_prompt(count: u64, indent: &str) -> String {
    let width = input_prompt(count).len();
    format!("{:>width$}{}", "...: ", indent, width = width)
}

/// Counter the next execution will get
pub fn next_count(code: &str, result: &ExecuteResult) -> u64 {
    let reset = match Route::classify(code) {
        Route::Magic(text) => MagicCommand::parse(&text) == Ok(MagicCommand::Reset),
        _ => false,
    };
    if reset {
        1
    } else {
        result.execution_count + 1
    }
}

/// Print streams: stdout plain, stderr red
pub fn print_result(result: &ExecuteResult) {
    if let Some(stdout) = &result.stdout {
        print!("{}", stdout);
        if !stdout.ends_with('\n') {
            println!();
        }
    }
    if let Some(stderr) = &result.stderr {
        eprint!("{}", stderr.red());
        if !stderr.ends_with('\n') {
            eprintln!();
        }
    }
    if result.status == ExecuteStatus::Error {
        eprintln!("{}", "(kernel error)".bright_red());
    }
}

/// Start the console loop
pub async fn run_repl(client: &mut RpcClient) -> Result<()> {
    let info = client.kernel_info().await?;
    println!("{}", info.banner.bright_cyan());
    println!("Type exit or quit to leave, a blank line submits an open block.");
    println!();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut buffer = InputBuffer::default();
    let mut count = 1;
    let mut indent = String::new();

    loop {
        if buffer.is_empty() {
            print!("{}", input_prompt(count).green());
        } else {
            print!("{}", continuation_prompt(count, &indent).green());
        }
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(e.into()),
            None => {
                // EOF
                println!();
                break;
            }
        };

        if buffer.is_empty() && line.trim().is_empty() {
            continue;
        }
        buffer.push_line(&line);

        if let Completeness::Incomplete { indent: hint } = client.is_complete(buffer.text()).await? {
            indent = hint.unwrap_or_default();
            continue;
        }
        indent.clear();

        let code = buffer.take();
        let result = client.execute(&code).await?;
        print_result(&result);
        count = next_count(&code, &result);

        if result.payload.contains(&ExecutePayload::ClearOutput) {
            console::Term::stdout().clear_screen()?;
        }
        if result.payload.contains(&ExecutePayload::Teardown) {
            break;
        }
    }

    Ok(())
}
