use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::client::ClientError;
use crate::protocol::{Command, Request};

pub const PROMPT: &str = "Enter command >> ";

/// Build a request with a fresh UUID v4 per command, keeping input order.
pub fn build_request<I, S>(commands: I) -> Result<Request, ClientError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let commands: Vec<Command> = commands
        .into_iter()
        .map(|method| Command {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
        })
        .collect();

    if commands.is_empty() {
        return Err(ClientError::EmptyBatch);
    }
    Ok(Request { commands })
}

/// One command per line, trimmed; blank lines are skipped.
pub fn load_commands(path: &Path) -> Result<Vec<String>, ClientError> {
    let raw = fs::read_to_string(path).map_err(|source| ClientError::CommandFile {
        path: path.display().to_string(),
        source,
    })?;

    let commands: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    debug!(path = %path.display(), count = commands.len(), "loaded commands");
    Ok(commands)
}

/// Ask for a single command, re-prompting on blank lines.
pub fn prompt_command<R, W>(input: &mut R, output: &mut W) -> Result<String, ClientError>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(ClientError::NoInput);
        }
        let command = line.trim();
        if !command.is_empty() {
            return Ok(command.to_string());
        }
    }
}

/// Commands from `file`, falling back to exactly one prompted command when there are none.
pub fn collect_commands<R, W>(
    file: Option<&Path>,
    input: &mut R,
    output: &mut W,
) -> Result<Vec<String>, ClientError>
where
    R: BufRead,
    W: Write,
{
    let commands = match file {
        Some(path) => load_commands(path)?,
        None => Vec::new(),
    };
    if !commands.is_empty() {
        return Ok(commands);
    }
    Ok(vec![prompt_command(input, output)?])
}
