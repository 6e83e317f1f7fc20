pub mod builder;
pub mod transport;

use thiserror::Error;

pub use builder::{build_request, collect_commands, load_commands, prompt_command, PROMPT};
pub use transport::Client;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no commands to send")]
    EmptyBatch,
    #[error("unable to locate command file {path}: {source}")]
    CommandFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no command entered")]
    NoInput,
    #[error("server closed the connection without a response")]
    NoResponse,
    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
