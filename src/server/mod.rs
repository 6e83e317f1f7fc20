pub mod audit;
pub mod connection;
pub mod dispatcher;
pub mod listener;

pub use connection::{CloseReason, ConnectionHandler, ConnectionState};
pub use dispatcher::Dispatcher;
pub use listener::{serve, Server};
