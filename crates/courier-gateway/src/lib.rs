pub mod connection;
pub mod dispatcher;

pub use connection::{Credentials, handle_connection_authenticated};
pub use dispatcher::{Broadcast, Dispatcher, Revocation};
