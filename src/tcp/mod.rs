//! TCP connection tracking and per-direction stream reassembly.

pub mod connection;
pub mod engine;
pub mod seq;
pub mod segment;
pub mod stream;
pub mod table;

pub use connection::{Direction, State, TcpConnection};
pub use engine::{EngineError, TcpEngine};
pub use stream::{StreamCallbacks, TcpStream};
pub use table::{ConnectionTable, TableError};
