/// Execution layer: the adapter contract, the PostgreSQL driver and the
/// client that ties generation options to connections.
pub mod adapter;
pub mod client;
pub mod postgres;

pub use adapter::{
    Adapter, BufferedCursor, Connection, Cursor, FieldInfo, FieldNaming, QueryRequest, Response,
    Rows,
};
pub use client::Client;
pub use postgres::{PostgresAdapter, PostgresConnection};
