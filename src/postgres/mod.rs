// PostgreSQL backends - the two lock-based relational variants.
//
// Split into sub-modules:
// - config: driver construction (pooled and single-connection)
// - adapter: Backend/SessionHandle implementations
// - params: parameter conversion between middleware and Postgres types
// - query: result extraction into middleware rows

pub mod adapter;
pub mod config;
pub mod params;
pub mod query;

pub use adapter::{PooledPostgres, SinglePostgres};
pub use config::{open, open_pool, open_with_client};
pub use params::Params;
