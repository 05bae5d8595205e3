mod memory;
mod postgres;

pub use memory::MemoryAdapter;
pub use postgres::PostgresAdapter;
