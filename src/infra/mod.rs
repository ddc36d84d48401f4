pub mod clock;
pub mod es_store;
pub mod ids;
pub mod memory_store;
