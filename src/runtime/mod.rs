pub mod memory_store;
pub mod rpc_store;
pub mod store;
