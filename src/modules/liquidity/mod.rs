pub mod collector;
pub mod config;
pub mod consts;
pub mod schemas;
pub mod server;
pub mod sources;
pub mod storage;
pub mod utils;
