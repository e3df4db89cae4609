pub mod defs;
pub mod metrix;
