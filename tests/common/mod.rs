// Common utilities for integration tests

mod test_harness;

#[allow(unused_imports)]
pub use poolscope::test_utils::fixtures::{raw_ladder, test_pool};

#[allow(unused_imports)]
pub use test_harness::{PoolscopeHarness, SNAPSHOT_HOUR};
