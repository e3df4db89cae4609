pub mod codec;
pub mod records;
pub mod stats;
pub mod tick_math;
pub mod window;
