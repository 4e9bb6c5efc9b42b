//! the test_utils folder here will share utils or test components between
//! unit tests
mod common;
mod peers;

pub use common::*;
pub use peers::*;
