pub mod mock;
pub mod worker;
