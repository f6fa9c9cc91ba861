pub mod operations;

pub use operations::ProfileOperations;
