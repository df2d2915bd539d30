pub mod compile;
pub mod probe;
pub mod validate;
