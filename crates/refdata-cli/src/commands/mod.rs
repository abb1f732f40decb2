pub mod lookup;
pub mod purge;
pub mod streams;
