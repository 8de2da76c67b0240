pub mod error;
pub mod observation;
