pub mod acquisition;
pub mod archive;
pub mod config;
pub mod dispatch;
pub mod observation;
pub mod simulate;
pub mod state;
pub mod station;
pub mod web;
