pub mod ads;
pub mod catalog;
pub mod config;
pub mod duration;
pub mod resolve;
pub mod schedule;
pub mod store;
pub mod sync;
