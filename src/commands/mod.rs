pub mod adapt;
pub mod show;
