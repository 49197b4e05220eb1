pub mod models;
pub mod pool;
pub mod procedures;

pub use pool::connect;
