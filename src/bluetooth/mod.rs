pub mod btle;
pub mod connection;
pub mod constants;
pub mod platform;
pub mod raster;
pub mod scanner;
pub mod state_manager;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;
