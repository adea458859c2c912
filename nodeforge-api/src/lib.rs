pub mod cache;
pub mod image;
pub mod manager;
pub mod secret;
pub mod step;
