pub mod catalog;
pub mod files;
pub mod health;
pub mod stream;
