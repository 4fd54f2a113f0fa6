pub mod mime;
pub mod paths;
