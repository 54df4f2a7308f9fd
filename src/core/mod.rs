pub mod browser;
pub mod converter;
pub mod resolver;
