pub mod rest;

pub use rest::BingxClient;
