pub mod reqwest;
pub mod tls;
