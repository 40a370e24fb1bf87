pub mod token_source;
pub mod transport;
