pub mod dump;
pub mod migrate;
