pub mod hex;
pub mod parser;
