pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod gmail;
pub mod output;
pub mod sync;
