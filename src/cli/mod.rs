pub mod auth;
pub mod output;
pub mod request;
pub mod session;
pub mod token_file;
