use std::path::Path;

use reqwest::Method;
use serde_json::Value;

use crate::error::AmoError;
use crate::request::RequestOptions;

use super::output::print_data;
use super::session::Session;

/// Issue one API call and print the response data.
pub async fn run_request(
    config_path: Option<&str>,
    token_file: Option<&Path>,
    method: Method,
    path: &str,
    data: &Value,
) -> Result<(), AmoError> {
    let mut session = Session::open(config_path, token_file)?;
    let result = session
        .connection
        .request(path, data, method, &RequestOptions::default())
        .await;
    // The token may have been renewed even when the call itself failed.
    session.persist_new_token()?;
    print_data(&result?.data);
    Ok(())
}
