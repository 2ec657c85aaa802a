//! ensemble-contour binary entry point

use ensemble_runner::cli::{parse_or_exit, ContourCli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    parse_or_exit::<ContourCli>().run().await
}
