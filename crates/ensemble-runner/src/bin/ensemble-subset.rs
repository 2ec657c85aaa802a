//! ensemble-subset binary entry point

use ensemble_runner::cli::{parse_or_exit, SubsetCli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    parse_or_exit::<SubsetCli>().run().await
}
