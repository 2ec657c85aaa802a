//! ensemble-browse binary entry point

use ensemble_runner::cli::{parse_or_exit, BrowseCli};
use std::process::ExitCode;

fn main() -> ExitCode {
    parse_or_exit::<BrowseCli>().run()
}
