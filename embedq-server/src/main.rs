use std::process::ExitCode;

use clap::Parser;
use embedq::server::{self, Params};

#[tokio::main]
async fn main() -> ExitCode {
    server::run(Params::parse()).await
}
