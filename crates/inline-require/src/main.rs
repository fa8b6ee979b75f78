use std::io::{self, BufWriter};

use anyhow::Result;
use inline_require::worker;

fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr only
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let stdin = io::stdin().lock();
    let stdout = BufWriter::new(io::stdout().lock());
    worker::serve(stdin, stdout)
}
