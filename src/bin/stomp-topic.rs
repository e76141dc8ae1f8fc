use clap::Parser;
use std::process::ExitCode;

mod cli;

use cli::args::Cli;
use cli::exit_codes;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    cli::init_logging(cli.verbose);

    let invocation = match cli.into_invocation() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(exit_codes::USAGE_ERROR);
        }
    };

    match cli::run::run(invocation).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err((message, code)) => {
            eprintln!("{}", message);
            ExitCode::from(code)
        }
    }
}
