use asgipack::cli::commands::{CliArgs, Commands};
use asgipack::cli::handlers::{handle_launch, handle_lint, handle_lock_check, handle_plan};
use asgipack::util::logging;
use asgipack::VERSION;

use clap::Parser;
use tracing::debug;

fn main() {
    let args = CliArgs::parse();
    logging::init_from_args(args.log_level.as_deref(), args.verbose, args.quiet);

    debug!("asgipack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args, args.quiet),
        Commands::LockCheck(lock_args) => handle_lock_check(lock_args),
        Commands::Lint(lint_args) => handle_lint(lint_args),
        Commands::Launch(launch_args) => handle_launch(launch_args),
    };

    std::process::exit(exit_code);
}
