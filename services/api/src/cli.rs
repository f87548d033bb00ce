use crate::demo::{
    run_demo, run_income, run_loan, run_resolve, run_utility, DemoArgs, IncomeArgs, LoanArgs,
    ResolveArgs, UtilityArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use resource_hub::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Community Resource Hub",
    about = "Run the multi-tenant resource portal service and its calculators from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one of the eligibility calculators against the configured reference tables
    Calculate {
        #[command(subcommand)]
        command: CalculateCommand,
    },
    /// Show which tenant a host and path resolve to
    Resolve(ResolveArgs),
    /// Walk through a seeded in-memory portal with live updates
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum CalculateCommand {
    /// Monthly payment, total interest, and total cost of an amortized loan
    Loan(LoanArgs),
    /// Whether a household falls under the area-median-income limit
    Income(IncomeArgs),
    /// Utility assistance tier for a household's poverty-level ratio
    Utility(UtilityArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Calculate { command } => match command {
            CalculateCommand::Loan(args) => run_loan(args),
            CalculateCommand::Income(args) => run_income(args),
            CalculateCommand::Utility(args) => run_utility(args),
        },
        Command::Resolve(args) => run_resolve(args),
        Command::Demo(args) => run_demo(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["resource-hub-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn utility_type_is_parsed_from_its_label() {
        let cli = Cli::try_parse_from([
            "resource-hub-api",
            "calculate",
            "utility",
            "--household-size",
            "3",
            "--monthly-income",
            "1500",
            "--monthly-cost",
            "200",
            "--utility-type",
            "gas",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Calculate {
                command: CalculateCommand::Utility(args),
            }) => assert_eq!(args.utility_type.label(), "gas"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
