//! Command-line interface of the `api` binary.

use clap::{Parser, Subcommand};

use crate::stress::StressTestArgs;

/// Order management service.
#[derive(Debug, Parser)]
#[command(name = "api", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve the HTTP API (the default when no subcommand is given).
    #[command(alias = "http-serve")]
    Serve,

    /// Post generated orders to a running server and report how many succeeded.
    StressTest(StressTestArgs),
}

impl Cli {
    /// The subcommand to run, defaulting to [`Command::Serve`].
    pub fn command(self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stress::DEFAULT_TARGET;

    #[test]
    fn serves_by_default() {
        let cli = Cli::try_parse_from(["api"]).unwrap();
        assert!(matches!(cli.command(), Command::Serve));

        let cli = Cli::try_parse_from(["api", "http-serve"]).unwrap();
        assert!(matches!(cli.command(), Command::Serve));
    }

    #[test]
    fn stress_test_defaults() {
        let cli = Cli::try_parse_from(["api", "stress-test"]).unwrap();
        let Command::StressTest(args) = cli.command() else {
            panic!("expected stress-test");
        };
        assert_eq!(args.num_orders, 1000);
        assert_eq!(args.batch_size, 100);
        assert_eq!(args.concurrency, 10);
        assert_eq!(args.url, DEFAULT_TARGET);
    }

    #[test]
    fn stress_test_flags() {
        let cli = Cli::try_parse_from([
            "api",
            "stress-test",
            "--num",
            "50",
            "--batch",
            "5",
            "--concurrency",
            "2",
            "--url",
            "http://orders.internal:8080/api/v1/orders",
        ])
        .unwrap();
        let Command::StressTest(args) = cli.command() else {
            panic!("expected stress-test");
        };
        assert_eq!(args.num_orders, 50);
        assert_eq!(args.batch_size, 5);
        assert_eq!(args.concurrency, 2);
        assert_eq!(args.url, "http://orders.internal:8080/api/v1/orders");
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(Cli::try_parse_from(["api", "stress-test", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["api", "stress-test", "--batch", "0"]).is_err());
    }
}
