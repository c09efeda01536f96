//! Clap command tree definition.

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

fn registry_arg() -> Arg {
    Arg::new("registry")
        .help("Registry file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("tally")
        .about("Inspect coverage registries and collect distributed coverage")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Debug logging (overridden by TALLY_LOG)")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("header")
                .about("Print the fixed header of a registry")
                .arg(registry_arg()),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print sessions, packages and coverage of a registry")
                .arg(registry_arg())
                .arg(
                    Arg::new("files")
                        .long("files")
                        .help("List every file")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("contexts")
                        .long("contexts")
                        .help("List user-defined contexts")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("collect")
                .about("Run a collector service and merge the hits it receives")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("TOML file with distributed recording settings")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("set")
                        .long("set")
                        .help("Overrides as key=value;key=value (e.g. host=0.0.0.0;port=1198)"),
                )
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .help("Seconds to collect before stopping")
                        .value_parser(value_parser!(u64))
                        .default_value("60"),
                )
                .arg(
                    Arg::new("registry")
                        .long("registry")
                        .help("Registry receiving the collected hits")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_collect_defaults() {
        let m = build_cli()
            .try_get_matches_from(["tally", "collect", "--set", "port=0"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert_eq!(sub.get_one::<u64>("duration"), Some(&60));
        assert_eq!(sub.get_one::<String>("set").map(String::as_str), Some("port=0"));
        assert!(sub.get_one::<PathBuf>("registry").is_none());
    }

    #[test]
    fn test_header_requires_path() {
        assert!(build_cli()
            .try_get_matches_from(["tally", "header"])
            .is_err());
    }
}
