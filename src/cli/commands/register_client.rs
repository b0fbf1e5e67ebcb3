use clap::{Arg, ArgAction, Command};

pub const NAME: &str = "register-client";
pub const ARG_OWNER: &str = "owner";
pub const ARG_NAME: &str = "name";
pub const ARG_REDIRECT_URI: &str = "redirect-uri";

#[must_use]
pub fn subcommand() -> Command {
    Command::new(NAME)
        .about("Register an OAuth2 client and print its one-time secret")
        .arg(
            Arg::new(ARG_OWNER)
                .long(ARG_OWNER)
                .help("User id that owns the client")
                .required(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_NAME)
                .long(ARG_NAME)
                .help("Display name shown on the consent page")
                .required(true),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URI)
                .long(ARG_REDIRECT_URI)
                .help("Exact redirect URI; repeat for several")
                .required(true)
                .action(ArgAction::Append),
        )
}
