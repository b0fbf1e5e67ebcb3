use crate::credentials::encoding::PublicKeyEncoding;
use clap::{Arg, Command};

pub const NAME: &str = "migrate";
pub const ARG_PAGE_SIZE: &str = "page-size";
pub const ARG_KEY_ENCODING: &str = "key-encoding";

#[must_use]
pub fn subcommand() -> Command {
    Command::new(NAME)
        .about("Convert legacy U2F security keys to the current credential layout")
        .arg(
            Arg::new(ARG_PAGE_SIZE)
                .long(ARG_PAGE_SIZE)
                .help("Rows read per page; non-positive values use the default")
                .env("LATCHKEY_MIGRATION_PAGE_SIZE")
                .default_value("50")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_KEY_ENCODING)
                .long(ARG_KEY_ENCODING)
                .help("Public key encoding for migrated rows: cose or uncompressed")
                .env("LATCHKEY_KEY_ENCODING")
                .default_value("cose")
                .value_parser(clap::value_parser!(PublicKeyEncoding)),
        )
}
