use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod id;
pub mod sig;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode, decode and list message identifiers.
    #[command(subcommand)]
    Id(IdCommand),
    /// Check argument values against a type signature.
    #[command(subcommand)]
    Sig(SigCommand),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Id(IdCommand::Encode(args)) => id::encode(args, format),
        Command::Id(IdCommand::Decode(args)) => id::decode(args, format),
        Command::Id(IdCommand::WellKnown) => id::well_known(format),
        Command::Sig(SigCommand::Check(args)) => sig::check(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Subcommand, Debug)]
pub enum IdCommand {
    /// Pack four indices into an identifier.
    Encode(EncodeArgs),
    /// Split an identifier into its indices.
    Decode(DecodeArgs),
    /// List the identifiers the bus itself defines.
    WellKnown,
}

#[derive(Subcommand, Debug)]
pub enum SigCommand {
    /// Convert JSON values into typed arguments.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Object list (0 bus, 1 local, 2 proxy).
    pub list: u8,
    /// Object position within the list.
    pub object: u8,
    /// Interface position within the object.
    pub interface: u8,
    /// Member position within the interface.
    pub member: u8,
    /// Set the reply flag.
    #[arg(long)]
    pub reply: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Identifier as 0x-hex, decimal, or dotted list.object.interface.member.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Type signature, e.g. "sqx".
    pub signature: String,
    /// JSON array of values, one per signature position.
    #[arg(long, default_value = "[]")]
    pub values: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
