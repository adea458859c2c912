use clap::error::ErrorKind;
use clap::Parser;

mod cmds;
mod errors;
mod plan;

use errors::*;

fn main() {
	let result = main2();
	if let Err(e) = &result {
		eprintln!("{e}");
		std::process::exit(e.code());
	}
}

fn main2() -> Result<(), Error> {
	let cli = match cmds::Root::try_parse() {
		Ok(arguments) => arguments,
		Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
			println!("{e}");
			return Ok(());
		}
		Err(e) => return Err(Error::InvalidArguments { cause: Box::new(e) }),
	};

	if cli.verbosity >= 2 {
		eprintln!("args: {cli:?}");
	}

	match &cli.subcommand {
		Some(cmds::Subcommands::Plan(cmd)) => cmds::plan::execute(&cli, cmd),
		Some(cmds::Subcommands::Run(cmd)) => cmds::run::execute(&cli, cmd),
		None => {
			println!("nodeforge: declarative container build pipelines for node.  try 'nodeforge help'.");
			Ok(())
		}
	}
}
