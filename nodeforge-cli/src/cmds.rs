pub mod plan;
pub mod run;

#[derive(clap::Parser, Debug)]
pub struct Root {
	#[command(subcommand)]
	pub subcommand: Option<Subcommands>,

	/// Raise verbosity by specifying this flag repeatedly.
	#[arg(short, action = clap::ArgAction::Count)]
	pub verbosity: u8,
}

#[derive(clap::Subcommand, Debug)]
pub enum Subcommands {
	/// fold a plan file through a build pipeline and print the resolved state as json.
	Plan(plan::Cmd),

	/// fold a plan file, then execute a named recipe (test, lint, build, ...) against the result.
	Run(run::Cmd),
}
