/// Event is the type used to shuttle information produced by executing
/// commands.  Engines buffer output to whole lines before sending, and
/// finish every execution with exactly one `ExitCode` event.
#[derive(Clone, Debug)]
pub struct Event {
	/// The execution ident the event belongs to.
	pub topic: String,
	pub body: EventBody,
}

#[derive(Clone, Debug)]
pub enum EventBody {
	Output { channel: OutputChannel, line: String },
	ExitCode(Option<i32>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputChannel {
	Stdout,
	Stderr,
}
