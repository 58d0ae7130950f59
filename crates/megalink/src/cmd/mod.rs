use std::cell::RefCell;
use std::rc::Rc;

use clap::{Args, Subcommand};

use megalink_link::LoopbackLink;
use megalink_session::{Session, SimCoprocessor};
use megalink_task::InstantTicks;

use crate::exit::{session_error, CliResult, INTERNAL};

pub mod demo;
pub mod scan;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Scan for networks using the simulated coprocessor.
    Scan(ScanArgs),
    /// Run the full protocol tour against the simulated coprocessor.
    Demo(DemoArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Scan(args) => scan::run(args),
        Command::Demo(args) => demo::run(args),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Ticks the simulated coprocessor takes to associate.
    #[arg(long, default_value = "30")]
    pub join_delay: u16,
}

/// A session wired to the simulated coprocessor, with the sim installed as
/// the scheduler's user task.
pub fn sim_session() -> CliResult<(
    Session<LoopbackLink, InstantTicks>,
    Rc<RefCell<SimCoprocessor>>,
)> {
    let (near, far) = LoopbackLink::pair();
    let sim = SimCoprocessor::new(far)
        .map_err(|err| session_error("sim setup", err))?;
    let sim = Rc::new(RefCell::new(sim));

    let mut session = Session::new(near, InstantTicks::default());
    session
        .init()
        .map_err(|err| session_error("session init", err))?;

    let task_sim = Rc::clone(&sim);
    session
        .scheduler_mut()
        .user_set(Some(Box::new(move |handle| {
            if task_sim.borrow_mut().service() {
                handle.post(false);
            }
        })));

    if !session.is_ready() {
        return Err(crate::exit::CliError::new(INTERNAL, "session not ready"));
    }
    Ok((session, sim))
}
