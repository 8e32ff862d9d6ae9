//! rcall-dispatch - target-side dispatcher
//!
//! Reads the call descriptor from `<root>/.session/command`, resolves the
//! handler from a [`DispatchTable`], decodes each argument by its own type
//! tag, invokes the handler and writes the encoded result to
//! `<root>/.session/result`.
//!
//! Deployments link their own handlers by building a table and handing it
//! to [`run_main`]:
//!
//! ```no_run
//! use rcall_dispatch::{run_main, DispatchTable};
//! use rcall_protocol::MethodIdentity;
//!
//! fn main() -> std::process::ExitCode {
//!     let mut table = DispatchTable::new();
//!     table.register_fn(MethodIdentity::new("billing", "Invoice", "Total"), |inv| {
//!         let cents: i64 = inv.take(0)?;
//!         Ok(cents * 2)
//!     });
//!     run_main(table)
//! }
//! ```

use std::process::ExitCode;

use rcall_protocol::ValueCodec;
use tracing_subscriber::EnvFilter;

pub mod dispatcher;
pub mod builtin;
pub mod table;

pub use dispatcher::{DispatchError, Dispatcher, Outcome, Phase};
pub use table::{
    ArgValue, ArgumentError, Arguments, DispatchTable, HandlerContext, HandlerError, Invocation,
};

/// Environment variable holding the log filter, e.g. `RCALL_LOG=debug`.
pub const LOG_ENV: &str = "RCALL_LOG";

/// Install the stderr log subscriber. Safe to call more than once.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Process entry point: dispatch the call named by the first process
/// argument and map failures to the phase exit code.
pub fn run_main<C: ValueCodec>(table: DispatchTable<C>) -> ExitCode {
    init_logging();

    let dispatcher = Dispatcher::new(table);
    match dispatcher.run(std::env::args_os().skip(1)) {
        Ok(outcome) => {
            tracing::debug!(?outcome, "dispatch complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rcall-dispatch: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
