//! rcall-dispatch binary
//!
//! Stock dispatcher serving the built-in handlers. Invoked as
//! `rcall-dispatch <session-root>`.

use std::process::ExitCode;

fn main() -> ExitCode {
    rcall_dispatch::run_main(rcall_dispatch::builtin::builtin_table())
}
