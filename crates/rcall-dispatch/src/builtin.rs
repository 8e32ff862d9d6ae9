//! Built-in handlers
//!
//! Registered under artifact `rcall.builtin`, type `Builtin`. The stock
//! `rcall-dispatch` binary serves only these, which is enough to check a
//! deployment end to end: descriptor transport, argument decoding, deferred
//! results, file references and void calls.

use std::fs;

use rcall_protocol::{MethodIdentity, RemoteFileRef, ValueCodec, LANE_VERSION, SESSION_DIR};

use crate::table::{DispatchTable, HandlerError, Invocation};

/// Artifact name of the built-in handlers.
pub const BUILTIN_ARTIFACT: &str = "rcall.builtin";

/// Type name of the built-in handlers.
pub const BUILTIN_TYPE: &str = "Builtin";

/// File written by `Touch`, relative to the session root.
pub const TOUCH_MARKER: &str = "touched";

/// Identity of the built-in method `name`.
pub fn builtin_method(name: &str) -> MethodIdentity {
    MethodIdentity::new(BUILTIN_ARTIFACT, BUILTIN_TYPE, name)
}

fn upper(inv: &mut Invocation) -> Result<String, HandlerError> {
    let text: String = inv.take(0)?;
    Ok(text.to_uppercase())
}

fn upper_file(inv: &mut Invocation) -> Result<RemoteFileRef, HandlerError> {
    let input: RemoteFileRef = inv.take(0)?;
    let text = fs::read_to_string(input.path())?;

    let output = inv.ctx.new_file();
    fs::write(output.path(), text.to_uppercase())?;
    tracing::debug!(%input, %output, "uppercased file");
    Ok(output)
}

fn touch(inv: &mut Invocation) -> Result<(), HandlerError> {
    let content: String = inv.take(0)?;
    let marker = format!("{}/{}/{}", inv.ctx.layout().root(), SESSION_DIR, TOUCH_MARKER);
    fs::write(marker, content)?;
    Ok(())
}

/// Add the built-in handlers to `table`.
pub fn register_builtins<C: ValueCodec>(table: &mut DispatchTable<C>) -> &mut DispatchTable<C> {
    table
        .register_fn(builtin_method("Version"), |_| Ok(LANE_VERSION.to_string()))
        .register_fn(builtin_method("Echo"), |inv| inv.take::<String>(0))
        .register_fn(builtin_method("Upper"), upper)
        .register_async(builtin_method("UpperDeferred"), |mut inv| async move {
            tokio::task::yield_now().await;
            upper(&mut inv)
        })
        .register_fn(builtin_method("UpperFile"), upper_file)
        .register_void(builtin_method("Touch"), touch)
}

/// The table served by the stock binary.
pub fn builtin_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    register_builtins(&mut table);
    table
}
