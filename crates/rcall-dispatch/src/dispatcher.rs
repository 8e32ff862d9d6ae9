//! Dispatcher state machine
//!
//! ```text
//! Start -> ResolveSessionRoot -> ReadDescriptor -> ResolveHandler
//!       -> DecodeArguments -> Invoke -> AwaitIfAsync
//!       -> WriteResultIfRequested -> Exit
//! ```
//!
//! Every phase either advances or ends the run with a [`DispatchError`]
//! naming the phase. The process exit code is derived from the phase.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;

use rcall_protocol::{wire, CallDescriptor, JsonCodec, SessionLayout, ValueCodec};

use crate::table::{Arguments, DispatchTable, Handler, HandlerContext, Invocation, Payload};

/// Phase a dispatch failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolveSessionRoot,
    ReadDescriptor,
    ResolveHandler,
    DecodeArguments,
    Invoke,
    AwaitIfAsync,
    WriteResult,
}

impl Phase {
    /// Process exit code for a failure in this phase.
    pub fn exit_code(self) -> u8 {
        match self {
            Phase::ResolveSessionRoot => 2,
            Phase::ReadDescriptor => 3,
            Phase::ResolveHandler => 4,
            Phase::DecodeArguments => 5,
            Phase::Invoke | Phase::AwaitIfAsync => 6,
            Phase::WriteResult => 7,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ResolveSessionRoot => "argument resolution",
            Phase::ReadDescriptor => "descriptor read",
            Phase::ResolveHandler => "handler lookup",
            Phase::DecodeArguments => "argument decoding",
            Phase::Invoke => "handler invocation",
            Phase::AwaitIfAsync => "deferred handler invocation",
            Phase::WriteResult => "result write",
        };
        f.write_str(name)
    }
}

/// Fatal dispatch failure.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {detail}")]
pub struct DispatchError {
    pub phase: Phase,
    pub detail: String,
}

impl DispatchError {
    fn new(phase: Phase, detail: impl fmt::Display) -> Self {
        Self {
            phase,
            detail: detail.to_string(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.phase.exit_code()
    }
}

/// How a successful dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Void handler; no result file.
    NoResult,
    /// Result payload written to `path`.
    Written { path: String },
}

/// Runs one call against a session directory.
pub struct Dispatcher<C: ValueCodec = JsonCodec> {
    table: DispatchTable<C>,
}

impl<C: ValueCodec> Dispatcher<C> {
    pub fn new(table: DispatchTable<C>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DispatchTable<C> {
        &self.table
    }

    /// Run with the process arguments (program name excluded). Exactly one
    /// argument, the session root, is expected.
    pub fn run<I, S>(&self, args: I) -> Result<Outcome, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let root = match args.as_slice() {
            [root] if !root.is_empty() => root.to_str().ok_or_else(|| {
                DispatchError::new(
                    Phase::ResolveSessionRoot,
                    format!("session root {:?} is not valid UTF-8", root),
                )
            })?,
            _ => {
                return Err(DispatchError::new(
                    Phase::ResolveSessionRoot,
                    format!(
                        "expected exactly one argument, the session root; got {}",
                        args.len()
                    ),
                ))
            }
        };
        self.dispatch(root)
    }

    /// Dispatch the call stored in the session rooted at `root`.
    pub fn dispatch(&self, root: &str) -> Result<Outcome, DispatchError> {
        let layout = SessionLayout::new(root);
        let descriptor = read_descriptor(&layout)?;
        tracing::debug!(method = %descriptor.method, root, "dispatching");

        let handler = self.table.handler(&descriptor.method).ok_or_else(|| {
            DispatchError::new(
                Phase::ResolveHandler,
                format!("no handler registered for {}", descriptor.method),
            )
        })?;

        let mut decoded = Vec::with_capacity(descriptor.arguments.len());
        for (index, arg) in descriptor.arguments.iter().enumerate() {
            let value = self.table.decode_argument(arg).map_err(|e| {
                DispatchError::new(Phase::DecodeArguments, format!("argument {}: {}", index, e))
            })?;
            decoded.push((arg.type_name.clone(), value));
        }

        let result_path = layout.result_path();
        remove_stale(&result_path)
            .map_err(|e| DispatchError::new(Phase::WriteResult, format!("{}: {}", result_path, e)))?;

        let mut invocation = Invocation::new(
            descriptor.method.clone(),
            Arguments::new(decoded),
            HandlerContext::new(layout),
        );

        let payload = match handler {
            Handler::Void(f) => {
                f(&mut invocation).map_err(|e| DispatchError::new(Phase::Invoke, e))?;
                None
            }
            Handler::Value(f) => {
                Some(f(&mut invocation).map_err(|e| DispatchError::new(Phase::Invoke, e))?)
            }
            Handler::Deferred(f) => Some(await_deferred(f(invocation))?),
        };

        match payload {
            None => {
                tracing::debug!(method = %descriptor.method, "void handler finished");
                Ok(Outcome::NoResult)
            }
            Some(payload) => {
                write_result(&result_path, payload)?;
                tracing::debug!(method = %descriptor.method, path = %result_path, "result written");
                Ok(Outcome::Written { path: result_path })
            }
        }
    }
}

fn read_descriptor(layout: &SessionLayout) -> Result<CallDescriptor, DispatchError> {
    let path = layout.command_path();
    let bytes =
        fs::read(&path).map_err(|e| DispatchError::new(Phase::ReadDescriptor, format!("{}: {}", path, e)))?;
    wire::decode(&bytes).map_err(|e| DispatchError::new(Phase::ReadDescriptor, format!("{}: {}", path, e)))
}

fn remove_stale(path: &str) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path, "removed stale result");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn await_deferred<F>(pending: F) -> Result<Payload, DispatchError>
where
    F: std::future::Future<Output = Result<Payload, crate::table::HandlerError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DispatchError::new(Phase::AwaitIfAsync, format!("runtime: {}", e)))?;
    runtime
        .block_on(pending)
        .map_err(|e| DispatchError::new(Phase::AwaitIfAsync, e))
}

fn write_result(path: &str, payload: Payload) -> Result<(), DispatchError> {
    let payload = payload.map_err(|e| DispatchError::new(Phase::WriteResult, e))?;
    fs::write(path, payload).map_err(|e| DispatchError::new(Phase::WriteResult, format!("{}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::HandlerError;
    use rcall_protocol::{Argument, MethodIdentity};
    use tempfile::TempDir;

    fn method(name: &str) -> MethodIdentity {
        MethodIdentity::new("tests", "T", name)
    }

    fn table() -> DispatchTable {
        let mut table = DispatchTable::new();
        table
            .register_fn(method("Upper"), |inv| {
                let s: String = inv.take(0)?;
                Ok(s.to_uppercase())
            })
            .register_async(method("Double"), |mut inv| async move {
                let n: i64 = inv.take(0)?;
                tokio::task::yield_now().await;
                Ok::<_, HandlerError>(n * 2)
            })
            .register_void(method("Nothing"), |_| Ok(()))
            .register_fn(method("Fail"), |_| -> Result<u32, HandlerError> {
                Err(HandlerError::failed("boom"))
            })
            .register_async(method("FailLater"), |_| async {
                Err::<u32, _>(HandlerError::failed("later"))
            });
        table
    }

    fn session(call: &str, args: Vec<Argument>) -> TempDir {
        let dir = TempDir::new().unwrap();
        let layout = SessionLayout::new(dir.path().to_str().unwrap());
        fs::create_dir_all(layout.session_dir()).unwrap();
        let descriptor = CallDescriptor::new(method(call), args);
        fs::write(layout.command_path(), wire::encode(&descriptor).unwrap()).unwrap();
        dir
    }

    fn root(dir: &TempDir) -> String {
        dir.path().to_str().unwrap().to_string()
    }

    fn result(dir: &TempDir) -> Option<String> {
        fs::read_to_string(dir.path().join(".session/result")).ok()
    }

    #[test]
    fn test_value_handler_writes_result() {
        let dir = session("Upper", vec![Argument::new(None, "string", "\"hello\"")]);
        let outcome = Dispatcher::new(table()).run([root(&dir)]).unwrap();
        assert!(matches!(outcome, Outcome::Written { .. }));
        assert_eq!(result(&dir).unwrap(), "\"HELLO\"");
    }

    #[test]
    fn test_deferred_handler_awaited() {
        let dir = session("Double", vec![Argument::new(None, "i64", "21")]);
        Dispatcher::new(table()).run([root(&dir)]).unwrap();
        assert_eq!(result(&dir).unwrap(), "42");
    }

    #[test]
    fn test_void_handler_clears_stale_result() {
        let dir = session("Nothing", vec![]);
        fs::write(dir.path().join(".session/result"), "\"old\"").unwrap();

        let outcome = Dispatcher::new(table()).run([root(&dir)]).unwrap();
        assert_eq!(outcome, Outcome::NoResult);
        assert!(result(&dir).is_none());
    }

    #[test]
    fn test_argument_count() {
        let dispatcher = Dispatcher::new(table());
        for args in [vec![], vec!["a".to_string(), "b".to_string()]] {
            let err = dispatcher.run(args).unwrap_err();
            assert_eq!(err.phase, Phase::ResolveSessionRoot);
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_root_fails_resolution() {
        use std::os::unix::ffi::OsStringExt;
        let root = OsString::from_vec(vec![b'/', b't', 0xff, 0xfe]);
        let err = Dispatcher::new(table()).run([root]).unwrap_err();
        assert_eq!(err.phase, Phase::ResolveSessionRoot);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_descriptor() {
        let dir = TempDir::new().unwrap();
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().starts_with("descriptor read failed: "));
    }

    #[test]
    fn test_corrupt_descriptor() {
        let dir = session("Upper", vec![]);
        fs::write(dir.path().join(".session/command"), [1u8, 0, 0]).unwrap();
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.phase, Phase::ReadDescriptor);
    }

    #[test]
    fn test_unknown_method_named() {
        let dir = session("Missing", vec![]);
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.detail.contains("[tests] T::Missing"));
    }

    #[test]
    fn test_unknown_argument_type() {
        let dir = session("Upper", vec![Argument::new(Some("geo".to_string()), "geo.Circle", "{}")]);
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_handler_failures() {
        let dir = session("Upper", vec![Argument::new(None, "i32", "5")]);
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!((err.phase, err.exit_code()), (Phase::Invoke, 6));

        let dir = session("Fail", vec![]);
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.detail, "boom");

        let dir = session("FailLater", vec![]);
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!((err.phase, err.exit_code()), (Phase::AwaitIfAsync, 6));
        assert!(!dir.path().join(".session/result").exists());
    }

    #[test]
    fn test_unwritable_result() {
        let dir = session("Upper", vec![Argument::new(None, "string", "\"x\"")]);
        // a directory where the result file should go
        fs::create_dir(dir.path().join(".session/result")).unwrap();
        let err = Dispatcher::new(table()).run([root(&dir)]).unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }
}
