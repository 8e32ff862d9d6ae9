//! Dispatch table
//!
//! Maps a [`MethodIdentity`] to a handler and an argument type tag to a
//! decoder. Populated once at process startup, before the dispatcher runs.
//!
//! Handlers come in three shapes, matching the host's call shapes:
//!
//! - [`DispatchTable::register_void`]: no result
//! - [`DispatchTable::register_fn`]: a value, computed synchronously
//! - [`DispatchTable::register_async`]: a value, produced by a future
//!
//! Arguments are decoded by the type tag each one carries, not by what the
//! handler expects. A handler declaring an abstract parameter receives
//! whatever representation the registry produced for the concrete type;
//! [`DispatchTable::register_type_as`] makes concrete types decode into a
//! shared representation.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use rcall_protocol::{
    Argument, CodecError, JsonCodec, MethodIdentity, RemoteFileRef, RemoteType, SessionLayout,
    ValueCodec,
};
use serde::Serialize;

/// A decoded argument value.
pub type ArgValue = Box<dyn Any + Send>;

type Decoder = Box<dyn Fn(&str) -> Result<ArgValue, CodecError>>;

/// Encoded result payload, or the failure to encode it.
pub(crate) type Payload = Result<String, CodecError>;

type Deferred = Pin<Box<dyn Future<Output = Result<Payload, HandlerError>>>>;

pub(crate) enum Handler {
    Void(Box<dyn Fn(&mut Invocation) -> Result<(), HandlerError>>),
    Value(Box<dyn Fn(&mut Invocation) -> Result<Payload, HandlerError>>),
    Deferred(Box<dyn Fn(Invocation) -> Deferred>),
}

/// Failure inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("argument {index} missing ({count} supplied)")]
    MissingArgument { index: usize, count: usize },

    #[error("argument {index} is a {actual}, expected {expected}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl fmt::Display) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

/// An argument could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("no decoder registered for type {type_name}{}", artifact.as_ref().map(|a| format!(" of artifact {}", a)).unwrap_or_default())]
    UnknownType {
        artifact: Option<String>,
        type_name: String,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Decoded arguments of one call, taken by position.
pub struct Arguments {
    slots: Vec<(String, Option<ArgValue>)>,
}

impl Arguments {
    pub(crate) fn new(slots: Vec<(String, ArgValue)>) -> Self {
        Self {
            slots: slots.into_iter().map(|(tag, v)| (tag, Some(v))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Type tag the argument was sent with.
    pub fn type_name(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(|(tag, _)| tag.as_str())
    }

    /// Move argument `index` out as a `T`.
    pub fn take<T: Any>(&mut self, index: usize) -> Result<T, HandlerError> {
        let count = self.slots.len();
        let (tag, slot) = self
            .slots
            .get_mut(index)
            .ok_or(HandlerError::MissingArgument { index, count })?;
        let value = slot
            .take()
            .ok_or(HandlerError::MissingArgument { index, count })?;

        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => {
                *slot = Some(value);
                Err(HandlerError::ArgumentType {
                    index,
                    expected: type_name::<T>(),
                    actual: tag.clone(),
                })
            }
        }
    }
}

/// What a handler can reach besides its arguments.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    layout: SessionLayout,
}

impl HandlerContext {
    pub(crate) fn new(layout: SessionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    /// A reference to a fresh, not yet existing file in the session.
    pub fn new_file(&self) -> RemoteFileRef {
        self.layout.fresh_file()
    }
}

/// One call as a handler sees it.
pub struct Invocation {
    method: MethodIdentity,
    pub args: Arguments,
    pub ctx: HandlerContext,
}

impl Invocation {
    pub(crate) fn new(method: MethodIdentity, args: Arguments, ctx: HandlerContext) -> Self {
        Self { method, args, ctx }
    }

    pub fn method(&self) -> &MethodIdentity {
        &self.method
    }

    /// Shorthand for `self.args.take(index)`.
    pub fn take<T: Any>(&mut self, index: usize) -> Result<T, HandlerError> {
        self.args.take(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypeKey {
    artifact: Option<String>,
    type_name: String,
}

impl TypeKey {
    fn new(artifact: Option<&str>, type_name: &str) -> Self {
        Self {
            artifact: artifact.map(str::to_string),
            type_name: type_name.to_string(),
        }
    }
}

/// Handlers and argument decoders known to a dispatcher.
pub struct DispatchTable<C: ValueCodec = JsonCodec> {
    codec: C,
    handlers: HashMap<MethodIdentity, Handler>,
    types: HashMap<TypeKey, Decoder>,
}

impl DispatchTable<JsonCodec> {
    pub fn new() -> Self {
        Self::with_codec(JsonCodec)
    }
}

impl Default for DispatchTable<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ValueCodec> DispatchTable<C> {
    /// An empty table whose type registry knows the built-in types.
    pub fn with_codec(codec: C) -> Self {
        let mut table = Self {
            codec,
            handlers: HashMap::new(),
            types: HashMap::new(),
        };
        table
            .register_type::<String>()
            .register_type::<bool>()
            .register_type::<i32>()
            .register_type::<i64>()
            .register_type::<u32>()
            .register_type::<u64>()
            .register_type::<f64>()
            .register_type::<Vec<u8>>()
            .register_type::<Vec<String>>()
            .register_type::<RemoteFileRef>();
        table
    }

    /// Decode arguments tagged `T::TYPE_NAME` as `T`.
    pub fn register_type<T: RemoteType>(&mut self) -> &mut Self {
        self.register_type_as::<T, T>(|value| value)
    }

    /// Decode arguments tagged `T::TYPE_NAME` as `T`, then hand them to
    /// handlers as `P`.
    pub fn register_type_as<T, P>(&mut self, convert: fn(T) -> P) -> &mut Self
    where
        T: RemoteType,
        P: Send + 'static,
    {
        let codec = self.codec.clone();
        let decoder: Decoder = Box::new(move |payload: &str| {
            let value: T = codec.decode(payload, T::TYPE_NAME)?;
            Ok(Box::new(convert(value)) as ArgValue)
        });
        self.types
            .insert(TypeKey::new(T::ARTIFACT, T::TYPE_NAME), decoder);
        self
    }

    /// Register a handler without a result.
    pub fn register_void<F>(&mut self, method: MethodIdentity, handler: F) -> &mut Self
    where
        F: Fn(&mut Invocation) -> Result<(), HandlerError> + 'static,
    {
        self.handlers.insert(method, Handler::Void(Box::new(handler)));
        self
    }

    /// Register a handler returning a value.
    pub fn register_fn<R, F>(&mut self, method: MethodIdentity, handler: F) -> &mut Self
    where
        R: Serialize + 'static,
        F: Fn(&mut Invocation) -> Result<R, HandlerError> + 'static,
    {
        let codec = self.codec.clone();
        let handler = move |inv: &mut Invocation| -> Result<Payload, HandlerError> {
            let value = handler(inv)?;
            Ok(codec.encode(&value, type_name::<R>()))
        };
        self.handlers.insert(method, Handler::Value(Box::new(handler)));
        self
    }

    /// Register a handler whose value is produced by a future.
    pub fn register_async<R, F, Fut>(&mut self, method: MethodIdentity, handler: F) -> &mut Self
    where
        R: Serialize + 'static,
        F: Fn(Invocation) -> Fut + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + 'static,
    {
        let codec = self.codec.clone();
        let handler = move |inv: Invocation| -> Deferred {
            let pending = handler(inv);
            let codec = codec.clone();
            Box::pin(async move {
                let value = pending.await?;
                Ok(codec.encode(&value, type_name::<R>()))
            })
        };
        self.handlers
            .insert(method, Handler::Deferred(Box::new(handler)));
        self
    }

    pub fn contains(&self, method: &MethodIdentity) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method identities, in no particular order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodIdentity> {
        self.handlers.keys()
    }

    pub(crate) fn handler(&self, method: &MethodIdentity) -> Option<&Handler> {
        self.handlers.get(method)
    }

    /// Decode `arg` by its own type tag.
    pub fn decode_argument(&self, arg: &Argument) -> Result<ArgValue, ArgumentError> {
        let key = TypeKey::new(arg.artifact.as_deref(), &arg.type_name);
        let decoder = self
            .types
            .get(&key)
            .ok_or_else(|| ArgumentError::UnknownType {
                artifact: arg.artifact.clone(),
                type_name: arg.type_name.clone(),
            })?;
        Ok(decoder(&arg.payload)?)
    }
}
