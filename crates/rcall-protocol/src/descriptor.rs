//! Call descriptor types.

use std::fmt;

/// Identity of a remotely invocable method.
///
/// Used both as the head of a [`CallDescriptor`] and as the dispatch key on
/// the target side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIdentity {
    /// Deployable unit containing the method.
    pub artifact: String,
    /// Type the method belongs to.
    pub type_name: String,
    /// Method name.
    pub method: String,
}

impl MethodIdentity {
    pub fn new(
        artifact: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}::{}", self.artifact, self.type_name, self.method)
    }
}

/// One argument of a call.
///
/// The argument carries its own concrete type, which may be more specific
/// than the parameter type the handler declares. The dispatcher decodes the
/// payload by this tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Deployable unit defining the argument's type, if not built in.
    pub artifact: Option<String>,
    /// Concrete type name of the value.
    pub type_name: String,
    /// Codec-encoded value.
    pub payload: String,
}

impl Argument {
    pub fn new(
        artifact: Option<String>,
        type_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            artifact,
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }
}

/// Serializable description of one method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub method: MethodIdentity,
    pub arguments: Vec<Argument>,
}

impl CallDescriptor {
    pub fn new(method: MethodIdentity, arguments: Vec<Argument>) -> Self {
        Self { method, arguments }
    }
}
