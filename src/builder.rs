//! Call descriptor builder
//!
//! A [`CallPlan`] is the host-side record of one intended remote call: the
//! call shape and the argument values captured when the plan was made.
//! Values are encoded the moment they are captured, so later changes to
//! the original binding never reach the descriptor.
//!
//! ```ignore
//! let mut count = 41;
//! let plan = CallPlan::new("tools", "Text", "Repeat")
//!     .literal("hello".to_string())
//!     .capture(&count);
//! count += 1; // the plan still carries 41
//! let descriptor = plan.build()?;
//! ```

use rcall_protocol::{Argument, CallDescriptor, CodecError, JsonCodec, MethodIdentity, RemoteType, ValueCodec};

/// Reasons a plan cannot become a call descriptor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("{method} needs a receiver instance; only static methods can be called remotely")]
    InstanceReceiver { method: MethodIdentity },

    #[error("composite call of {calls} chained methods; a plan must be a single direct call")]
    Composite { calls: usize },

    #[error("argument {index} is a computed expression ({expression}); pass a literal or a captured value")]
    ComputedArgument { index: usize, expression: String },

    #[error("{method} has no containing artifact")]
    MissingArtifact { method: MethodIdentity },

    #[error("argument {index} could not be encoded: {source}")]
    Encode {
        index: usize,
        #[source]
        source: CodecError,
    },
}

/// Shape of the call a plan describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallShape {
    /// A method reachable without an instance. The only remotable shape.
    Static(MethodIdentity),
    /// A method called on a receiver value.
    Instance {
        method: MethodIdentity,
        receiver: String,
    },
    /// Several chained or nested calls.
    Composite(Vec<MethodIdentity>),
}

#[derive(Debug, Clone)]
enum PlanArgument {
    Literal(Argument),
    Snapshot(Argument),
    Computed(String),
    Failed(CodecError),
}

/// Pre-validated call plan.
#[derive(Debug, Clone)]
pub struct CallPlan<C: ValueCodec = JsonCodec> {
    codec: C,
    shape: CallShape,
    arguments: Vec<PlanArgument>,
}

impl CallPlan<JsonCodec> {
    /// Plan a static call using the JSON codec.
    pub fn new(
        artifact: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::with_shape(
            JsonCodec,
            CallShape::Static(MethodIdentity::new(artifact, type_name, method)),
        )
    }
}

impl<C: ValueCodec> CallPlan<C> {
    pub fn with_shape(codec: C, shape: CallShape) -> Self {
        Self {
            codec,
            shape,
            arguments: Vec::new(),
        }
    }

    pub fn shape(&self) -> &CallShape {
        &self.shape
    }

    /// Append a literal argument.
    pub fn literal<T: RemoteType>(self, value: T) -> Self {
        let arg = self.encode(&value);
        self.push(arg, PlanArgument::Literal)
    }

    /// Append a snapshot of a local binding.
    pub fn capture<T: RemoteType>(self, binding: &T) -> Self {
        let arg = self.encode(binding);
        self.push(arg, PlanArgument::Snapshot)
    }

    /// Record an argument that is neither a literal nor a captured value.
    /// Such a plan never builds.
    pub fn computed(mut self, expression: impl Into<String>) -> Self {
        self.arguments.push(PlanArgument::Computed(expression.into()));
        self
    }

    fn encode<T: RemoteType>(&self, value: &T) -> Result<Argument, CodecError> {
        let payload = self.codec.encode(value, T::TYPE_NAME)?;
        Ok(Argument::new(
            T::ARTIFACT.map(str::to_string),
            T::TYPE_NAME,
            payload,
        ))
    }

    fn push(
        mut self,
        arg: Result<Argument, CodecError>,
        kind: fn(Argument) -> PlanArgument,
    ) -> Self {
        self.arguments.push(match arg {
            Ok(arg) => kind(arg),
            Err(e) => PlanArgument::Failed(e),
        });
        self
    }

    /// Produce the call descriptor.
    pub fn build(&self) -> Result<CallDescriptor, DescriptorError> {
        let method = match &self.shape {
            CallShape::Static(method) => method,
            CallShape::Instance { method, .. } => {
                return Err(DescriptorError::InstanceReceiver {
                    method: method.clone(),
                })
            }
            CallShape::Composite(calls) => {
                return Err(DescriptorError::Composite { calls: calls.len() })
            }
        };
        if method.artifact.is_empty() {
            return Err(DescriptorError::MissingArtifact {
                method: method.clone(),
            });
        }

        let arguments = self
            .arguments
            .iter()
            .enumerate()
            .map(|(index, arg)| match arg {
                PlanArgument::Literal(arg) | PlanArgument::Snapshot(arg) => Ok(arg.clone()),
                PlanArgument::Computed(expression) => Err(DescriptorError::ComputedArgument {
                    index,
                    expression: expression.clone(),
                }),
                PlanArgument::Failed(source) => Err(DescriptorError::Encode {
                    index,
                    source: source.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CallDescriptor::new(method.clone(), arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcall_protocol::{wire, RemoteFileRef};

    #[test]
    fn test_literal_and_captured_values_decode_exactly() {
        let mut count: i32 = 41;
        let plan = CallPlan::new("tools", "Text", "Repeat")
            .literal("hello".to_string())
            .capture(&count);
        count += 1;
        assert_eq!(count, 42);

        let descriptor = wire::decode(&wire::encode(&plan.build().unwrap()).unwrap()).unwrap();
        assert_eq!(descriptor.method, MethodIdentity::new("tools", "Text", "Repeat"));
        assert_eq!(descriptor.arguments.len(), 2);

        let codec = JsonCodec;
        let text: String = codec.decode(&descriptor.arguments[0].payload, "string").unwrap();
        let n: i32 = codec.decode(&descriptor.arguments[1].payload, "i32").unwrap();
        assert_eq!(text, "hello");
        assert_eq!(n, 41);
        assert_eq!(descriptor.arguments[1].type_name, "i32");
        assert_eq!(descriptor.arguments[1].artifact, None);
    }

    #[test]
    fn test_file_reference_argument_tag() {
        let file = RemoteFileRef::new("/srv/s/.session/abc");
        let descriptor = CallPlan::new("tools", "Text", "Upper")
            .capture(&file)
            .build()
            .unwrap();
        assert_eq!(descriptor.arguments[0].type_name, "rcall.RemoteFileRef");
        assert_eq!(descriptor.arguments[0].payload, "\"/srv/s/.session/abc\"");
    }

    #[test]
    fn test_instance_call_rejected() {
        let plan = CallPlan::with_shape(
            JsonCodec,
            CallShape::Instance {
                method: MethodIdentity::new("tools", "Text", "Upper"),
                receiver: "text".to_string(),
            },
        );
        assert!(matches!(
            plan.build(),
            Err(DescriptorError::InstanceReceiver { .. })
        ));
    }

    #[test]
    fn test_composite_call_rejected() {
        let plan = CallPlan::with_shape(
            JsonCodec,
            CallShape::Composite(vec![
                MethodIdentity::new("tools", "Text", "Upper"),
                MethodIdentity::new("tools", "Text", "Trim"),
            ]),
        );
        assert_eq!(plan.build().unwrap_err(), DescriptorError::Composite { calls: 2 });
    }

    #[test]
    fn test_computed_argument_rejected() {
        let plan = CallPlan::new("tools", "Text", "Upper")
            .literal(1i64)
            .computed("read_line()");
        assert_eq!(
            plan.build().unwrap_err(),
            DescriptorError::ComputedArgument {
                index: 1,
                expression: "read_line()".to_string()
            }
        );
    }

    #[test]
    fn test_missing_artifact_rejected() {
        let plan = CallPlan::new("", "Text", "Upper");
        assert!(matches!(
            plan.build(),
            Err(DescriptorError::MissingArtifact { .. })
        ));
    }

    #[derive(serde::Deserialize)]
    struct Unencodable;

    impl serde::Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refuses to serialize"))
        }
    }

    impl RemoteType for Unencodable {
        const TYPE_NAME: &'static str = "test.Unencodable";
    }

    #[test]
    fn test_encode_failure_reported_at_build() {
        let plan = CallPlan::new("tools", "Math", "Sqrt").literal(Unencodable);
        assert!(matches!(
            plan.build(),
            Err(DescriptorError::Encode { index: 0, .. })
        ));
    }
}
