//! Remotely invokable objects.
//!
//! The `invoke` implementation enumerates exactly the remotely invokable
//! methods of an object; any other method name is rejected. This replaces
//! a runtime reflection/annotation check with a compile-time dispatch table.

use serde_json::Value;

use trellis_model::{CommunicationError, NodeId};

/// An object callable from remote nodes.
///
/// Implementations match on the method name and dispatch to the real
/// method; an unknown name must return `CallbackMethodNotAllowed`. The
/// helper `method_not_allowed` builds that error consistently.
pub trait CallbackObject: Send + Sync {
    /// Name of the remote interface this object implements.
    fn interface_name(&self) -> &'static str;

    /// Dispatch a remote invocation. Only explicitly enumerated methods may
    /// be reachable here; everything else is a hard rejection.
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CommunicationError>;

    /// Standard rejection for a method outside the remote-invokable set.
    fn method_not_allowed(&self, method: &str) -> CommunicationError {
        CommunicationError::CallbackMethodNotAllowed {
            interface: self.interface_name(),
            method: method.to_string(),
        }
    }
}

/// Marker surface every callback proxy exposes besides the remote
/// interface itself: the identity of the remote object it stands in for.
pub trait CallbackProxyHandle {
    fn object_identifier(&self) -> &str;
    fn home_platform(&self) -> &NodeId;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Adder;

    impl CallbackObject for Adder {
        fn interface_name(&self) -> &'static str {
            "Adder"
        }

        fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CommunicationError> {
            match method {
                "add" => {
                    let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                    let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(a + b))
                }
                other => Err(self.method_not_allowed(other)),
            }
        }
    }

    #[test]
    fn test_enumerated_method_dispatches() {
        let obj = Adder;
        let result = obj.invoke("add", vec![Value::from(2), Value::from(3)]).unwrap();
        assert_eq!(result, Value::from(5));
    }

    #[test]
    fn test_unlisted_method_rejected() {
        let obj = Adder;
        let err = obj.invoke("shutdown", Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            CommunicationError::CallbackMethodNotAllowed { interface: "Adder", .. }
        ));
    }
}
