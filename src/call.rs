use crate::error::{LinkError, Result};
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

type ErasedCall = Arc<dyn Fn(&Session, &str, &str) -> Result<String> + Send + Sync>;

fn decode_arg<A: DeserializeOwned>(arg: &str) -> Result<A> {
    serde_json::from_str(arg).map_err(|e| LinkError::Decode(format!("parse arg error {}", e)))
}

fn encode_ret<R: Serialize>(ret: anyhow::Result<R>) -> Result<String> {
    let ret = ret.map_err(|e| LinkError::Call(format!("{:#}", e)))?;
    serde_json::to_string(&ret).map_err(|e| LinkError::Encode(e.to_string()))
}

/// A remotely invokable handler.
///
/// Every shape is called with the caller's session and the request id; the
/// argument (if any) is decoded from JSON and the return value (if any) is
/// encoded back to JSON. Shapes without a return value answer `"null"`.
#[derive(Clone)]
pub struct CallHandler {
    call: ErasedCall,
}

impl CallHandler {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Session, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |session: &Session, id: &str, _arg: &str| encode_ret(handler(session, id))),
        }
    }

    pub fn with_arg<A, F>(handler: F) -> Self
    where
        A: DeserializeOwned,
        F: Fn(&Session, &str, A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |session: &Session, id: &str, arg: &str| {
                let arg = decode_arg(arg)?;
                encode_ret(handler(session, id, arg))
            }),
        }
    }

    pub fn returning<R, F>(handler: F) -> Self
    where
        R: Serialize,
        F: Fn(&Session, &str) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |session: &Session, id: &str, _arg: &str| encode_ret(handler(session, id))),
        }
    }

    pub fn with_arg_returning<A, R, F>(handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(&Session, &str, A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |session: &Session, id: &str, arg: &str| {
                let arg = decode_arg(arg)?;
                encode_ret(handler(session, id, arg))
            }),
        }
    }

    /// Runs the handler. Panics are not caught here; see
    /// `NetworkComponent::invoke_call` for the fault boundary.
    pub fn invoke(&self, session: &Session, request_id: &str, arg: &str) -> Result<String> {
        (self.call)(session, request_id, arg)
    }
}

impl fmt::Debug for CallHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallHandler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Move {
        x: i32,
    }

    #[test]
    fn test_handler_shapes() {
        let session = Session::new("k");

        let plain = CallHandler::new(|_, _| Ok(()));
        assert_eq!(plain.invoke(&session, "r1", "").unwrap(), "null");

        let returning = CallHandler::returning(|_, id| Ok(id.to_string()));
        assert_eq!(returning.invoke(&session, "r1", "").unwrap(), "\"r1\"");

        let with_arg = CallHandler::with_arg(|_, _, arg: String| {
            anyhow::ensure!(arg == "test", "not test");
            Ok(())
        });
        assert!(with_arg.invoke(&session, "r1", "\"test\"").is_ok());
        assert!(matches!(with_arg.invoke(&session, "r1", "\"other\""), Err(LinkError::Call(_))));

        let echo = CallHandler::with_arg_returning(|_, _, arg: Move| Ok(Move { x: arg.x * 2 }));
        assert_eq!(echo.invoke(&session, "r1", r#"{"x":4}"#).unwrap(), r#"{"x":8}"#);
    }

    #[test]
    fn test_malformed_arg() {
        let session = Session::new("k");
        let echo = CallHandler::with_arg_returning(|_, _, arg: Move| Ok(arg));
        assert!(matches!(echo.invoke(&session, "r1", "{\"x\":"), Err(LinkError::Decode(_))));
    }
}
