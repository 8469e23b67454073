use crate::error::RestError;

/// What a handler asks the dispatch engine to do once it returns.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Run the next handler, or finish the chain when none remain.
    Next,
    /// Stop the chain and deliver the error.
    Fail(RestError),
    /// Stop the chain without an error; the handler has already responded.
    Stop,
    /// Continue with the handlers of the named route. Allowed once per request.
    Redirect(String),
}

impl Flow {
    pub fn fail(err: impl Into<RestError>) -> Self {
        Flow::Fail(err.into())
    }

    pub fn redirect(name: impl Into<String>) -> Self {
        Flow::Redirect(name.into())
    }

    /// Forwards `err` to the chain when present.
    ///
    /// `Some` means the error was handled and the returned flow must be returned from the
    /// handler, `None` means there was nothing to forward.
    ///
    /// ```
    /// use micro_rest::{Flow, RestError};
    ///
    /// fn step(lookup: Result<u32, RestError>) -> Flow {
    ///     if let Some(flow) = Flow::if_error(lookup.err()) {
    ///         return flow;
    ///     }
    ///     Flow::Next
    /// }
    ///
    /// assert!(matches!(step(Ok(1)), Flow::Next));
    /// assert!(matches!(step(Err(RestError::bad_request("nope"))), Flow::Fail(_)));
    /// ```
    pub fn if_error<E: Into<RestError>>(err: Option<E>) -> Option<Self> {
        err.map(|err| Flow::Fail(err.into()))
    }
}

impl<E: Into<RestError>> From<Result<(), E>> for Flow {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Flow::Next,
            Err(err) => Flow::Fail(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Flow;
    use crate::error::RestError;

    #[test]
    fn test_if_error() {
        assert!(Flow::if_error::<RestError>(None).is_none());
        let flow = Flow::if_error(Some(RestError::internal("boom")));
        assert!(matches!(flow, Some(Flow::Fail(RestError::InternalError { .. }))));
    }

    #[test]
    fn test_from_result() {
        assert!(matches!(Flow::from(Ok::<(), RestError>(())), Flow::Next));
        assert!(matches!(Flow::from(Err(RestError::not_found("/x"))), Flow::Fail(_)));
    }
}
