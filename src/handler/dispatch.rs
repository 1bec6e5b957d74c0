use super::{EchoHandler, RequestHandler};
use crate::config::{HandlerOptions, Mode, UnknownMode};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while selecting a handler for a mode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),
    #[error("mode {0} is not implemented")]
    NotImplemented(Mode),
}

/// Builds the handler for an already-parsed mode
pub fn build_handler(
    mode: Mode,
    options: &HandlerOptions,
) -> Result<Arc<dyn RequestHandler>, DispatchError> {
    match mode {
        Mode::Dummy => Ok(Arc::new(EchoHandler::new(options))),
        Mode::Static | Mode::OpenApi => Err(DispatchError::NotImplemented(mode)),
    }
}

/// Builds the handler for a mode given by name
pub fn dispatch(
    mode: &str,
    options: &HandlerOptions,
) -> Result<Arc<dyn RequestHandler>, DispatchError> {
    build_handler(mode.parse()?, options)
}
