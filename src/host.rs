//! Hosting framework collaborator.
//!
//! The engine needs three key/value scopes (application, request, response),
//! a way to send a body, and a way to forward an error to the framework's
//! centralized error handler. [`BufferedHost`] captures both in memory.

use serde_json::{Map, Value};

use crate::ViewError;

/// A `locals`-style key/value scope.
pub type Locals = Map<String, Value>;

/// The three hosting scopes, least specific first.
#[derive(Debug, Clone, Copy)]
pub struct Scopes<'a> {
    pub app: &'a Locals,
    pub request: &'a Locals,
    pub response: &'a Locals,
}

/// The response side of the hosting framework, as seen by the engine.
pub trait ViewHost: Send {
    fn app_locals(&self) -> &Locals;
    fn request_locals(&self) -> &Locals;
    fn response_locals(&self) -> &Locals;

    /// Send `body` as the response.
    fn send(&mut self, body: String);

    /// Hand `err` to the centralized error handler for this request.
    fn forward_error(&mut self, err: ViewError);

    fn scopes(&self) -> Scopes<'_> {
        Scopes {
            app: self.app_locals(),
            request: self.request_locals(),
            response: self.response_locals(),
        }
    }
}

/// In-memory host capturing the outcome of one render.
#[derive(Debug, Default)]
pub struct BufferedHost {
    pub app: Locals,
    pub request: Locals,
    pub response: Locals,
    pub body: Option<String>,
    pub error: Option<ViewError>,
}

impl BufferedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_locals(mut self, locals: Locals) -> Self {
        self.app = locals;
        self
    }

    pub fn with_request_locals(mut self, locals: Locals) -> Self {
        self.request = locals;
        self
    }

    pub fn with_response_locals(mut self, locals: Locals) -> Self {
        self.response = locals;
        self
    }

    /// The sent body, or the forwarded error.
    pub fn into_result(self) -> Result<String, ViewError> {
        match (self.body, self.error) {
            (_, Some(err)) => Err(err),
            (Some(body), None) => Ok(body),
            (None, None) => Ok(String::new()),
        }
    }
}

impl ViewHost for BufferedHost {
    fn app_locals(&self) -> &Locals {
        &self.app
    }

    fn request_locals(&self) -> &Locals {
        &self.request
    }

    fn response_locals(&self) -> &Locals {
        &self.response
    }

    fn send(&mut self, body: String) {
        self.body = Some(body);
    }

    fn forward_error(&mut self, err: ViewError) {
        self.error = Some(err);
    }
}
