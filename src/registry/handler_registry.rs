//! # Job Handler Registry
//!
//! Resolves a job's `class` and `operation` to a handler method.
//!
//! `class` is classified into a handler type name by splitting on `_`/`-`
//! and capitalizing each segment (`book_publisher` -> `BookPublisher`).
//! `operation` becomes a method name by replacing `-` with `_`
//! (`create-pdf` -> `create_pdf`). Constructors are registered at startup
//! keyed by type name; anything unregistered is a [`DispatchError`].

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, Instrument, Span};

use crate::config::HandlerConfig;
use crate::execution::CommandOutcome;
use crate::handlers;
use crate::models::Job;

/// Reasons a job never reached (or never returned from) its handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No handler registered for class '{class}' (type {type_name})")]
    UnknownClass { class: String, type_name: String },

    #[error("Handler {type_name} has no operation '{operation}'")]
    UnknownOperation { type_name: String, operation: String },

    #[error("Malformed job payload: {0}")]
    MalformedPayload(String),

    #[error("Handler setup failed: {0}")]
    HandlerSetup(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

impl DispatchError {
    pub fn unknown_operation(type_name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnknownOperation {
            type_name: type_name.into(),
            operation: operation.into(),
        }
    }

    pub fn handler_setup(message: impl Into<String>) -> Self {
        Self::HandlerSetup(message.into())
    }
}

/// Key for handler lookup in the registry: the classified type name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey(String);

impl HandlerKey {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self(type_name.into())
    }

    /// Key for a job's `class`
    pub fn from_class(class: &str) -> Self {
        Self(classify(class))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `book_publisher` -> `BookPublisher`
pub fn classify(class: &str) -> String {
    class
        .split(['_', '-'])
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `create-pdf` -> `create_pdf`
pub fn method_name(operation: &str) -> String {
    operation.replace('-', "_")
}

/// What a handler gets besides the job
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub config: Arc<HandlerConfig>,
    /// Span carrying the job's identifying fields
    pub span: Span,
}

impl HandlerContext {
    pub fn new(config: Arc<HandlerConfig>, span: Span) -> Self {
        Self { config, span }
    }
}

/// A handler family constructed per job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Registered type name
    fn class_name(&self) -> &'static str;

    /// Method names this handler answers to
    fn operations(&self) -> &'static [&'static str];

    /// Run one method
    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError>;
}

pub type HandlerConstructor = fn(Job, HandlerContext) -> Box<dyn JobHandler>;

pub struct HandlerRegistry {
    constructors: HashMap<HandlerKey, HandlerConstructor>,
    config: Arc<HandlerConfig>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.constructors.len())
            .field("handler_types", &self.registered_types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            constructors: HashMap::new(),
            config: Arc::new(config),
        }
    }

    /// Registry with every built-in handler family
    pub fn with_builtin_handlers(config: HandlerConfig) -> Self {
        let mut registry = Self::new(config);
        handlers::register_builtin(&mut registry);
        info!(
            handler_types = ?registry.registered_types(),
            "📚 REGISTRY: Built-in handlers registered"
        );
        registry
    }

    pub fn register(&mut self, type_name: &str, constructor: HandlerConstructor) {
        debug!(type_name, "Registering handler");
        self.constructors.insert(HandlerKey::new(type_name), constructor);
    }

    pub fn is_registered(&self, class: &str) -> bool {
        self.constructors.contains_key(&HandlerKey::from_class(class))
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().map(|k| k.0.clone()).collect();
        names.sort();
        names
    }

    /// Construct the handler for `job` and resolve its method name
    pub fn resolve(
        &self,
        job: &Job,
        span: Span,
    ) -> Result<(Box<dyn JobHandler>, String), DispatchError> {
        let key = HandlerKey::from_class(&job.class);
        let constructor = self
            .constructors
            .get(&key)
            .ok_or_else(|| DispatchError::UnknownClass {
                class: job.class.clone(),
                type_name: key.to_string(),
            })?;

        let handler = constructor(job.clone(), HandlerContext::new(self.config.clone(), span));
        let method = method_name(&job.operation);
        if !handler.operations().contains(&method.as_str()) {
            return Err(DispatchError::unknown_operation(key.as_str(), method));
        }
        Ok((handler, method))
    }

    /// Resolve and run the job's handler. Panics inside the handler are
    /// caught and reported as [`DispatchError::HandlerPanicked`].
    pub async fn dispatch(&self, job: &Job) -> Result<CommandOutcome, DispatchError> {
        let span = tracing::info_span!(
            "job",
            job_id = ?job.job_id,
            class = %job.class,
            operation = %job.operation,
        );
        let (handler, method) = self.resolve(job, span.clone())?;

        AssertUnwindSafe(handler.call(&method))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|panic| Err(DispatchError::HandlerPanicked(panic_message(&panic))))
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
