//! Handler lookup by job class and operation.

pub mod handler_registry;

pub use handler_registry::{
    classify, method_name, DispatchError, HandlerConstructor, HandlerContext, HandlerKey,
    HandlerRegistry, JobHandler,
};
