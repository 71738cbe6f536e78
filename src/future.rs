//! Boxed future aliases used at the async trait seams.
//!
//! Traits such as [`crate::backend::DeploymentOrchestrator`] and
//! [`crate::repository::FleetStore`] are consumed as trait objects, so their
//! methods return pinned, boxed futures instead of `async fn`.

use std::future::Future;
use std::pin::Pin;

/// Fallible future returned by trait-object seams.
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Infallible future, used by callbacks such as status updaters.
pub type UnitFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
