use futures_util::future::BoxFuture;

use crate::backend::Backend;
use crate::error::UnitOfWorkError;
use crate::segment::SegmentBuilder;
use crate::session::Session;

/// A boxed handler: query logic expressed against an injected builder,
/// independent of session plumbing. Used by [`execute_many`]; for a single
/// handler, [`execute`] takes any closure directly.
pub type BoxedHandler<B, T> =
    Box<dyn FnOnce(SegmentBuilder<B>) -> BoxFuture<'static, Result<T, UnitOfWorkError>> + Send>;

/// Box an async closure into a [`BoxedHandler`].
pub fn handler<B, T, F, Fut>(f: F) -> BoxedHandler<B, T>
where
    B: Backend,
    F: FnOnce(SegmentBuilder<B>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, UnitOfWorkError>> + Send + 'static,
{
    Box::new(move |builder| Box::pin(f(builder)))
}

/// Run a handler with the session's query builder.
///
/// This is the single place where "run this query-shaped function against
/// this session" is expressed, so call sites read uniformly regardless of
/// backend.
///
/// # Errors
/// Whatever the handler returns.
pub async fn execute<B, T, F, Fut>(
    session: &Session<B>,
    handler: F,
) -> Result<T, UnitOfWorkError>
where
    B: Backend,
    F: FnOnce(SegmentBuilder<B>) -> Fut,
    Fut: Future<Output = Result<T, UnitOfWorkError>>,
{
    handler(session.builder()).await
}

/// Run multiple handlers in order within one session, short-circuiting on
/// the first failure. Failed handlers are not retried.
///
/// # Errors
/// [`UnitOfWorkError::HandlerFailed`] wrapping the failing handler's error
/// and position.
pub async fn execute_many<B, T>(
    session: &Session<B>,
    handlers: impl IntoIterator<Item = BoxedHandler<B, T>>,
) -> Result<Vec<T>, UnitOfWorkError>
where
    B: Backend,
{
    let mut results = Vec::new();
    for (index, handler) in handlers.into_iter().enumerate() {
        let result = handler(session.builder())
            .await
            .map_err(|source| UnitOfWorkError::HandlerFailed {
                index,
                source: Box::new(source),
            })?;
        results.push(result);
    }
    Ok(results)
}
