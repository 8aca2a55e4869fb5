//! Downstream call contract

use async_trait::async_trait;
use std::future::Future;

/// The downstream collaborator invoked once per batch
///
/// Implementations receive the payloads in submission order and must return
/// exactly one result per payload, in the same order, or fail the whole call.
#[async_trait]
pub trait BatchHandler<P, R>: Send + Sync
where
    P: Send + 'static,
    R: Send + 'static,
{
    async fn call_batch(&self, payloads: Vec<P>) -> anyhow::Result<Vec<R>>;
}

/// Adapter turning an async closure into a [`BatchHandler`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure `Fn(Vec<P>) -> impl Future<Output = anyhow::Result<Vec<R>>>`
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<F, Fut, P, R> BatchHandler<P, R> for FnHandler<F>
where
    F: Fn(Vec<P>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<R>>> + Send,
    P: Send + 'static,
    R: Send + 'static,
{
    async fn call_batch(&self, payloads: Vec<P>) -> anyhow::Result<Vec<R>> {
        (self.f)(payloads).await
    }
}
