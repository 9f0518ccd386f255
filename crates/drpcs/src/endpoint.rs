use drpc_common::{Args, MutationResult};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A live stream opened for one subscription.
///
/// Both methods return wire-ready JSON. `last_change` is `None` when the
/// stream did not change during the most recent computation step.
pub trait StreamHandle: Send + Sync {
    /// Full current value.
    fn snapshot(&self) -> anyhow::Result<Value>;
    /// Change produced by the most recent step, if any.
    fn last_change(&self) -> anyhow::Result<Option<Value>>;
}

type StreamFn<C> = Box<
    dyn Fn(Args, Arc<C>) -> BoxFuture<'static, anyhow::Result<Box<dyn StreamHandle>>>
        + Send
        + Sync,
>;
type MutationFn<C> =
    Box<dyn Fn(Args, Arc<C>) -> BoxFuture<'static, anyhow::Result<MutationResult>> + Send + Sync>;

/// Name-keyed lookup table of stream and mutation endpoints.
///
/// Built once at server setup; lookups of unregistered names return `None`.
///
/// ```
/// use drpcs::endpoint::Endpoints;
/// use drpc_common::MutationResult;
/// use serde_json::json;
///
/// let endpoints: Endpoints<()> = Endpoints::new()
///     .mutation("ping", |_args, _ctx| async { Ok(MutationResult::Success(json!("pong"))) });
/// assert!(endpoints.has_mutation("ping"));
/// ```
pub struct Endpoints<C> {
    streams: HashMap<String, StreamFn<C>>,
    mutations: HashMap<String, MutationFn<C>>,
}

impl<C> Default for Endpoints<C> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            mutations: HashMap::new(),
        }
    }
}

impl<C: Send + Sync + 'static> Endpoints<C> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream endpoint, replacing any previous one of that name.
    #[must_use]
    pub fn stream<F, Fut, H>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Args, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<H>> + Send + 'static,
        H: StreamHandle + 'static,
    {
        let handler: StreamFn<C> = Box::new(move |args, ctx| {
            let fut = handler(args, ctx);
            Box::pin(async move {
                let handle = fut.await?;
                Ok(Box::new(handle) as Box<dyn StreamHandle>)
            }) as BoxFuture<'static, _>
        });
        self.streams.insert(name.into(), handler);
        self
    }

    /// Registers a mutation endpoint, replacing any previous one of that name.
    ///
    /// Business failures must be returned as [`MutationResult::Error`]; an
    /// `Err` is treated as an endpoint failure and closes the connection.
    #[must_use]
    pub fn mutation<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Args, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<MutationResult>> + Send + 'static,
    {
        let handler: MutationFn<C> =
            Box::new(move |args, ctx| Box::pin(handler(args, ctx)) as BoxFuture<'static, _>);
        self.mutations.insert(name.into(), handler);
        self
    }

    /// Whether a stream of this name is registered.
    #[must_use]
    pub fn has_stream(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    /// Whether a mutation of this name is registered.
    #[must_use]
    pub fn has_mutation(&self, name: &str) -> bool {
        self.mutations.contains_key(name)
    }

    pub(crate) fn open_stream(
        &self,
        name: &str,
        args: Args,
        ctx: Arc<C>,
    ) -> Option<BoxFuture<'static, anyhow::Result<Box<dyn StreamHandle>>>> {
        self.streams.get(name).map(|handler| handler(args, ctx))
    }

    pub(crate) fn call_mutation(
        &self,
        name: &str,
        args: Args,
        ctx: Arc<C>,
    ) -> Option<BoxFuture<'static, anyhow::Result<MutationResult>>> {
        self.mutations.get(name).map(|handler| handler(args, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Value);

    impl StreamHandle for Fixed {
        fn snapshot(&self) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }

        fn last_change(&self) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    fn endpoints() -> Endpoints<u32> {
        Endpoints::new()
            .stream("fixed", |_args, ctx: Arc<u32>| async move { Ok(Fixed(json!(*ctx))) })
            .mutation("echo", |args, _ctx| async move {
                Ok(MutationResult::Success(Value::Object(args)))
            })
    }

    #[tokio::test]
    async fn stream_lookup_passes_context() {
        let table = endpoints();
        let handle = table
            .open_stream("fixed", Args::new(), Arc::new(7))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(handle.snapshot().unwrap(), json!(7));
    }

    #[tokio::test]
    async fn mutation_lookup_passes_args() {
        let table = endpoints();
        let mut args = Args::new();
        args.insert("title".into(), json!("x"));
        let outcome = table
            .call_mutation("echo", args, Arc::new(0))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(outcome, MutationResult::Success(json!({"title": "x"})));
    }

    #[test]
    fn unknown_names_miss() {
        let table = endpoints();
        assert!(table.open_stream("nope", Args::new(), Arc::new(0)).is_none());
        assert!(table.call_mutation("fixed", Args::new(), Arc::new(0)).is_none());
        assert!(table.has_stream("fixed"));
        assert!(!table.has_mutation("fixed"));
    }
}
