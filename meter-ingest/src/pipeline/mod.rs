use std::{pin::Pin, sync::Arc, time::SystemTime};

use energy_client::StoreError;
use futures::{Stream, StreamExt};

use crate::parse::ParseError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    /// 1-based line of the input the payload came from.
    pub line: u64,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, line: u64) -> Self {
        Self {
            payload,
            line,
            received_at: SystemTime::now(),
        }
    }

    pub fn map<U>(self, payload: U) -> Envelope<U> {
        Envelope {
            payload,
            line: self.line,
            received_at: self.received_at,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot open input: {0}")]
    Open(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("line {line}: {error}")]
    Parse { line: u64, error: ParseError },
    #[error("line {line}: {source_name} consumed {consumed_wh} Wh, ceiling allows {allowed_wh:.0} Wh")]
    RateCeiling {
        line: u64,
        source_name: String,
        consumed_wh: i64,
        allowed_wh: f64,
    },
    #[error("line {line}: store error: {error}")]
    Store { line: u64, error: StoreError },
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    type Summary: Send;

    async fn run<S>(&self, input: S) -> Result<Self::Summary, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Source -> one converting stage (`I` to `T`) -> same-type transforms -> sink.
pub struct Pipeline<S, I, T, K> {
    pub source: S,
    pub stage: Arc<dyn Transform<I, T> + Send + Sync>,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>,
    pub sink: K,
}

impl<S, I, T, K> Pipeline<S, I, T, K>
where
    I: Send + 'static,
    T: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<K::Summary, PipelineError> {
        let input = self.source.stream().await;

        let stage = self.stage.clone();
        let mut stream: Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>> =
            Box::pin(input.then(move |item| {
                let stage = stage.clone();
                async move {
                    match item {
                        Ok(env) => stage.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));

        // Apply transforms in sequence (if any).
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}
