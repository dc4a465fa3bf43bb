//! Typed pipeline builder.
//!
//! [`Pipeline`] carries its current payload type as a phantom parameter:
//! every [`Pipeline::then`] / [`Pipeline::then_batch`] produces a builder
//! whose parameter equals the declared output of the stage just added, so a
//! chain whose handler input disagrees with the previous stage's output
//! does not compile. Internally handlers are erased to closures over
//! `Box<dyn Any + Send>` payloads; the typed wrappers written here are the
//! only place a downcast happens.
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;

use crate::runtime::envelope::{
    Envelope, ErasedBatch, ErasedPayload, ErasedSingle, ErasedSink, ErasedSource, HandlerFuture,
    SourcePump,
};
use crate::runtime;
use crate::{BatchPolicy, Context, Error, Outcome};

/// Per-stage tuning accepted by [`Pipeline::then_with`] and
/// [`Pipeline::then_batch_with`].
///
/// ```
/// use ductwork::StageOptions;
///
/// let options = StageOptions::named("normalize").buffer(64).concurrency(4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    name: Option<String>,
    buffer: Option<usize>,
    concurrency: usize,
}

impl StageOptions {
    /// Labels the stage; the name shows up in panic causes and log events.
    /// Unnamed stages default to `stage-<index>`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Overrides the pipeline's default buffer capacity for the channel
    /// between this stage and the next. Zero forces a rendezvous.
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = Some(capacity);
        self
    }

    /// Number of workers for this stage, clamped to at least 1. With more
    /// than one worker, output order across items is not guaranteed.
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }
}

pub(crate) enum StageKind {
    Single {
        handler: ErasedSingle,
    },
    Batch {
        handler: ErasedBatch,
        policy: BatchPolicy,
    },
}

pub(crate) struct StageDef {
    pub kind: StageKind,
    pub name: String,
    pub buffer: Option<usize>,
    pub concurrency: usize,
}

/// Immutable pipeline definition shared by builder and runtime.
pub(crate) struct Definition {
    pub name: Arc<str>,
    pub default_buffer: usize,
    pub source: ErasedSource,
    pub stages: Vec<StageDef>,
    pub invalid: Option<Error>,
}

/// Builder for a staged dataflow pipeline whose current payload type is
/// `T`. Obtain one with [`Pipeline::new`], chain stages with
/// [`Pipeline::then`] / [`Pipeline::then_batch`], and finish with
/// [`Pipeline::to`].
///
/// ```
/// use ductwork::{CancellationToken, Context, Error, Pipeline};
///
/// # tokio_test::block_on(async {
/// let runnable = Pipeline::new("lengths", |_cx: Context| async move {
///     let (tx, rx) = flume::bounded(2);
///     tx.send("ab".to_string()).ok();
///     tx.send("cdef".to_string()).ok();
///     Ok(rx)
/// })
/// .then(|_cx, word: String| async move { Ok(word.len()) })
/// .to(|_cx, _len: usize| async move { Ok(()) });
///
/// let outcome = runnable.run(CancellationToken::new()).await;
/// assert!(outcome.into_result().is_ok());
/// # });
/// ```
pub struct Pipeline<T> {
    def: Definition,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Creates a builder from a pipeline name and a source function.
    ///
    /// The source is invoked once per [`Runnable::run`] with a [`Context`]
    /// scoped to the source: its cancellation fires when the run's root
    /// handle is cancelled or a failure is latched, letting a still-open
    /// source stop producing promptly. The returned channel belongs to the
    /// caller; close it by dropping the sender once the source is
    /// exhausted.
    pub fn new<F, Fut>(name: impl Into<String>, source: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<flume::Receiver<T>, Error>> + Send + 'static,
    {
        let erased: ErasedSource = Arc::new(
            move |cx: Context,
                  root: CancellationToken,
                  out: flume::Sender<Envelope>|
                  -> BoxFuture<'static, Result<SourcePump, Error>> {
                let open = source(cx.clone());
                Box::pin(async move {
                    let channel = open.await?;
                    let pump: SourcePump = Box::pin(runtime::source::pump(root, cx, channel, out));
                    Ok(pump)
                })
            },
        );

        Self {
            def: Definition {
                name: Arc::from(name.into()),
                default_buffer: 0,
                source: erased,
                stages: Vec::new(),
                invalid: None,
            },
            _payload: PhantomData,
        }
    }

    /// Default capacity of the buffers between stages. Zero (the default)
    /// makes every unoverridden channel a rendezvous.
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.def.default_buffer = capacity;
        self
    }

    /// Appends a single-item stage with default options.
    ///
    /// The handler receives each payload of the current type and produces
    /// at most one output: returning an error suppresses emission and
    /// latches the failure.
    pub fn then<Out, F, Fut>(self, handler: F) -> Pipeline<Out>
    where
        Out: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Error>> + Send + 'static,
    {
        self.then_with(StageOptions::default(), handler)
    }

    /// Appends a single-item stage with explicit [`StageOptions`].
    ///
    /// With a concurrency above 1 the stage processes items in parallel and
    /// output order across items is not guaranteed; concurrency 1 (the
    /// default) preserves input order.
    pub fn then_with<Out, F, Fut>(mut self, options: StageOptions, handler: F) -> Pipeline<Out>
    where
        Out: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Error>> + Send + 'static,
    {
        let erased: ErasedSingle = Arc::new(
            move |cx: Context, payload: ErasedPayload| -> HandlerFuture<ErasedPayload> {
                match payload.downcast::<T>() {
                    Ok(input) => {
                        let transformed = handler(cx, *input);
                        Box::pin(async move {
                            transformed
                                .await
                                .map(|output| Box::new(output) as ErasedPayload)
                        })
                    }
                    Err(_) => Box::pin(future::ready(Err(type_mismatch::<T>()))),
                }
            },
        );

        self.push_stage(options, StageKind::Single { handler: erased });
        Pipeline {
            def: self.def,
            _payload: PhantomData,
        }
    }

    /// Appends a batch stage with default options.
    ///
    /// The handler receives groups of payloads assembled per `policy` and
    /// may return fewer, equal, or more outputs than it was given,
    /// including none. A `policy.size` of zero is rejected: the error is
    /// recorded in the definition and surfaced by [`Runnable::run`].
    pub fn then_batch<Out, F, Fut>(self, handler: F, policy: BatchPolicy) -> Pipeline<Out>
    where
        Out: Send + 'static,
        F: Fn(Context, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Out>, Error>> + Send + 'static,
    {
        self.then_batch_with(StageOptions::default(), handler, policy)
    }

    /// Appends a batch stage with explicit [`StageOptions`]. Batch stages
    /// run a single accumulator regardless of the configured concurrency.
    pub fn then_batch_with<Out, F, Fut>(
        mut self,
        options: StageOptions,
        handler: F,
        policy: BatchPolicy,
    ) -> Pipeline<Out>
    where
        Out: Send + 'static,
        F: Fn(Context, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Out>, Error>> + Send + 'static,
    {
        if policy.size == 0 && self.def.invalid.is_none() {
            self.def.invalid = Some(Error::InvalidConfig(
                "batch size must be at least 1".into(),
            ));
        }

        let erased: ErasedBatch = Arc::new(
            move |cx: Context, payloads: Vec<ErasedPayload>| -> HandlerFuture<Vec<ErasedPayload>> {
                let mut inputs = Vec::with_capacity(payloads.len());
                for payload in payloads {
                    match payload.downcast::<T>() {
                        Ok(input) => inputs.push(*input),
                        Err(_) => return Box::pin(future::ready(Err(type_mismatch::<T>()))),
                    }
                }
                let transformed = handler(cx, inputs);
                Box::pin(async move {
                    transformed.await.map(|outputs| {
                        outputs
                            .into_iter()
                            .map(|output| Box::new(output) as ErasedPayload)
                            .collect()
                    })
                })
            },
        );

        self.push_stage(options, StageKind::Batch {
            handler: erased,
            policy,
        });
        Pipeline {
            def: self.def,
            _payload: PhantomData,
        }
    }

    /// Attaches the terminal sink and returns the [`Runnable`] pipeline.
    ///
    /// A sink error latches the failure; the remaining items are drained
    /// without further invocations.
    pub fn to<F, Fut>(self, sink: F) -> Runnable
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let erased: ErasedSink = Arc::new(
            move |cx: Context, payload: ErasedPayload| -> HandlerFuture<()> {
                match payload.downcast::<T>() {
                    Ok(input) => Box::pin(sink(cx, *input)),
                    Err(_) => Box::pin(future::ready(Err(type_mismatch::<T>()))),
                }
            },
        );

        Runnable {
            def: self.def,
            sink: erased,
        }
    }

    fn push_stage(&mut self, options: StageOptions, kind: StageKind) {
        let index = self.def.stages.len();
        self.def.stages.push(StageDef {
            kind,
            name: options.name.unwrap_or_else(|| format!("stage-{index}")),
            buffer: options.buffer,
            concurrency: options.concurrency.max(1),
        });
    }
}

fn type_mismatch<T>() -> Error {
    Error::Processing(format!(
        "unexpected payload type for stage input: expected {}",
        std::any::type_name::<T>()
    ))
}

/// A fully-built pipeline. Reusable: each [`Runnable::run`] invokes the
/// source function anew and owns its own channels, workers, and failure
/// latch.
pub struct Runnable {
    def: Definition,
    sink: ErasedSink,
}

impl Runnable {
    /// Executes the pipeline until the source is exhausted and every stage
    /// has drained, a failure collapses it, or `root` is cancelled.
    ///
    /// Returns within bounded time after `root` fires: workers drain their
    /// inbound channels without invoking user callbacks, the batch stage
    /// makes one best-effort flush, and every spawned task is joined before
    /// this returns. Root cancellation wins over a latched failure when the
    /// outcome is classified.
    pub async fn run(&self, root: CancellationToken) -> Outcome {
        runtime::execute(&self.def, &self.sink, root).await
    }
}
