#![allow(unused_crate_dependencies)]
#![allow(missing_docs)]
mod support;

use ductwork::{BatchPolicy, CancellationToken, Context, Error, Outcome, Pipeline, StageOptions, State};
use support::Collector;

#[tokio::test]
async fn processor_error_fails_the_run_with_the_first_cause() {
    let collected: Collector<String> = Collector::new();

    let runnable = Pipeline::new("err", support::list_source(vec![1, 2, 3]))
        .then(|_cx, n: i32| async move {
            if n >= 2 {
                return Err(Error::Processing(format!("boom: {n}")));
            }
            Ok(n.to_string())
        })
        .to(collected.sink());

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Failed(Error::Processing("boom: 2".into())));
    assert_eq!(
        outcome.into_result(),
        Err(Error::Processing("boom: 2".into()))
    );
}

#[tokio::test]
async fn sink_error_latches_and_the_rest_is_drained() {
    let consumed: Collector<i32> = Collector::new();

    let seen = consumed.clone();
    let runnable = Pipeline::new("sink-err", support::list_source(vec![1, 2, 3]))
        .then(|_cx, n: i32| async move { Ok(n) })
        .to(move |_cx, n: i32| {
            let seen = seen.clone();
            async move {
                if n == 2 {
                    return Err(Error::Sink("rejected 2".into()));
                }
                seen.push(n);
                Ok(())
            }
        });

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Failed(Error::Sink("rejected 2".into())));
    assert_eq!(consumed.snapshot(), vec![1]);
}

#[tokio::test]
async fn panic_in_a_named_stage_becomes_a_failure() {
    let runnable = Pipeline::new("panicky", support::list_source(vec![1]))
        .then_with(StageOptions::named("exploder"), |_cx, n: i32| async move {
            if n == 1 {
                panic!("nope");
            }
            Ok(n)
        })
        .to(|_cx, _n: i32| async move { Ok(()) });

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(outcome.state(), State::Failed);

    let cause = outcome.cause().expect("failed outcome has a cause");
    assert!(matches!(cause, Error::HandlerPanic { stage, .. } if stage == "exploder"));
    assert!(cause.to_string().contains("exploder"));
}

#[tokio::test]
async fn panic_in_the_sink_is_confined() {
    let runnable = Pipeline::new("sink-panic", support::list_source(vec![1]))
        .then(|_cx, n: i32| async move { Ok(n) })
        .to(|_cx, n: i32| async move {
            if n == 1 {
                panic!("sink down");
            }
            Ok(())
        });

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(outcome.state(), State::Failed);
    let cause = outcome.cause().expect("failed outcome has a cause");
    assert!(matches!(cause, Error::HandlerPanic { stage, .. } if stage == "sink"));
}

#[tokio::test]
async fn source_init_failure_fails_the_run() {
    let source = |_cx: Context| async move {
        Err::<flume::Receiver<i32>, _>(Error::Source("warehouse offline".into()))
    };

    let runnable = Pipeline::new("no-source", source)
        .then(|_cx, n: i32| async move { Ok(n) })
        .to(|_cx, _n: i32| async move { Ok(()) });

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Failed(Error::Source("warehouse offline".into())));
}

#[tokio::test]
async fn zero_batch_size_is_rejected_at_run() {
    let runnable = Pipeline::new("bad-policy", support::list_source(vec![1, 2]))
        .then_batch(
            |_cx, batch: Vec<i32>| async move { Ok(batch) },
            BatchPolicy::new(0),
        )
        .to(|_cx, _n: i32| async move { Ok(()) });

    let outcome = runnable.run(CancellationToken::new()).await;
    assert_eq!(
        outcome,
        Outcome::Failed(Error::InvalidConfig("batch size must be at least 1".into()))
    );
}

#[tokio::test]
async fn erroring_items_do_not_emit_but_later_items_flow() {
    let collected: Collector<String> = Collector::new();

    let runnable = Pipeline::new("skip-bad", support::list_source(vec![1, 2, 3]))
        .then(|_cx, n: i32| async move {
            if n == 1 {
                return Err(Error::Processing("first is bad".into()));
            }
            Ok(n.to_string())
        })
        .to(collected.sink());

    let outcome = runnable.run(CancellationToken::new()).await;
    // The first failure is the run's cause even though later items kept
    // flowing through the stage.
    assert_eq!(
        outcome,
        Outcome::Failed(Error::Processing("first is bad".into()))
    );
    assert!(!collected.snapshot().contains(&"1".to_string()));
}
