use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strand::{
    App, CancelReason, Context, Error, Factory, LegacyRequest, LegacyResponse, Next, events,
};

#[tokio::test]
async fn context_and_fast_handlers_share_state() {
    let app = App::<String>::new()
        .with(|ctx: Context, next: Next<String>| async move {
            ctx.set_method("GET")?;
            next.run().await
        })
        .with(|next: Next<String>| async move {
            assert_eq!(next.context().method().as_deref(), Some("GET"));
            next.context().set_method("PUT")?;
            Ok("ABC".to_owned())
        })
        .build();

    let ctx = Factory::new().create_context();
    let out = ctx.using(|ctx: Context| app.call(ctx)).await.unwrap();
    assert_eq!(out, "ABC");
    assert!(ctx.is_disposed());
    assert_eq!(ctx.method(), None);
}

#[tokio::test]
async fn legacy_handler_that_ends_the_response_stops_the_chain() {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let (a, b) = (Arc::clone(&ran), Arc::clone(&ran));
    let app = App::<()>::new()
        .with(move |req: LegacyRequest, res: LegacyResponse| {
            let a = Arc::clone(&a);
            async move {
                a.lock().push(req.url());
                res.end("done")
            }
        })
        .with(move |_next: Next<()>| {
            b.lock().push("after".to_owned());
            async { Ok(()) }
        })
        .build();

    let ctx = Factory::new().create_context();
    ctx.set_path("/legacy").unwrap();
    app.call(ctx.clone()).await.unwrap();

    assert_eq!(*ran.lock(), vec!["/legacy".to_owned()]);
    assert_eq!(ctx.response().body().text(), "done");
}

#[tokio::test]
async fn disposing_cancels_work_in_flight() {
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let started_tx = Arc::new(Mutex::new(Some(started_tx)));
    let app = App::<Option<CancelReason>>::new()
        .with(move |ctx: Context, _next: Next<Option<CancelReason>>| {
            if let Some(tx) = started_tx.lock().take() {
                let _ = tx.send(());
            }
            async move { Ok(Some(ctx.token().cancelled().await)) }
        })
        .build();

    let ctx = Factory::new().create_context();
    let run = tokio::spawn(app.call(ctx.clone()));
    started_rx.await.unwrap();
    ctx.dispose();

    let reason = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, Some(CancelReason::Disposed));
}

#[tokio::test]
async fn dispose_event_fires_before_fields_are_cleared() {
    let ctx = Factory::new().create_context();
    ctx.set_path("/seen").unwrap();

    let observed = Arc::new(Mutex::new(None));
    let o = Arc::clone(&observed);
    let handle = ctx.clone();
    ctx.events().on(events::DISPOSE, move |_| {
        *o.lock() = Some((handle.path(), handle.token().is_cancelled()));
    })
    .unwrap();

    ctx.dispose();
    assert_eq!(*observed.lock(), Some((Some("/seen".to_owned()), true)));
    assert_eq!(ctx.path(), None);
}

#[tokio::test]
async fn errors_surface_to_the_caller_and_still_dispose() {
    let app = App::<()>::new()
        .with(|_ctx: Context, _next: Next<()>| async move {
            Err::<(), _>(Error::msg("boom"))
        })
        .build();

    let ctx = Factory::new().create_context();
    let err = ctx.using(app.call(ctx.clone())).await.unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(ctx.is_disposed());
    assert!(matches!(app.call(ctx).await, Err(Error::Disposed)));
}

#[tokio::test]
async fn factory_sequence_numbers_never_repeat() {
    let factory = Arc::new(Factory::new());
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let factory = Arc::clone(&factory);
        tasks.spawn(async move {
            (0..100).map(|_| factory.create_context().seq()).collect::<Vec<_>>()
        });
    }

    let mut all = Vec::new();
    while let Some(seqs) = tasks.join_next().await {
        all.extend(seqs.unwrap());
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 800);
}
