mod support;

use assess_core::model::{
    ConceptId, FocusContext, KnowledgeAreaId, RemoteStatus, SummarySource, Version,
};
use services::{
    ApiError, ControlOutcome, EndReason, FetchOutcome, FocusedVariantResolver, LaunchOptions,
    SessionError, SessionStatus, StartRequest, SubmitOutcome,
};

use support::{
    ScriptedRemote, active, answer, completed, controller, descriptor, end_outcome, letter,
    paused, question, start_with_question,
};

fn default_start() -> StartRequest {
    StartRequest::Default(Default::default())
}

#[tokio::test]
async fn pause_and_resume_alternate_and_fetch_waits_while_paused() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(active(1)));
    remote.push_pause(Ok(paused(true, 2)));
    remote.push_resume(Ok(paused(false, 3)));
    remote.push_pause(Ok(paused(true, 4)));

    controller.start(default_start()).await.unwrap();
    assert_eq!(controller.status(), SessionStatus::Active);

    assert_eq!(controller.pause().await.unwrap(), ControlOutcome::Applied);
    assert_eq!(controller.status(), SessionStatus::Paused);
    assert_eq!(controller.fetch_next().await.unwrap(), FetchOutcome::Skipped);
    assert_eq!(controller.pause().await.unwrap(), ControlOutcome::Skipped);

    assert_eq!(controller.resume().await.unwrap(), ControlOutcome::Applied);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(controller.resume().await.unwrap(), ControlOutcome::Skipped);

    assert_eq!(controller.pause().await.unwrap(), ControlOutcome::Applied);
    assert_eq!(controller.status(), SessionStatus::Paused);

    let calls = remote.calls();
    assert_eq!((calls.pause, calls.resume, calls.next_question), (2, 1, 0));
    let session = controller.snapshot().session.unwrap();
    assert_eq!(session.version(), Version::new(4));
}

#[tokio::test]
async fn start_reporting_paused_lands_in_paused_and_pause_is_a_no_op() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(descriptor(RemoteStatus::Paused, 1, 4, 3)));

    controller.start(default_start()).await.unwrap();

    assert_eq!(controller.status(), SessionStatus::Paused);
    assert_eq!(controller.pause().await.unwrap(), ControlOutcome::Skipped);
    assert_eq!(remote.calls().pause, 0);
    let session = controller.snapshot().session.unwrap();
    assert!(session.is_resumed());
    assert_eq!(session.version(), Version::new(1));
}

#[tokio::test]
async fn concurrent_ends_collapse_into_one_remote_call() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(active(1)));
    controller.start(default_start()).await.unwrap();

    let gate = remote.gate_end();
    let mut snapshots = controller.subscribe();
    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.end().await }
    });
    snapshots
        .wait_for(|snap| snap.status.is_ending())
        .await
        .unwrap();

    assert!(controller.end().await.unwrap().is_none());
    gate.send(Ok(end_outcome(0, 0, 2))).unwrap();

    let summary = first.await.unwrap().unwrap().unwrap();
    assert_eq!(summary.total_questions(), 0);
    assert_eq!(controller.status(), SessionStatus::Ended);
    assert!(controller.end().await.unwrap().is_none());
    assert_eq!(remote.calls().end, 1);
}

#[tokio::test]
async fn out_of_order_responses_leave_the_last_applied_version() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    start_with_question(&remote, &controller).await;
    controller.select_answer(letter('B')).unwrap();

    let submit_gate = remote.gate_submit();
    let refresh_gate = remote.gate_get_session();

    let submit = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_answer().await }
    });
    let refresh = tokio::spawn({
        let controller = controller.clone();
        async move { controller.refresh().await }
    });
    tokio::task::yield_now().await;

    // The newer response lands first.
    refresh_gate
        .send(Ok(descriptor(RemoteStatus::Active, 5, 1, 0)))
        .unwrap();
    refresh.await.unwrap().unwrap();
    assert_eq!(
        controller.snapshot().session.unwrap().version(),
        Version::new(5)
    );

    submit_gate.send(Ok(answer(1, 0, 4))).unwrap();
    submit.await.unwrap().unwrap();
    assert_eq!(
        controller.snapshot().session.unwrap().version(),
        Version::new(4)
    );
}

#[tokio::test]
async fn second_submit_while_in_flight_is_skipped() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    start_with_question(&remote, &controller).await;
    controller.select_answer(letter('A')).unwrap();

    let gate = remote.gate_submit();
    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_answer().await }
    });
    tokio::task::yield_now().await;

    assert_eq!(
        controller.submit_answer().await.unwrap(),
        SubmitOutcome::Skipped
    );
    gate.send(Ok(answer(1, 1, 2))).unwrap();
    assert!(matches!(
        first.await.unwrap().unwrap(),
        SubmitOutcome::Feedback(_)
    ));
    assert_eq!(remote.calls().submit_answer, 1);
}

#[tokio::test]
async fn auto_completion_adopts_the_server_summary() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    start_with_question(&remote, &controller).await;
    controller.select_answer(letter('A')).unwrap();
    // Stats disagree with the summary; the summary wins.
    let mut response = completed(10, 9, 12);
    response.stats.total_answered = 3;
    remote.push_submit(Ok(response));

    let outcome = controller.submit_answer().await.unwrap();

    let SubmitOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.total_questions(), 10);
    assert_eq!(summary.correct_answers(), 9);
    let snap = controller.snapshot();
    assert_eq!(snap.status, SessionStatus::Ended);
    assert_eq!(snap.end_reason, Some(EndReason::AutoCompleted));
    let session = snap.session.unwrap();
    assert_eq!((session.total_answered(), session.correct_count()), (10, 9));
    assert_eq!(remote.calls().next_question, 1);
    assert_eq!(remote.calls().end, 0);
}

#[tokio::test]
async fn feedback_then_proceed_fetches_the_next_question() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    start_with_question(&remote, &controller).await;

    assert!(matches!(
        controller.submit_answer().await,
        Err(SessionError::NoSelection)
    ));
    controller.select_answer(letter('C')).unwrap();
    remote.push_submit(Ok(answer(1, 0, 2)));
    let SubmitOutcome::Feedback(result) = controller.submit_answer().await.unwrap() else {
        panic!("expected feedback");
    };
    assert_eq!(result.correct_answer, letter('A'));

    // Feedback blocks the next fetch until the learner proceeds.
    assert_eq!(controller.fetch_next().await.unwrap(), FetchOutcome::Skipped);

    remote.push_next_question(Ok(question("q-2")));
    let FetchOutcome::Loaded(next) = controller.proceed_to_next().await.unwrap() else {
        panic!("expected a question");
    };
    assert_eq!(next.id().as_str(), "q-2");
    let snap = controller.snapshot();
    assert!(snap.flow.feedback().is_none());
    assert!(snap.flow.selected().is_none());
    assert!(matches!(
        controller.proceed_to_next().await,
        Err(SessionError::NoFeedback)
    ));
}

#[tokio::test]
async fn submit_failure_keeps_the_session_and_retry_uses_a_fresh_token() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    start_with_question(&remote, &controller).await;
    controller.select_answer(letter('A')).unwrap();

    remote.push_submit(Err(ApiError::Network {
        message: "reset".into(),
    }));
    let err = controller.submit_answer().await.unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(controller.snapshot().flow.selected(), Some(letter('A')));

    remote.push_submit(Ok(answer(1, 1, 2)));
    assert!(matches!(
        controller.submit_answer().await.unwrap(),
        SubmitOutcome::Feedback(_)
    ));
}

#[tokio::test]
async fn exhaustion_on_the_first_fetch_ends_with_zero_totals() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(active(1)));
    remote.push_next_question(Err(ApiError::NoEligibleQuestions));
    remote.push_get_session(Ok(active(1)));
    remote.push_end(Ok(end_outcome(0, 0, 2)));

    controller.start(default_start()).await.unwrap();
    let outcome = controller.fetch_next().await.unwrap();

    let FetchOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!((summary.total_questions(), summary.correct_answers()), (0, 0));
    assert!(summary.accuracy().abs() < f64::EPSILON);
    let snap = controller.snapshot();
    assert_eq!(snap.status, SessionStatus::Ended);
    assert_eq!(snap.end_reason, Some(EndReason::Exhausted));
    assert!(snap.last_error.is_none());
}

#[tokio::test]
async fn exhaustion_refreshes_the_version_and_keeps_totals_when_end_fails() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(descriptor(RemoteStatus::Active, 3, 7, 5)));
    remote.push_next_question(Err(ApiError::NoEligibleQuestions));
    remote.push_get_session(Ok(descriptor(RemoteStatus::Active, 8, 7, 5)));
    remote.push_end(Err(ApiError::Server {
        status: 503,
        message: "unavailable".into(),
    }));

    controller.start(default_start()).await.unwrap();
    let FetchOutcome::Completed(summary) = controller.fetch_next().await.unwrap() else {
        panic!("expected completion");
    };

    assert_eq!(remote.end_versions(), vec![Version::new(8)]);
    assert_eq!((summary.total_questions(), summary.correct_answers()), (7, 5));
    assert_eq!(summary.source(), SummarySource::LocalFallback);
    assert_eq!(controller.status(), SessionStatus::Ended);
}

#[tokio::test]
async fn exhaustion_keeps_submitted_totals_when_the_refresh_omits_counters() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(descriptor(RemoteStatus::Active, 3, 7, 5)));
    remote.push_next_question(Err(ApiError::NoEligibleQuestions));
    // Server view carrying only the version.
    remote.push_get_session(Ok(active(8)));
    remote.push_end(Err(ApiError::Network {
        message: "connection reset".into(),
    }));

    controller.start(default_start()).await.unwrap();
    let FetchOutcome::Completed(summary) = controller.fetch_next().await.unwrap() else {
        panic!("expected completion");
    };

    assert_eq!(remote.end_versions(), vec![Version::new(8)]);
    assert_eq!((summary.total_questions(), summary.correct_answers()), (7, 5));
    assert_eq!(summary.source(), SummarySource::LocalFallback);
    let session = controller.snapshot().session.unwrap();
    assert_eq!((session.total_answered(), session.correct_count()), (7, 5));
}

#[tokio::test]
async fn exhaustion_with_failed_refresh_ends_locally_without_calling_end() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(descriptor(RemoteStatus::Active, 2, 7, 5)));
    remote.push_next_question(Err(ApiError::NoEligibleQuestions));
    remote.push_get_session(Err(ApiError::Network {
        message: "offline".into(),
    }));

    controller.start(default_start()).await.unwrap();
    let FetchOutcome::Completed(summary) = controller.fetch_next().await.unwrap() else {
        panic!("expected completion");
    };

    assert_eq!(remote.calls().end, 0);
    assert_eq!((summary.total_questions(), summary.correct_answers()), (7, 5));
    assert_eq!(summary.source(), SummarySource::LocalFallback);
}

#[tokio::test]
async fn explicit_end_conflict_reverts_and_refresh_resyncs_the_version() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(active(1)));
    remote.push_end(Err(ApiError::Conflict {
        message: "version mismatch".into(),
    }));
    remote.push_get_session(Ok(descriptor(RemoteStatus::Active, 3, 2, 1)));
    remote.push_end(Ok(end_outcome(2, 1, 4)));

    controller.start(default_start()).await.unwrap();
    let err = controller.end().await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(controller.status(), SessionStatus::Active);

    let err = controller.end_with_version(Version::new(3)).await.unwrap_err();
    assert!(matches!(err, SessionError::VersionConflict { .. }));
    assert_eq!(remote.calls().end, 1);

    controller.refresh().await.unwrap();
    let summary = controller
        .end_with_version(Version::new(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.correct_answers(), 1);
    assert_eq!(summary.source(), SummarySource::Server);
    assert_eq!(remote.end_versions(), vec![Version::new(1), Version::new(3)]);
}

#[tokio::test]
async fn start_failure_moves_to_error_and_retry_reuses_the_request() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Err(ApiError::Network {
        message: "connection refused".into(),
    }));
    remote.push_start(Ok(active(1)));

    let request = StartRequest::focused_area(KnowledgeAreaId::new("ka-9"));
    assert!(controller.start(request.clone()).await.is_err());
    assert_eq!(controller.status(), SessionStatus::Error);
    assert!(controller.snapshot().last_error.is_some());

    controller.retry_start().await.unwrap();
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(remote.start_requests(), vec![request.clone(), request]);
}

#[tokio::test]
async fn reset_discards_a_response_still_in_flight() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    remote.push_start(Ok(active(1)));
    controller.start(default_start()).await.unwrap();

    let gate = remote.gate_next_question();
    let fetch = tokio::spawn({
        let controller = controller.clone();
        async move { controller.fetch_next().await }
    });
    tokio::task::yield_now().await;

    controller.reset();
    gate.send(Ok(question("q-late"))).unwrap();

    assert_eq!(fetch.await.unwrap().unwrap(), FetchOutcome::Stale);
    let snap = controller.snapshot();
    assert_eq!(snap.status, SessionStatus::Idle);
    assert!(snap.session.is_none());
    assert!(snap.flow.question().is_none());
}

#[tokio::test]
async fn focused_launch_with_skip_auto_start_issues_exactly_one_start() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    let resolver = FocusedVariantResolver::new(controller.clone());
    let mut focused = descriptor(RemoteStatus::Active, 1, 0, 0);
    focused.focus = Some(FocusContext::KnowledgeArea(KnowledgeAreaId::new("ka-7")));
    remote.push_start(Ok(focused));

    let options = LaunchOptions {
        skip_auto_start: true,
        focus: Some(FocusContext::KnowledgeArea(KnowledgeAreaId::new("ka-7"))),
    };
    let (launched, mounted, defaulted) = tokio::join!(
        resolver.launch(&options),
        controller.mount(&options),
        controller.auto_start(),
    );

    assert_eq!(launched.unwrap(), ControlOutcome::Applied);
    assert_eq!(mounted.unwrap(), ControlOutcome::Skipped);
    assert_eq!(defaulted.unwrap(), ControlOutcome::Skipped);
    assert_eq!(remote.calls().start, 1);
    assert!(remote.start_requests()[0].is_focused());
    assert_eq!(
        resolver.focus(),
        Some(FocusContext::KnowledgeArea(KnowledgeAreaId::new("ka-7")))
    );
}

#[tokio::test]
async fn empty_concept_focus_is_rejected_without_a_request() {
    let remote = ScriptedRemote::new();
    let resolver = FocusedVariantResolver::new(controller(&remote));

    let err = resolver
        .start_focused_by_concepts(Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidFocus(_)));
    assert_eq!(remote.calls().start, 0);

    remote.push_start(Ok(active(1)));
    resolver
        .start_focused_by_concepts(vec![ConceptId::new("c-1"), ConceptId::new("c-2")])
        .await
        .unwrap();
    assert_eq!(
        remote.start_requests(),
        vec![StartRequest::focused_concepts(vec![
            ConceptId::new("c-1"),
            ConceptId::new("c-2")
        ])]
    );
}

#[tokio::test]
async fn snapshots_are_published_on_every_transition() {
    let remote = ScriptedRemote::new();
    let controller = controller(&remote);
    let mut snapshots = controller.subscribe();
    remote.push_start(Ok(active(1)));

    controller.start(default_start()).await.unwrap();

    assert!(snapshots.has_changed().unwrap());
    let snap = snapshots.borrow_and_update().clone();
    assert_eq!(snap.status, SessionStatus::Active);
    assert!(snap.revision > 0);
    assert!(!snapshots.has_changed().unwrap());
}
