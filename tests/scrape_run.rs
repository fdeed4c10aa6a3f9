//! End-to-end runs of the worker pool against the scripted portal.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rorscrape::browser::fake::{
    PortalCall, PortalScript, RecordPage, ScriptedPortalFactory, SubmitOutcome,
};
use rorscrape::captcha::RecognitionProvider;
use rorscrape::ledger::{EntryStatus, FileLedger, Ledger, MemoryLedger};
use rorscrape::models::LocationTask;
use rorscrape::scheduler::SchedulerError;

use common::{
    resolver, scheduler, scheduler_with, tasks, CountingLedger, FailingLedger, Fixed, ANSWER,
};

#[tokio::test]
async fn second_run_skips_completed_tasks() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("ledger");
    let villages = ["001", "002", "003", "004"];

    // First run: village 002 never gets past the captcha.
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new().with_outcome(
        |sub| {
            if sub.village == "002" {
                SubmitOutcome::WrongCaptcha
            } else {
                SubmitOutcome::Record(RecordPage::sample())
            }
        },
    )));
    let ledger = Arc::new(CountingLedger::new(FileLedger::open(&dir).await.unwrap()));
    let summary = scheduler(&factory, ledger.clone(), 2)
        .run(tasks(&villages), None)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(ledger.total_dispatches(), 4);

    // Second run on a reopened ledger only touches the failed village.
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new()));
    let ledger = Arc::new(CountingLedger::new(FileLedger::open(&dir).await.unwrap()));
    let summary = scheduler(&factory, ledger.clone(), 2)
        .run(tasks(&villages), None)
        .await
        .unwrap();

    assert_eq!(summary.resumed, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(ledger.total_dispatches(), 1);
    for village in ["001", "003", "004"] {
        let id = LocationTask::new("02", "07", village).id();
        assert_eq!(ledger.dispatches(&id), 0, "{}", village);
    }
    let retried = LocationTask::new("02", "07", "002").id();
    let entry = ledger.entry(&retried).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
    assert_eq!(entry.dispatches, 2);
    assert_eq!(factory.opened(), 1);
}

#[tokio::test]
async fn duplicate_tasks_run_once_across_workers() {
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new()));
    let ledger = Arc::new(CountingLedger::new(MemoryLedger::new()));
    let village = factory.portal().selectors.village.clone();

    let mut queued = tasks(&["001", "002", "003"]);
    queued.extend(tasks(&["002", "001", "002"]));
    let summary = scheduler(&factory, ledger.clone(), 3)
        .run(queued, None)
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.duplicates, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(ledger.total_dispatches(), 3);

    let mut per_village: HashMap<String, usize> = HashMap::new();
    for value in factory.log().selected_values(&village) {
        *per_village.entry(value).or_default() += 1;
    }
    assert_eq!(per_village.len(), 3);
    assert!(per_village.values().all(|n| *n == 1), "{:?}", per_village);
}

#[tokio::test]
async fn workers_keep_to_their_own_sessions() {
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new()));
    scheduler(&factory, Arc::new(MemoryLedger::new()), 2)
        .run(tasks(&["001", "002", "003", "004"]), None)
        .await
        .unwrap();

    let calls = factory.log().calls();
    for worker in 0..factory.opened() {
        let navigations = calls
            .iter()
            .filter(|(w, call)| *w == worker && matches!(call, PortalCall::Goto(_)))
            .count();
        assert!(navigations <= 1, "worker {} reloaded its form", worker);
    }
    let closes = calls
        .iter()
        .filter(|(_, call)| matches!(call, PortalCall::Close))
        .count();
    assert_eq!(closes, factory.opened());
}

#[tokio::test]
async fn wrong_captcha_retries_keep_the_selection() {
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new().with_outcome(
        |sub| {
            if sub.attempt == 0 {
                SubmitOutcome::WrongCaptcha
            } else {
                SubmitOutcome::Record(RecordPage::sample())
            }
        },
    )));
    let s = factory.portal().selectors.clone();
    let ledger = Arc::new(MemoryLedger::new());

    let summary = scheduler(&factory, ledger.clone(), 1)
        .run(tasks(&["003"]), None)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);

    let log = factory.log();
    for selector in [&s.district, &s.taluka, &s.village, &s.survey] {
        assert_eq!(log.selections(selector), 1, "{}", selector);
    }
    assert_eq!(log.submissions(&s.captcha_input), 2);

    let id = LocationTask::new("02", "07", "003").id();
    let record = ledger.record(&id).await.unwrap().unwrap();
    assert_eq!(record.meta.task_id, id);
}

#[tokio::test]
async fn no_data_is_recorded_as_complete() {
    let factory = Arc::new(ScriptedPortalFactory::new(
        PortalScript::new().always(SubmitOutcome::NoData),
    ));
    let ledger = Arc::new(MemoryLedger::new());

    let summary = scheduler(&factory, ledger.clone(), 1)
        .run(tasks(&["001"]), None)
        .await
        .unwrap();
    assert_eq!(summary.no_data, 1);
    assert_eq!(summary.failed, 0);

    let id = LocationTask::new("02", "07", "001").id();
    let entry = ledger.entry(&id).await.unwrap().unwrap();
    assert!(entry.is_no_data());
    assert_eq!(entry.reason.as_deref(), Some("no_data"));
    assert!(ledger.record(&id).await.unwrap().is_none());

    // A later run treats it as done.
    let again = scheduler(&factory, ledger, 1)
        .run(tasks(&["001"]), None)
        .await
        .unwrap();
    assert_eq!(again.resumed, 1);
    assert_eq!(factory.opened(), 1);
}

#[tokio::test]
async fn captcha_falls_back_through_providers_in_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let providers: Vec<Arc<dyn RecognitionProvider>> = vec![
        Arc::new(Fixed::failing("vertex").sharing(&calls)),
        Arc::new(Fixed::reading("gemini", "4x!").sharing(&calls)),
        Arc::new(Fixed::reading("tesseract", ANSWER).sharing(&calls)),
    ];
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new().with_outcome(
        |sub| {
            if sub.captcha == ANSWER {
                SubmitOutcome::Record(RecordPage::sample())
            } else {
                SubmitOutcome::WrongCaptcha
            }
        },
    )));
    let s = factory.portal().selectors.clone();

    let summary = scheduler_with(&factory, resolver(providers), Arc::new(MemoryLedger::new()), 1)
        .run(tasks(&["001"]), None)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(*calls.lock().unwrap(), vec!["vertex", "gemini", "tesseract"]);
    assert_eq!(factory.log().submissions(&s.captcha_input), 1);
}

#[tokio::test]
async fn browser_that_cannot_start_aborts_the_run() {
    let factory = Arc::new(ScriptedPortalFactory::broken());
    let ledger = Arc::new(MemoryLedger::new());

    let err = scheduler(&factory, ledger.clone(), 2)
        .run(tasks(&["001", "002"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Launch(_)), "{:?}", err);
    assert_eq!(ledger.summary().await.unwrap().completed, 0);
}

#[tokio::test]
async fn ledger_write_failure_stops_dispatching() {
    let factory = Arc::new(ScriptedPortalFactory::new(PortalScript::new()));
    let ledger = Arc::new(FailingLedger::new(MemoryLedger::new()));
    let villages = ["001", "002", "003", "004", "005", "006"];

    let err = scheduler(&factory, ledger.clone(), 2)
        .run(tasks(&villages), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Ledger(_)), "{:?}", err);

    // Each worker gets at most the task it was already holding.
    assert!(ledger.total_dispatches() <= 2, "{}", ledger.total_dispatches());
    assert!(factory.log().submissions(&factory.portal().selectors.captcha_input) <= 2);
    assert_eq!(ledger.summary().await.unwrap().completed, 0);
}

#[tokio::test]
async fn flaky_result_read_still_saves_the_record() {
    let factory = Arc::new(ScriptedPortalFactory::new(
        PortalScript::new().with_flaky_table_reads(1),
    ));
    let s = factory.portal().selectors.clone();
    let ledger = Arc::new(MemoryLedger::new());

    let summary = scheduler(&factory, ledger.clone(), 1)
        .run(tasks(&["001"]), None)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(factory.log().submissions(&s.captcha_input), 1);

    let id = LocationTask::new("02", "07", "001").id();
    assert!(ledger.record(&id).await.unwrap().is_some());
}
