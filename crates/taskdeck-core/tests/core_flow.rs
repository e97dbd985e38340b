use std::ffi::OsString;
use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use taskdeck_core::filter::{PriorityFilter, StatusFilter, TaskFilter};
use taskdeck_core::storage::{FileStorage, Storage};
use taskdeck_core::store::{DEFAULT_STORAGE_KEY, LoadOutcome, StoreError, TaskStore};
use taskdeck_core::task::{Priority, TaskForm};
use taskdeck_core::view::{Tab, partition, tab_tasks};
use tempfile::tempdir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

fn today() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
}

fn titles(tasks: &[&taskdeck_core::task::Task]) -> Vec<String> {
    tasks.iter().map(|t| t.title.clone()).collect()
}

#[test]
fn task_moves_between_tabs_and_survives_reload() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    let mut store = TaskStore::open(storage, DEFAULT_STORAGE_KEY).expect("open store");
    assert_eq!(store.load_outcome(), &LoadOutcome::Empty);

    let rent = store
        .add_task(
            TaskForm::new("Pay rent", now() + Duration::days(1))
                .with_description("landlord wants it by noon")
                .with_priority(Priority::High),
            now(),
        )
        .expect("add rent");
    store
        .add_task(TaskForm::new("Renew passport", now() - Duration::days(1)), now())
        .expect("add passport");

    let parts = partition(store.tasks(), today());
    assert_eq!(titles(parts.tab(Tab::Upcoming)), vec!["Pay rent"]);
    assert_eq!(titles(parts.tab(Tab::Overdue)), vec!["Renew passport"]);
    assert!(parts.tab(Tab::Completed).is_empty());

    store.toggle_task_completion(rent.id).expect("toggle");
    let parts = partition(store.tasks(), today());
    assert!(parts.tab(Tab::Upcoming).is_empty());
    assert_eq!(titles(parts.tab(Tab::Completed)), vec!["Pay rent"]);

    let search = TaskFilter::new("RENT", PriorityFilter::All, StatusFilter::All);
    assert_eq!(titles(&search.apply(store.tasks())), vec!["Pay rent"]);

    let before = store.tasks().to_vec();
    let storage = store.close();
    assert!(storage.path_for(DEFAULT_STORAGE_KEY).exists());

    let reopened = TaskStore::open(storage, DEFAULT_STORAGE_KEY).expect("reopen");
    assert_eq!(
        reopened.load_outcome(),
        &LoadOutcome::Restored {
            count: 2,
            version: 1
        }
    );
    assert_eq!(reopened.tasks(), before.as_slice());
}

#[test]
fn delete_keeps_remaining_order_on_disk() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    let mut store = TaskStore::open(storage, "work").expect("open store");

    let mut ids = Vec::new();
    for title in ["one", "two", "three", "four"] {
        ids.push(store.add_task(TaskForm::new(title, now()), now()).expect("add").id);
    }
    store.delete_task(ids[1]).expect("delete");
    assert!(matches!(store.delete_task(ids[1]), Err(StoreError::NotFound(id)) if id == ids[1]));

    let storage = store.close();
    let reopened = TaskStore::open(storage, "work").expect("reopen");
    let order: Vec<&str> = reopened.tasks().iter().map(|t| t.title.as_str()).collect();
    assert_eq!(order, vec!["one", "three", "four"]);
}

#[test]
fn legacy_array_and_corrupt_payloads_are_handled() {
    let temp = tempdir().expect("tempdir");
    let legacy = r#"[{"id":"6f1c2b1e-8d0a-4e7b-9a53-0c2f4f1d9e10","title":"Water plants",
        "dueDate":"2026-10-17","priority":"LOW","completed":false,
        "createdAt":"2026-10-01T08:00:00.000Z"}]"#;
    fs::write(temp.path().join("tasks.json"), legacy).expect("seed legacy");

    let storage = FileStorage::open(temp.path()).expect("open storage");
    let store = TaskStore::open(storage, DEFAULT_STORAGE_KEY).expect("open store");
    assert_eq!(
        store.load_outcome(),
        &LoadOutcome::Restored {
            count: 1,
            version: 0
        }
    );
    let task = &store.tasks()[0];
    assert_eq!(task.priority, Priority::Low);
    assert_eq!(task.description, "");
    assert_eq!(tab_tasks(store.tasks(), Tab::Overdue, today()).len(), 1);

    fs::write(temp.path().join("broken.json"), "{not json").expect("seed broken");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    let store = TaskStore::open(storage, "broken").expect("open store");
    assert!(matches!(store.load_outcome(), LoadOutcome::Recovered { .. }));
    assert!(store.is_empty());
    assert_eq!(
        store.storage().get("broken.corrupt").expect("read backup").as_deref(),
        Some("{not json")
    );
}

#[test]
fn quota_failure_leaves_tasks_and_file_unchanged() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    let mut store = TaskStore::open(storage, DEFAULT_STORAGE_KEY).expect("open store");
    store.add_task(TaskForm::new("small", now()), now()).expect("add");
    let on_disk = fs::read_to_string(temp.path().join("tasks.json")).expect("read");

    let storage = store.close().with_quota(Some(on_disk.len() as u64 + 8));
    let mut store = TaskStore::open(storage, DEFAULT_STORAGE_KEY).expect("reopen");
    let long = "x".repeat(512);
    let err = store
        .add_task(TaskForm::new(long, now()), now())
        .expect_err("over quota");
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(store.len(), 1);
    assert_eq!(
        fs::read_to_string(temp.path().join("tasks.json")).expect("read"),
        on_disk
    );
}

#[test]
fn cli_run_writes_through_to_the_data_dir() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(&rc, "color = off\nstorage.key = cli\n").expect("write rc");
    let data = temp.path().join("data");

    let invoke = |args: &[&str]| {
        let mut raw: Vec<OsString> = vec![
            "taskdeck".into(),
            "--taskdeckrc".into(),
            rc.clone().into_os_string(),
            "--data".into(),
            data.clone().into_os_string(),
        ];
        raw.extend(args.iter().map(OsString::from));
        taskdeck_core::run(raw)
    };

    invoke(&["add", "Pay", "rent", "due:2099-01-01", "pri:high"]).expect("add");
    invoke(&["add", "Buy", "milk"]).expect("add");
    invoke(&["toggle", "2"]).expect("toggle");
    invoke(&["list", "rent"]).expect("list");
    assert!(invoke(&["toggle", "9"]).is_err());
    assert!(invoke(&["edit", "1", "priority:urgent"]).is_err());

    let storage = FileStorage::open(&data).expect("open storage");
    let store = TaskStore::open(storage, "cli").expect("open store");
    assert_eq!(store.len(), 2);
    assert_eq!(store.tasks()[0].title, "Pay rent");
    assert_eq!(store.tasks()[0].priority, Priority::High);
    assert!(!store.tasks()[0].completed);
    assert!(store.tasks()[1].completed);
}

#[test]
fn read_only_commands_leave_the_data_file_alone() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(&rc, "color = off\n").expect("write rc");
    let data = temp.path().join("data");
    fs::create_dir_all(&data).expect("data dir");
    let file = data.join("tasks.json");
    let legacy = r#"[{"id":"6f1c2b1e-8d0a-4e7b-9a53-0c2f4f1d9e10","title":"Water plants","dueDate":"2026-10-17","priority":"LOW","createdAt":"2026-10-01T08:00:00.000Z"}]"#;
    fs::write(&file, legacy).expect("seed legacy");
    let modified = fs::metadata(&file).expect("metadata").modified().expect("mtime");

    let invoke = |args: &[&str]| {
        let mut raw: Vec<OsString> = vec![
            "taskdeck".into(),
            "--taskdeckrc".into(),
            rc.clone().into_os_string(),
            "--data".into(),
            data.clone().into_os_string(),
        ];
        raw.extend(args.iter().map(OsString::from));
        taskdeck_core::run(raw)
    };

    let read_only: [&[&str]; 7] = [
        &["list"],
        &["upcoming", "water"],
        &["overdue"],
        &["summary"],
        &["export"],
        &["info", "1"],
        &["help"],
    ];
    for args in read_only {
        invoke(args).expect("read-only command");
    }
    assert!(invoke(&["add", "far", "away", "due:+100000000d"]).is_err());

    assert_eq!(fs::read_to_string(&file).expect("read"), legacy);
    assert_eq!(fs::metadata(&file).expect("metadata").modified().expect("mtime"), modified);

    invoke(&["toggle", "1"]).expect("toggle");
    let upgraded = fs::read_to_string(&file).expect("read");
    assert!(upgraded.starts_with(r#"{"version":1,"tasks":["#));
}
