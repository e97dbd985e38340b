use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use taskdeck_core::storage::MemoryStorage;
use taskdeck_core::store::TaskStore;
use taskdeck_core::task::{Priority, TaskForm};
use taskdeck_core::view::{Tab, partition};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
}

fn priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn form() -> impl Strategy<Value = TaskForm> {
    ("[a-z]{1,12}", -90i64..90, priority(), any::<bool>()).prop_map(|(title, offset, priority, completed)| {
        let mut form = TaskForm::new(title, base() + Duration::hours(offset * 6)).with_priority(priority);
        form.completed = completed;
        form
    })
}

fn fresh() -> TaskStore<MemoryStorage> {
    TaskStore::open(MemoryStorage::new(), "tasks").unwrap()
}

proptest! {
    #[test]
    fn every_added_task_gets_a_distinct_id(forms in prop::collection::vec(form(), 0..40)) {
        let mut store = fresh();
        for form in forms.iter().cloned() {
            store.add_task(form, base()).unwrap();
        }

        let ids: HashSet<_> = store.tasks().iter().map(|t| t.id).collect();
        prop_assert_eq!(store.len(), forms.len());
        prop_assert_eq!(ids.len(), forms.len());
    }

    #[test]
    fn toggling_twice_restores_the_task(forms in prop::collection::vec(form(), 1..10), pick in any::<prop::sample::Index>()) {
        let mut store = fresh();
        for form in forms {
            store.add_task(form, base()).unwrap();
        }
        let before = store.tasks().to_vec();
        let id = before[pick.index(before.len())].id;

        store.toggle_task_completion(id).unwrap();
        prop_assert_ne!(store.tasks(), before.as_slice());
        store.toggle_task_completion(id).unwrap();
        prop_assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn each_task_lands_in_exactly_one_tab(
        forms in prop::collection::vec(form(), 0..40),
        boundary_offset in -48i64..48,
    ) {
        let mut store = fresh();
        for form in forms {
            store.add_task(form, base()).unwrap();
        }
        let boundary = base() + Duration::hours(boundary_offset);

        let parts = partition(store.tasks(), boundary);
        let counts = parts.counts();
        prop_assert_eq!(counts.upcoming + counts.overdue + counts.completed, store.len());

        for task in store.tasks() {
            let homes = Tab::ALL
                .iter()
                .filter(|&&tab| parts.tab(tab).iter().any(|t| t.id == task.id))
                .count();
            prop_assert_eq!(homes, 1);
        }
    }

    #[test]
    fn reload_reproduces_the_collection(forms in prop::collection::vec(form(), 0..20)) {
        let mut store = fresh();
        for form in forms {
            store.add_task(form, base()).unwrap();
        }
        let before = store.tasks().to_vec();

        let reopened = TaskStore::open(store.close(), "tasks").unwrap();
        prop_assert_eq!(reopened.tasks(), before.as_slice());
    }
}
