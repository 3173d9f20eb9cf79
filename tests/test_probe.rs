use std::sync::{Arc, Barrier};

use mutacov::probe::{InvokeReceiver, ProbeId, ProbeStore, current_test, enter_test, unit_tag};
use mutacov::unit::UnitName;

#[test]
fn probe_id_packs_unit_tag_and_local_index() {
    let probe = ProbeId::new(0xdead_beef, 42);
    assert_eq!(probe.unit_tag(), 0xdead_beef);
    assert_eq!(probe.local(), 42);
    assert_eq!(ProbeId::from_raw(probe.as_u64()), probe);
    assert_eq!(probe.to_string(), "deadbeef:42");
}

#[test]
fn unit_tag_is_stable_and_name_sensitive() {
    let a = UnitName::new("app.Calc");
    assert_eq!(unit_tag(&a), unit_tag(&UnitName::new("app.Calc")));
    assert_ne!(unit_tag(&a), unit_tag(&UnitName::new("app.Calculator")));
    // FNV-1a offset basis for the empty string
    assert_eq!(unit_tag(&UnitName::new("")), 0x811c_9dc5);
}

#[test]
fn report_without_test_is_unattributed() {
    let store = ProbeStore::new();
    store.report(ProbeId::new(1, 0));
    assert!(store.is_empty());
    assert_eq!(store.unattributed(), 1);
}

#[test]
fn report_records_running_test() {
    let store = ProbeStore::new();
    let probe = ProbeId::new(1, 0);
    {
        let _test = enter_test("first");
        store.report(probe);
    }
    assert_eq!(store.last_test(probe).as_deref(), Some("first"));
    assert_eq!(store.len(), 1);
}

#[test]
fn later_test_replaces_earlier_one() {
    let store = ProbeStore::new();
    let probe = ProbeId::new(1, 3);
    for name in ["first", "second"] {
        let _test = enter_test(name);
        store.report(probe);
    }
    assert_eq!(store.last_test(probe).as_deref(), Some("second"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_scopes_nest_and_restore() {
    assert!(current_test().is_none());
    let outer = enter_test("outer");
    {
        let _inner = enter_test("inner");
        assert_eq!(current_test().as_deref(), Some("inner"));
    }
    assert_eq!(current_test().as_deref(), Some("outer"));
    drop(outer);
    assert!(current_test().is_none());
}

#[test]
fn reset_clears_everything() {
    let store = ProbeStore::new();
    {
        let _test = enter_test("t");
        store.report(ProbeId::new(7, 1));
        store.report(ProbeId::new(7, 2));
    }
    store.report(ProbeId::new(7, 3));
    store.reset();
    assert!(store.is_empty());
    assert_eq!(store.unattributed(), 0);
    assert!(store.snapshot().is_empty());
}

#[test]
fn snapshot_is_ordered_by_probe() {
    let store = ProbeStore::new();
    let _test = enter_test("t");
    for local in [5, 1, 3] {
        store.report(ProbeId::new(2, local));
    }
    let locals: Vec<u32> = store.snapshot().keys().map(|p| p.local()).collect();
    assert_eq!(locals, vec![1, 3, 5]);
}

#[test]
fn concurrent_reports_for_distinct_probes_are_all_kept() {
    const THREADS: u32 = 32;
    let store = Arc::new(ProbeStore::new());
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let _test = enter_test(&format!("test_{i}"));
                barrier.wait();
                for _ in 0..100 {
                    store.report(ProbeId::new(9, i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let hits = store.snapshot();
    assert_eq!(hits.len(), THREADS as usize);
    for i in 0..THREADS {
        let expected = format!("test_{i}");
        assert_eq!(hits.get(&ProbeId::new(9, i)).map(|t| &**t), Some(expected.as_str()));
    }
    assert_eq!(store.unattributed(), 0);
}

#[test]
fn shared_receiver_reports_through_arc() {
    let store = Arc::new(ProbeStore::new());
    let receiver: Arc<dyn InvokeReceiver> = store.clone();
    let _test = enter_test("via_arc");
    receiver.report(ProbeId::new(4, 4));
    assert_eq!(store.last_test(ProbeId::new(4, 4)).as_deref(), Some("via_arc"));
}
