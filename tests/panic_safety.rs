use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spindle::ThreadPool;

#[test]
fn panic_surfaces_through_the_handle() {
    let pool = ThreadPool::new(1);
    let handle = pool.spawn(|| -> i32 { panic!("intentional panic") }).unwrap();

    let err = handle.join().err().unwrap();
    assert!(err.is_panic());
    assert_eq!(
        err.into_panic().downcast_ref::<&str>().copied(),
        Some("intentional panic")
    );
    pool.close_and_join();
}

#[test]
#[should_panic(expected = "intentional panic")]
fn get_resumes_the_panic() {
    let pool = ThreadPool::new(1);
    let handle = pool.spawn(|| -> i32 { panic!("intentional panic") }).unwrap();
    let _ = handle.get();
}

#[test]
fn worker_recovers_after_panic() {
    let pool = ThreadPool::new(1);

    let boom = pool.spawn(|| -> () { panic!("boom") }).unwrap();
    assert!(boom.join().is_err());

    // The lone worker must still be alive to run this.
    let ok = pool.spawn(|| 5).unwrap();
    assert_eq!(ok.get(), 5);
    pool.close_and_join();
}

#[test]
fn group_decrements_despite_panics() {
    let pool = ThreadPool::new(2);
    let executed = Arc::new(AtomicUsize::new(0));

    let pool2 = pool.clone();
    let counter = Arc::clone(&executed);
    // block_on must return even though one descendant dies early.
    pool.block_on(move || {
        for i in 0..10 {
            let counter2 = Arc::clone(&counter);
            pool2
                .spawn(move || {
                    if i == 3 {
                        panic!("descendant failure");
                    }
                    counter2.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
    })
    .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), 9);
    pool.close_and_join();
}
