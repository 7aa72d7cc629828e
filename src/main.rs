use std::thread;
use std::time::{Duration, Instant};

fn base_demo() {
    let f1 = spindle::spawn(|| println!("  hello from the pool")).expect("spawn failed");
    f1.get();

    let f2 = spindle::spawn(|| 1 + 1).expect("spawn failed");
    println!("  got result {}", f2.get());
}

fn parallel_submit_demo() {
    let f1 = spindle::spawn(|| 1).expect("spawn failed");
    let f2 = spindle::spawn(|| 2.0).expect("spawn failed");
    let f3 = spindle::spawn(|| String::from("hello world")).expect("spawn failed");
    let f4 = spindle::spawn(|| println!("  void task")).expect("spawn failed");
    let f5 = spindle::spawn(|| vec![100, 200, 300, 400]).expect("spawn failed");

    let (r1, r2, r3, _r4, r5) = spindle::wait((f1, f2, f3, f4, f5));
    println!("  wait results: {r1}, {r2}, {r3}, {r5:?}");
}

// Fans out a few tasks of uneven length; block_on waits for all of them.
fn fan_out_task() {
    let _ = spindle::spawn(|| println!("  fan_out first ..."));
    let _ = spindle::spawn(|| {
        println!("  fan_out second ...");
        thread::sleep(Duration::from_millis(50));
    });
    let _ = spindle::spawn(|| {
        println!("  fan_out third ...");
        thread::sleep(Duration::from_millis(100));
    });
}

// Each task spawns the next generation; the group follows the whole tree.
fn nested_task() {
    for i in 0..5 {
        let _ = spindle::spawn(move || {
            println!("  nested first ... {i}");
            let _ = spindle::spawn(move || {
                println!("  nested second ... {i}");
                let _ = spindle::spawn(move || {
                    println!("  nested third ... {i}");
                    let _ = spindle::spawn(move || println!("  nested fourth ... {i}"));
                });
            });
        });
    }
}

fn main() {
    println!("spindle - work-stealing thread pool\n");

    println!("base demo:");
    base_demo();

    println!("\nparallel submit demo:");
    parallel_submit_demo();

    println!("\nblock_on fan-out:");
    let start = Instant::now();
    spindle::block_on(fan_out_task).expect("block_on failed");
    println!("  all fan-out tasks done in {:?}", start.elapsed());

    println!("\nblock_on nested tree:");
    spindle::block_on(nested_task).expect("block_on failed");
    println!("  whole tree done");

    println!("\nshutting down ...");
    spindle::close_and_join();
    println!("done");
}
