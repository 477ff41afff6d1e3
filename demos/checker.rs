//! This example is designed to show the invariant checker over a live
//! heap. A consistent heap produces an empty report after every
//! operation; see [`tagalloc::Violation`] for the kinds it can detect.

use tagalloc::{FixedStorage, Heap};

fn report(heap: &Heap<FixedStorage>, label: &str) {
    let violations = heap.check();
    if violations.is_empty() {
        println!("{label}: heap consistent ({} free bytes)", heap.free_bytes());
    } else {
        for violation in violations {
            println!("{label}: {violation}");
        }
    }
}

fn main() {
    env_logger::init();

    let mut heap = Heap::init(FixedStorage::with_limit(64 * 1024)).expect("initial heap growth");
    report(&heap, "fresh heap");

    let mut live = Vec::new();
    for size in [24, 100, 320, 8, 1000] {
        live.push(heap.allocate(size).unwrap());
    }
    report(&heap, "after allocations");

    // Free every other block, then the rest, exercising both coalescing
    // directions.
    for block in live.iter().skip(1).step_by(2) {
        heap.free(*block);
    }
    report(&heap, "after partial frees");

    for block in live.iter().step_by(2) {
        heap.free(*block);
    }
    report(&heap, "after all frees");

    let big = heap.allocate(8000).unwrap();
    report(&heap, "after growing past the first chunk");
    heap.free(big);
    report(&heap, "final");
}
