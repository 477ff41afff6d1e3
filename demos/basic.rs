use tagalloc::{Block, FixedStorage, Heap};

fn log_alloc(heap: &Heap<FixedStorage>, block: Block, requested: usize) {
    println!("Requested {requested} bytes of memory");
    println!(
        "Received offset {} with {} usable bytes",
        block.offset(),
        heap.payload(block).len()
    );
}

fn main() {
    env_logger::init();

    let mut heap = Heap::init(FixedStorage::with_limit(64 * 1024)).expect("initial heap growth");

    let a = heap.allocate(8).unwrap();
    log_alloc(&heap, a, 8);

    let b = heap.allocate(100).unwrap();
    log_alloc(&heap, b, 100);

    let c = heap.allocate(16).unwrap();
    log_alloc(&heap, c, 16);

    heap.payload_mut(b)[..12].copy_from_slice(b"hello, heap!");

    println!("\nFreeing the first block and allocating again");
    heap.free(a);
    let reused = heap.allocate(8).unwrap();
    if reused == a {
        println!("Correctly reused offset {}", reused.offset());
    } else {
        println!(
            "Not reused. A was at {} and the new block is at {}",
            a.offset(),
            reused.offset()
        );
    }

    println!("\nGrowing the middle block");
    let grown = heap.resize(Some(b), 160).unwrap().unwrap();
    println!(
        "Block moved: {} (payload still starts with {:?})",
        grown != b,
        std::str::from_utf8(&heap.payload(grown)[..12]).unwrap()
    );

    heap.free(reused);
    heap.free(grown);
    heap.free(c);

    println!(
        "\nAll freed: {} of {} bytes back on the free list",
        heap.free_bytes(),
        heap.total_bytes()
    );
}
