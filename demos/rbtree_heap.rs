use std::io::Read;

use libc::sbrk;
use rbheap::grower::SbrkGrower;
use rbheap::RbHeap;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  env_logger::init();

  // Our red-black-tree-indexed heap. It holds a growth source (here,
  // `SbrkGrower`, which calls the real `sbrk(2)`), the heap's base address,
  // and the NIL sentinel/free-block tree that indexes whatever is currently
  // free.
  let mut heap = RbHeap::new(SbrkGrower::new()).expect("failed to initialize heap");

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 4 bytes and write through the returned pointer.
    // --------------------------------------------------------------------
    let a = heap.malloc(4).expect("malloc(4) failed");
    println!("\n[1] malloc(4) = {:?}", a);
    (a.as_ptr() as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written to a = 0x{:X}", (a.as_ptr() as *mut u32).read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 "odd-sized" bytes, rounded up to a DSIZE multiple.
    // --------------------------------------------------------------------
    let b = heap.malloc(12).expect("malloc(12) failed");
    println!("\n[2] malloc(12) = {:?}", b);
    std::ptr::write_bytes(b.as_ptr(), 0xAB, 12);
    println!("[2] Initialized b with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate an 8-byte value and confirm 8-byte alignment.
    // --------------------------------------------------------------------
    let c = heap.malloc(8).expect("malloc(8) failed");
    println!("\n[3] malloc(8) = {:?}", c);
    (c.as_ptr() as *mut u64).write(0x1122334455667788);
    println!("[3] Value written = 0x{:X}", (c.as_ptr() as *mut u64).read());
    println!("[3] addr % 8 = {}", c.as_ptr() as usize % 8);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the first block, then immediately allocate something that
    //    fits in the hole it left — best-fit should reuse it.
    // --------------------------------------------------------------------
    heap.free(Some(a));
    println!("\n[4] Freed a at {:?}", a);

    let d = heap.malloc(4).expect("malloc(4) failed");
    println!(
      "[4] malloc(4) again = {:?} ({})",
      d,
      if d == a { "reused a's block, as best-fit predicts" } else { "did not reuse a's block" }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Grow b in place: its right neighbor is free, so realloc fuses
    //    rather than falling back to malloc + copy + free.
    // --------------------------------------------------------------------
    let grown = heap.realloc(Some(b), 256).expect("realloc failed");
    println!(
      "\n[5] realloc(b, 256) = {:?} ({})",
      grown,
      if grown == b { "grew in place via the free right neighbor" } else { "fell back to malloc + copy" }
    );
    assert_eq!(std::ptr::read(grown.as_ptr()), 0xAB);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a large block to observe heap growth via sbrk.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = heap.malloc(64 * 1024).expect("large malloc failed");
    println!("\n[6] malloc(64 KiB) = {:?}", big);
    print_program_break("after large alloc");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Free everything; adjacent free blocks coalesce back down to a
    //    small number of free blocks instead of staying fragmented.
    // --------------------------------------------------------------------
    heap.free(Some(c));
    heap.free(Some(d));
    heap.free(Some(grown));
    heap.free(Some(big));
    println!("\n[7] Freed every live block; coalescing has merged adjacent free regions.");

    println!("\n[8] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
