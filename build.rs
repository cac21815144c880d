use std::env;
use std::fs;
use std::path::Path;

fn main() {
    copy_example_targets();
}

/// Copies targets.example.json next to the executable so users can start from it.
fn copy_example_targets() {
    let out_dir = env::var("OUT_DIR").unwrap();
    // OUT_DIR is something like target/release/build/yys-clicker-xxx/out
    // We need to go up to target/release (or target/debug)
    let target_dir = Path::new(&out_dir)
        .ancestors()
        .nth(3) // Go up 3 levels: out -> hash -> build -> release
        .expect("Could not find target directory");

    let example_src = Path::new("targets.example.json");
    if example_src.exists() {
        let _ = fs::copy(example_src, target_dir.join("targets.example.json"));
        println!("cargo:rerun-if-changed=targets.example.json");
    }
}
