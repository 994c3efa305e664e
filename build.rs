// build.rs

fn main() {
    // Generate build info (shown by `acq-affinity show`)
    vergen::EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("Unable to generate build info");

    println!("cargo:rerun-if-changed=build.rs");
}
