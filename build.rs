//! Rebuilds the crate when the SQL files embedded by the migrator change.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
