//! Build script that tracks the SQL migrations.
//!
//! `sqlx::migrate!` embeds `migrations/` at compile time, so cargo must
//! rebuild this crate whenever a migration changes.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
