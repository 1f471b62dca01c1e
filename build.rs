fn main() {
    // Exposes GIT_COMMIT_HASH and friends through `built_info`.
    if let Err(err) = built::write_built_file() {
        println!("cargo:warning=failed to acquire build-time information: {err}");
    }
}
