fn main() {
    for (var, exported) in [
        ("TARGET", "RCONLINK_BUILD_TARGET"),
        ("PROFILE", "RCONLINK_BUILD_PROFILE"),
    ] {
        if let Ok(value) = std::env::var(var) {
            println!("cargo:rustc-env={exported}={value}");
        }
        println!("cargo:rerun-if-env-changed={var}");
    }
}
