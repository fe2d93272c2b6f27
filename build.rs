fn main() {
    #[cfg(feature = "system-hsa")]
    system::generate_bindings();
}

#[cfg(feature = "system-hsa")]
mod system {
    use std::env;
    use std::path::PathBuf;

    pub fn generate_bindings() {
        let rocm = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());

        // Tell cargo to link HSA runtime library
        println!("cargo:rustc-link-lib=hsa-runtime64");
        println!("cargo:rustc-link-search=native={rocm}/lib");
        println!("cargo:rerun-if-changed=wrapper.h");
        println!("cargo:rerun-if-env-changed=ROCM_PATH");

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .clang_arg(format!("-I{rocm}/include"))
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .allowlist_function("hsa_.*")
            .allowlist_type("hsa_.*")
            .allowlist_var("HSA_.*")
            .derive_default(true)
            .generate()
            .expect("Unable to generate bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write bindings!");
    }
}
