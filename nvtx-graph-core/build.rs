fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=NVTX_LIB_DIR");

    if std::env::var("CARGO_FEATURE_NVTX").is_err() {
        return;
    }

    let target = std::env::var("TARGET").unwrap_or_default();

    if let Ok(dir) = std::env::var("NVTX_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    } else {
        let cuda_home = std::env::var("CUDA_HOME")
            .or_else(|_| std::env::var("CUDA_PATH"))
            .unwrap_or_else(|_| "/usr/local/cuda".to_string());
        // https://docs.nvidia.com/cuda/cuda-installation-guide-microsoft-windows/
        if target.contains("msvc") {
            println!("cargo:rustc-link-search=native={cuda_home}/lib/x64");
        } else {
            println!("cargo:rustc-link-search=native={cuda_home}/lib64");
            println!("cargo:rustc-link-search=native={cuda_home}/lib");
        }
    }

    if target.contains("msvc") {
        println!("cargo:rustc-link-lib=dylib=nvToolsExt64_1");
    } else {
        println!("cargo:rustc-link-lib=dylib=nvToolsExt");
    }
}
