// Build script to compile GLSL shaders to SPIR-V
//
// Output lands where the binary loads it from at runtime (relative to the
// working directory), so `cargo run` from the repository root just works.
// The compiled binaries are committed; without glslc they are used as-is.

use std::path::Path;
use std::process::Command;

const OUTPUT_DIR: &str = "assets/shaders/bytecodes";

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    if let Err(e) = std::fs::create_dir_all(OUTPUT_DIR) {
        println!("cargo:warning=Could not create {}: {}", OUTPUT_DIR, e);
        return;
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    compile_shader("shaders/triangle.vert", "assets/shaders/bytecodes/vert_bare.spv");
    compile_shader("shaders/triangle.frag", "assets/shaders/bytecodes/frag_bare.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output);
        }
    }
}
