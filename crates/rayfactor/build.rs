use std::io;
use std::path::Path;
use std::process::{Command, Output};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell the build script to only run again if we change our source shaders
    println!("cargo:rerun-if-changed=shaders");

    // Create destination path if necessary
    std::fs::create_dir_all("spv")?;

    for entry in std::fs::read_dir("shaders")? {
        let entry = entry?;

        if entry.file_type()?.is_file() {
            let in_path = entry.path();
            let result = Command::new("glslc")
                .args([in_path.to_str().unwrap(), "--target-env=vulkan1.2", "-o"])
                .arg(format!(
                    "spv/{}.spv",
                    entry.file_name().into_string().unwrap()
                ))
                .output();

            handle_program_result(&in_path, result);
        }
    }

    Ok(())
}

fn handle_program_result(shader: &Path, result: io::Result<Output>) {
    match result {
        Ok(output) => {
            if !output.status.success() {
                eprint!("stdout: {}", String::from_utf8_lossy(&output.stdout));
                eprint!("stderr: {}", String::from_utf8_lossy(&output.stderr));
                panic!(
                    "Failed to compile shader {:?}. Status: {}",
                    shader, output.status
                );
            }
        }
        Err(error) => {
            panic!("Failed to invoke glslc. Cause: {error}");
        }
    }
}
