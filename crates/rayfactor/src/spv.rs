use std::{fs, path::Path};

use app::anyhow::{anyhow, Result};

// The binary is usually launched from the workspace root, but packaged
// builds sit next to their spv directory.
const SPV_SEARCH_PATHS: [&str; 3] = ["", "./spv", "./crates/rayfactor/spv"];

pub fn load_spv<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();

    for pre in SPV_SEARCH_PATHS {
        let search = Path::new(pre).join(path);
        if let Ok(bytes) = fs::read(&search) {
            return Ok(bytes);
        }
    }

    Err(anyhow!(
        "Couldn't find spv file {} in any of {:?}, current path: {}",
        path.display(),
        SPV_SEARCH_PATHS,
        Path::new(".").canonicalize()?.display()
    ))
}

#[test]
fn test_load_spv() {
    load_spv("./src/spv.rs").unwrap();
}
