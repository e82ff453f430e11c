use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let platform_version_path = Path::new(&out_dir).join("platform_version.rs");

    // Read platform version from Cargo.toml metadata
    let cargo_manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
    let cargo_toml_path = Path::new(&cargo_manifest).join("Cargo.toml");
    let cargo_toml_content = fs::read_to_string(&cargo_toml_path)
        .expect("Failed to read Cargo.toml");

    let cargo_toml: toml::Value = cargo_toml_content.parse()
        .expect("Failed to parse Cargo.toml");

    let platform_version = cargo_toml
        .get("package")
        .and_then(|p| p.get("metadata"))
        .and_then(|m| m.get("plughost"))
        .and_then(|g| g.get("platform_version"))
        .and_then(|v| v.as_str())
        .expect("Failed to find package.metadata.plughost.platform_version in Cargo.toml");

    let components: Vec<&str> = platform_version.split('.').collect();
    if components.len() != 3 || components.iter().any(|c| c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit())) {
        panic!("platform_version must be MAJOR.MINOR.PATCH, got {:?}", platform_version);
    }

    let version_content = format!(
        "// Auto-generated platform version from Cargo.toml metadata\n\
         // Source: package.metadata.plughost.platform_version = {:?}\n\
         pub const PLATFORM_VERSION: &str = {:?};\n",
        platform_version, platform_version
    );

    fs::write(&platform_version_path, version_content)
        .expect("Failed to write platform_version.rs");

    println!("cargo:rerun-if-changed=Cargo.toml");
}
