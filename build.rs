fn main() {
    println!("cargo:rerun-if-changed=proto/aggregated_record.proto");
    let mut prost_build = prost_build::Config::new();
    prost_build
        .compile_protos(&["proto/aggregated_record.proto"], &["proto"])
        .expect("Failed to compile proto files");
}
