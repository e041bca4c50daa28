use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    // Tell cargo to recompile if any proto files change
    println!("cargo:rerun-if-changed=../proto/auth/v1/");

    // Servers only; message types are shared with callers through service-core
    tonic_build::configure()
        .build_server(true)
        .build_client(false) // Clients will be built in service-core
        .extern_path(".auth.v1", "::service_core::grpc::proto::auth")
        .compile_protos(
            &[
                "../proto/auth/v1/authz.proto",
                "../proto/auth/v1/auth.proto",
                "../proto/auth/v1/otp.proto",
                "../proto/auth/v1/role.proto",
            ],
            &[proto_root],
        )?;

    Ok(())
}
