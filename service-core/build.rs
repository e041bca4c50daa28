use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    // Tell cargo to recompile if any proto files change
    println!("cargo:rerun-if-changed=../proto/auth/v1/");

    // Compile auth service protos (client-side)
    tonic_build::configure()
        .build_server(false) // Servers live in auth-service
        .build_client(true) // Build clients for calling auth-service
        .compile_protos(
            &[
                "../proto/auth/v1/authz.proto",
                "../proto/auth/v1/auth.proto",
                "../proto/auth/v1/otp.proto",
                "../proto/auth/v1/role.proto",
            ],
            &[&proto_root],
        )?;

    Ok(())
}
