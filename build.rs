/// Build Script for the SMS Login Service
///
/// Compiles the protocol buffer definitions and generates the Rust code
/// for the gRPC service interface.
///
/// # Copyright
/// Copyright (c) 2025 Signal Messenger, LLC
/// All rights reserved.
///
/// # License
/// Licensed under the AGPLv3 license.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/sms_login.proto")?;
    Ok(())
}
