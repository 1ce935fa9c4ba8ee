use ctxrelay_peer::DEFAULT_PROTOCOL_VERSION;
use ctxrelay_relay::DEFAULT_PORT;
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct VersionOutput {
    name: &'static str,
    version: &'static str,
    protocol_version: &'static str,
    default_port: u16,
    target: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("ctxrelay {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let out = VersionOutput {
        name: "ctxrelay",
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: DEFAULT_PROTOCOL_VERSION,
        default_port: DEFAULT_PORT,
        target: option_env!("CTXRELAY_BUILD_TARGET").unwrap_or("unknown"),
        target_os: std::env::consts::OS,
        target_arch: std::env::consts::ARCH,
    };

    if matches!(format, OutputFormat::Json) {
        print_json(&out);
        return Ok(SUCCESS);
    }

    println!("name: {}", out.name);
    println!("version: {}", out.version);
    println!("protocol_version: {}", out.protocol_version);
    println!("default_port: {}", out.default_port);
    println!("target: {}", out.target);
    println!("target_os: {}", out.target_os);
    println!("target_arch: {}", out.target_arch);
    println!(
        "features: peer={}, relay={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "relay")
    );

    Ok(SUCCESS)
}
