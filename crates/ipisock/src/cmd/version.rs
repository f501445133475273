use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ipisock {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ipisock");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("IPISOCK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("IPISOCK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "units: bohr={} A, hartree={} eV",
        ipisock_peer::units::BOHR,
        ipisock_peer::units::HARTREE
    );
    println!(
        "transports: tcp=true, unix={}",
        cfg!(unix)
    );
    println!("default_port: {}", ipisock_transport::DEFAULT_PORT);

    Ok(SUCCESS)
}
